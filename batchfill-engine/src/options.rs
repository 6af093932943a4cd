//! Join options, engine configuration and option resolution.

use crate::error::{JoinError, JoinResult};
use crate::strategy::{AssignFn, JoinStrategy, RecordFn, TargetFn, read_record_field, read_target_field};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Parallelism used when `use_each_async` is set without `parallel`.
pub const DEFAULT_PARALLELISM: usize = 8;

/// Per-join options. Every field is optional so per-call options can be
/// layered over engine defaults with [`JoinOptions::merged_over`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinOptions {
    /// Field on the target that receives the joined data.
    pub target_field: Option<String>,
    /// Seed condition every fetched record must satisfy.
    pub base_condition: Option<Value>,
    /// Value seeded into the target when it is added. Objects are
    /// shallow-merged onto the target instead.
    pub default_value: Option<Value>,
    /// Field on the foreign record holding the join key; also the field
    /// the membership predicate filters on.
    pub foreign_field: Option<String>,
    /// Field on the target holding its own key (default `"id"`).
    pub local_field: Option<String>,
    /// Field on the foreign record copied into the target. Unset copies the
    /// whole record.
    pub source_field: Option<String>,
    /// One-to-many: append into an array instead of assigning.
    pub is_multiple: Option<bool>,
    /// Handle the fetched stream with bounded concurrency.
    pub use_each_async: Option<bool>,
    /// Concurrency bound for `use_each_async`.
    pub parallel: Option<usize>,
    /// Back-relation (true, default): foreign records point at the target's
    /// `local_field`. Forward reference (false): the target stores the
    /// foreign key in `target_field`.
    pub use_target_id: Option<bool>,
}

impl JoinOptions {
    pub fn new(target_field: impl Into<String>) -> Self {
        Self {
            target_field: Some(target_field.into()),
            ..Default::default()
        }
    }

    /// Returns these options with unset fields taken from `defaults`.
    pub fn merged_over(self, defaults: &JoinOptions) -> JoinOptions {
        JoinOptions {
            target_field: self.target_field.or_else(|| defaults.target_field.clone()),
            base_condition: self.base_condition.or_else(|| defaults.base_condition.clone()),
            default_value: self.default_value.or_else(|| defaults.default_value.clone()),
            foreign_field: self.foreign_field.or_else(|| defaults.foreign_field.clone()),
            local_field: self.local_field.or_else(|| defaults.local_field.clone()),
            source_field: self.source_field.or_else(|| defaults.source_field.clone()),
            is_multiple: self.is_multiple.or(defaults.is_multiple),
            use_each_async: self.use_each_async.or(defaults.use_each_async),
            parallel: self.parallel.or(defaults.parallel),
            use_target_id: self.use_target_id.or(defaults.use_target_id),
        }
    }

    pub fn with_foreign_field(mut self, field: impl Into<String>) -> Self {
        self.foreign_field = Some(field.into());
        self
    }

    pub fn with_local_field(mut self, field: impl Into<String>) -> Self {
        self.local_field = Some(field.into());
        self
    }

    pub fn with_source_field(mut self, field: impl Into<String>) -> Self {
        self.source_field = Some(field.into());
        self
    }

    pub fn with_default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_base_condition(mut self, condition: Value) -> Self {
        self.base_condition = Some(condition);
        self
    }

    pub fn multiple(mut self) -> Self {
        self.is_multiple = Some(true);
        self
    }

    pub fn parallel(mut self, limit: usize) -> Self {
        self.use_each_async = Some(true);
        self.parallel = Some(limit);
        self
    }

    pub fn forward_reference(mut self) -> Self {
        self.use_target_id = Some(false);
        self
    }
}

/// Configuration for a fill engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Options every subscription starts from.
    pub defaults: JoinOptions,
    /// Concurrency bound for `use_each_async` joins that set no `parallel`.
    pub default_parallelism: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            defaults: JoinOptions::default(),
            default_parallelism: DEFAULT_PARALLELISM,
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> JoinResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// How a subscription's record stream is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// One record at a time.
    Sequential,
    /// Consumes the stream with `try_for_each_concurrent` bounded by `n`.
    ///
    /// Record handling is synchronous, so handlers never run in parallel
    /// and records are applied in arrival order, exactly as in
    /// `Sequential`. The bound has no observable effect on results.
    Concurrent(usize),
}

/// Fully resolved options and strategies for one subscription.
pub struct JoinPlan {
    pub(crate) target_field: String,
    pub(crate) base_condition: Map<String, Value>,
    pub(crate) default_value: Option<Value>,
    pub(crate) foreign_field: Option<String>,
    pub(crate) source_field: Option<String>,
    pub(crate) is_multiple: bool,
    pub(crate) fetch_mode: FetchMode,
    pub(crate) target_key: TargetFn,
    pub(crate) condition: TargetFn,
    pub(crate) foreign_key: RecordFn,
    pub(crate) assign: Option<AssignFn>,
}

impl JoinPlan {
    /// Merges `options` over the engine defaults, fills unset strategy
    /// slots from field names and validates the result.
    pub fn resolve(
        options: JoinOptions,
        strategy: JoinStrategy,
        config: &EngineConfig,
    ) -> JoinResult<Self> {
        let options = options.merged_over(&config.defaults);

        let target_field = options
            .target_field
            .filter(|f| !f.is_empty())
            .ok_or_else(|| JoinError::Config("target_field is required".into()))?;

        let base_condition = match options.base_condition {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(JoinError::Config("base_condition must be a JSON object".into()));
            }
        };

        let local_field = options.local_field.unwrap_or_else(|| "id".to_string());
        let use_target_id = options.use_target_id.unwrap_or(true);
        let (key_field, foreign_field) = if use_target_id {
            (local_field, options.foreign_field)
        } else {
            let foreign = options.foreign_field.unwrap_or_else(|| local_field.clone());
            (target_field.clone(), Some(foreign))
        };

        let foreign_key = match (strategy.foreign_key, &foreign_field) {
            (Some(f), _) => f,
            (None, Some(field)) => read_record_field(field.clone()),
            (None, None) => {
                return Err(JoinError::Config(
                    "no foreign key strategy: set foreign_field or a custom foreign_key".into(),
                ));
            }
        };
        if foreign_field.is_none() && strategy.condition.is_none() {
            return Err(JoinError::Config(
                "no condition strategy: set foreign_field or a custom condition".into(),
            ));
        }

        let fetch_mode = match (options.parallel, options.use_each_async.unwrap_or(false)) {
            (Some(0), _) => {
                return Err(JoinError::Config("parallel must be at least 1".into()));
            }
            (Some(limit), _) => FetchMode::Concurrent(limit),
            (None, true) => FetchMode::Concurrent(config.default_parallelism.max(1)),
            (None, false) => FetchMode::Sequential,
        };

        Ok(Self {
            target_key: strategy
                .target_key
                .unwrap_or_else(|| read_target_field(key_field.clone())),
            condition: strategy
                .condition
                .unwrap_or_else(|| read_target_field(key_field)),
            foreign_key,
            assign: strategy.assign,
            target_field,
            base_condition,
            default_value: options.default_value,
            foreign_field,
            source_field: options.source_field,
            is_multiple: options.is_multiple.unwrap_or(false),
            fetch_mode,
        })
    }

    pub fn target_field(&self) -> &str {
        &self.target_field
    }

    pub fn foreign_field(&self) -> Option<&str> {
        self.foreign_field.as_deref()
    }

    pub fn source_field(&self) -> Option<&str> {
        self.source_field.as_deref()
    }

    pub fn is_multiple(&self) -> bool {
        self.is_multiple
    }

    pub fn fetch_mode(&self) -> FetchMode {
        self.fetch_mode
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    pub fn base_condition(&self) -> &Map<String, Value> {
        &self.base_condition
    }
}

impl fmt::Debug for JoinPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinPlan")
            .field("target_field", &self.target_field)
            .field("base_condition", &self.base_condition)
            .field("default_value", &self.default_value)
            .field("foreign_field", &self.foreign_field)
            .field("source_field", &self.source_field)
            .field("is_multiple", &self.is_multiple)
            .field("fetch_mode", &self.fetch_mode)
            .field("custom_assign", &self.assign.is_some())
            .finish()
    }
}
