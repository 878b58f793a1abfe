//! Engine configuration and declarative rule files.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duplicate::{
    ComparisonStrategy, DuplicateOptions, HandlingMode, Normalization, RetentionStrategy,
    DEFAULT_WINDOW_THRESHOLD,
};
use crate::error::{Result, SieveError};
use crate::rules::{Bound, CompareOp, ReplacePolicy, RowCondition, ValidationRule};
use crate::strategy::{millis, StrategyConfig};
use crate::validation::{Severity, StopPolicy, DEFAULT_ASYNC_TIMEOUT};

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SieveConfig {
    /// Rows per streamed batch.
    pub batch_size: usize,
    /// Timeout for async rules that set none.
    #[serde(with = "millis")]
    pub default_async_timeout: Duration,
    pub stop_policy: StopPolicy,
    /// Failures below this severity are ignored.
    pub minimum_severity: Severity,
    pub replace_policy: ReplacePolicy,
    pub strategy: StrategyConfig,
    /// Default for duplicate rules built from rule files.
    pub duplicate_window_threshold: usize,
}

impl Default for SieveConfig {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            default_async_timeout: DEFAULT_ASYNC_TIMEOUT,
            stop_policy: StopPolicy::Continue,
            minimum_severity: Severity::Information,
            replace_policy: ReplacePolicy::Replace,
            strategy: StrategyConfig::default(),
            duplicate_window_threshold: DEFAULT_WINDOW_THRESHOLD,
        }
    }
}

impl SieveConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| SieveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SieveConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SieveError::Config("batch_size must be positive".to_string()));
        }
        if self.default_async_timeout.is_zero() {
            return Err(SieveError::Config(
                "default_async_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_stop_policy(mut self, policy: StopPolicy) -> Self {
        self.stop_policy = policy;
        self
    }

    pub fn with_minimum_severity(mut self, severity: Severity) -> Self {
        self.minimum_severity = severity;
        self
    }

    pub fn with_replace_policy(mut self, policy: ReplacePolicy) -> Self {
        self.replace_policy = policy;
        self
    }

    pub fn with_default_async_timeout(mut self, timeout: Duration) -> Self {
        self.default_async_timeout = timeout;
        self
    }
}

/// Comparison strategies available to rule files and the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonChoice {
    #[default]
    Exact,
    Fuzzy,
    Hash,
    Numeric,
}

impl ComparisonChoice {
    pub fn into_strategy(self, epsilon: f64) -> ComparisonStrategy {
        match self {
            ComparisonChoice::Exact => ComparisonStrategy::Exact,
            ComparisonChoice::Fuzzy => ComparisonStrategy::Fuzzy,
            ComparisonChoice::Hash => ComparisonStrategy::Hash,
            ComparisonChoice::Numeric => ComparisonStrategy::NumericTolerance { epsilon },
        }
    }
}

impl FromStr for ComparisonChoice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(ComparisonChoice::Exact),
            "fuzzy" => Ok(ComparisonChoice::Fuzzy),
            "hash" => Ok(ComparisonChoice::Hash),
            "numeric" => Ok(ComparisonChoice::Numeric),
            _ => Err(format!(
                "Unknown strategy: {s}. Use exact, fuzzy, hash, or numeric."
            )),
        }
    }
}

/// Retention choices available to rule files and the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepChoice {
    #[default]
    First,
    Last,
    MostComplete,
    /// Keep the row with the highest value in the named column.
    Highest(String),
    /// Keep the row with the lowest value in the named column.
    Lowest(String),
}

impl From<KeepChoice> for RetentionStrategy {
    fn from(choice: KeepChoice) -> Self {
        match choice {
            KeepChoice::First => RetentionStrategy::KeepFirst,
            KeepChoice::Last => RetentionStrategy::KeepLast,
            KeepChoice::MostComplete => RetentionStrategy::KeepMostComplete,
            KeepChoice::Highest(column) => RetentionStrategy::KeepExtreme {
                column,
                highest: true,
            },
            KeepChoice::Lowest(column) => RetentionStrategy::KeepExtreme {
                column,
                highest: false,
            },
        }
    }
}

impl FromStr for KeepChoice {
    type Err = String;

    /// `first`, `last`, `most-complete`, `highest:<column>` or `lowest:<column>`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Some((which, column)) = s.split_once(':') {
            let column = column.trim().to_string();
            return match which.to_lowercase().as_str() {
                "highest" => Ok(KeepChoice::Highest(column)),
                "lowest" => Ok(KeepChoice::Lowest(column)),
                _ => Err(format!("Unknown retention: {s}")),
            };
        }
        match s.to_lowercase().replace('_', "-").as_str() {
            "first" => Ok(KeepChoice::First),
            "last" => Ok(KeepChoice::Last),
            "most-complete" => Ok(KeepChoice::MostComplete),
            _ => Err(format!(
                "Unknown retention: {s}. Use first, last, most-complete, highest:<col> or lowest:<col>."
            )),
        }
    }
}

/// Duplicate detection settings in a rule file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateSpec {
    pub strategy: ComparisonChoice,
    /// Only used by the numeric strategy.
    pub epsilon: f64,
    pub normalization: Normalization,
    pub keep: KeepChoice,
    pub handling: HandlingMode,
    pub window_threshold: Option<usize>,
}

impl Default for DuplicateSpec {
    fn default() -> Self {
        Self {
            strategy: ComparisonChoice::Exact,
            epsilon: 0.0,
            normalization: Normalization::default(),
            keep: KeepChoice::First,
            handling: HandlingMode::DeleteDuplicates,
            window_threshold: None,
        }
    }
}

impl DuplicateSpec {
    pub fn into_options(self, default_window: usize) -> DuplicateOptions {
        DuplicateOptions::new(self.strategy.into_strategy(self.epsilon))
            .with_normalization(self.normalization)
            .with_retention(self.keep.into())
            .with_handling(self.handling)
            .with_window_threshold(self.window_threshold.unwrap_or(default_window))
    }
}

/// Variant-specific part of a [`RuleSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleSpecKind {
    Required {
        column: String,
    },
    Range {
        column: String,
        #[serde(default)]
        min: Option<Bound>,
        #[serde(default)]
        max: Option<Bound>,
    },
    Pattern {
        column: String,
        pattern: String,
        #[serde(default = "default_true")]
        case_sensitive: bool,
    },
    /// `column op other_column`.
    Compare {
        column: String,
        op: CompareOp,
        other_column: String,
    },
    CrossColumn {
        column: String,
        check: RowCondition,
    },
    Conditional {
        column: String,
        when: RowCondition,
        check: RowCondition,
    },
    Group {
        columns: Vec<String>,
        check: RowCondition,
    },
    AtLeastOneOf {
        columns: Vec<String>,
    },
    Duplicate {
        columns: Vec<String>,
        #[serde(default)]
        options: DuplicateSpec,
    },
}

fn default_true() -> bool {
    true
}

/// A declarative rule as written in a rule file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Extra columns whose change re-triggers the rule.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(flatten)]
    pub kind: RuleSpecKind,
}

impl RuleSpec {
    /// Build the rule. Pattern compilation errors surface here.
    pub fn into_rule(self, config: &SieveConfig) -> Result<ValidationRule> {
        let name = self.name;
        let mut rule = match self.kind {
            RuleSpecKind::Required { column } => ValidationRule::required(name, column),
            RuleSpecKind::Range { column, min, max } => ValidationRule::range(name, column, min, max),
            RuleSpecKind::Pattern {
                column,
                pattern,
                case_sensitive,
            } => ValidationRule::pattern(name.clone(), column, &pattern, case_sensitive)
                .map_err(|e| SieveError::rule_config(&name, e.to_string()))?,
            RuleSpecKind::Compare {
                column,
                op,
                other_column,
            } => ValidationRule::compare_columns(name, column, op, other_column),
            RuleSpecKind::CrossColumn { column, check } => {
                ValidationRule::cross_column(name, column, check)
            }
            RuleSpecKind::Conditional {
                column,
                when,
                check,
            } => ValidationRule::conditional(name, column, when, check),
            RuleSpecKind::Group { columns, check } => ValidationRule::group(name, columns, check),
            RuleSpecKind::AtLeastOneOf { columns } => ValidationRule::at_least_one_of(name, columns),
            RuleSpecKind::Duplicate { columns, options } => ValidationRule::duplicate(
                name,
                columns,
                options.into_options(config.duplicate_window_threshold),
            ),
        };

        if let Some(severity) = self.severity {
            rule = rule.with_severity(severity);
        }
        if let Some(message) = self.message {
            rule = rule.with_message(message);
        }
        if let Some(ms) = self.timeout_ms {
            rule = rule.with_timeout(Duration::from_millis(ms));
        }
        Ok(rule
            .with_priority(self.priority)
            .with_dependencies(self.depends_on)
            .enabled(self.enabled))
    }
}

/// A JSON document listing declarative rules.
///
/// ```json
/// {
///   "rules": [
///     {"name": "email_required", "kind": "required", "column": "email"},
///     {"name": "unique_email", "kind": "duplicate", "columns": ["email"],
///      "options": {"normalization": {"ignore_case": true}}}
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleFile {
    #[serde(default)]
    pub config: Option<SieveConfig>,
    pub rules: Vec<RuleSpec>,
}

impl RuleFile {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| SieveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Convert every spec. Fails on the first malformed rule.
    pub fn into_rules(self, config: &SieveConfig) -> Result<Vec<ValidationRule>> {
        self.rules
            .into_iter()
            .map(|spec| {
                let rule = spec.into_rule(config)?;
                rule.validate()?;
                Ok(rule)
            })
            .collect()
    }
}
