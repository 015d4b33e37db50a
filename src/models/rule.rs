use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::change::FlagPath;

/// Comparison applied between a resolved value and a threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "=")]
    Equal,
}

impl Comparison {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::GreaterOrEqual => ">=",
            Self::LessOrEqual => "<=",
            Self::Equal => "=",
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute: Option<f64>,
    /// Expected value for boolean rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean: Option<bool>,
    #[serde(default)]
    pub symbol: Comparison,
    #[serde(default)]
    pub description: String,
}

/// Declarative threshold rule (built in or loaded from YAML).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub name: String,
    pub path: FlagPath,
    #[serde(flatten)]
    pub config: ThresholdConfig,
}

/// What made a rule fire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Trigger {
    Boolean { value: bool },
    Percentage { value: f64, threshold: f64 },
    Absolute { value: f64, threshold: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggeredRule {
    pub name: String,
    pub description: String,
    pub path: FlagPath,
    pub symbol: Comparison,
    pub trigger: Trigger,
}
