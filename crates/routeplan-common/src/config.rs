//! Planner configuration

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::RouteplanError;

/// Planning strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PlannerVersion {
    /// Legacy rule-based planner
    V3,
    /// Cost-based planner with greedy join ordering
    #[default]
    Gen4,
    /// Greedy join ordering only
    #[value(name = "gen4-greedy")]
    #[serde(rename = "gen4-greedy")]
    Gen4Greedy,
    /// Joins planned strictly in FROM-clause order
    #[value(name = "gen4-left2right")]
    #[serde(rename = "gen4-left2right")]
    Gen4Left2Right,
    /// Gen4, replanned with the legacy planner on failure
    #[value(name = "gen4-fallback")]
    #[serde(rename = "gen4-fallback")]
    Gen4WithFallback,
    /// Plans with both and compares results at execution time
    #[value(name = "gen4-compare-v3")]
    #[serde(rename = "gen4-compare-v3")]
    Gen4CompareV3,
}

impl PlannerVersion {
    pub fn name(&self) -> &'static str {
        match self {
            PlannerVersion::V3 => "V3",
            PlannerVersion::Gen4 => "Gen4",
            PlannerVersion::Gen4Greedy => "Gen4Greedy",
            PlannerVersion::Gen4Left2Right => "Gen4Left2Right",
            PlannerVersion::Gen4WithFallback => "Gen4WithFallback",
            PlannerVersion::Gen4CompareV3 => "Gen4CompareV3",
        }
    }

    /// Whether planning needs the legacy planner.
    pub fn uses_legacy(&self) -> bool {
        matches!(
            self,
            PlannerVersion::V3 | PlannerVersion::Gen4WithFallback | PlannerVersion::Gen4CompareV3
        )
    }
}

impl std::fmt::Display for PlannerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts both the CLI spellings and the query directive spellings,
/// e.g. `gen4-left2right`, `Gen4Left2Right` and `left2right`.
impl FromStr for PlannerVersion {
    type Err = RouteplanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "v3" => Ok(PlannerVersion::V3),
            "gen4" => Ok(PlannerVersion::Gen4),
            "gen4greedy" | "greedy" => Ok(PlannerVersion::Gen4Greedy),
            "gen4left2right" | "left2right" => Ok(PlannerVersion::Gen4Left2Right),
            "gen4withfallback" | "gen4fallback" => Ok(PlannerVersion::Gen4WithFallback),
            "gen4comparev3" => Ok(PlannerVersion::Gen4CompareV3),
            _ => Err(RouteplanError::Config(format!("unknown planner version '{}'", s))),
        }
    }
}

/// Plan description output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExplainFormat {
    #[default]
    Text,
    Json,
}

/// Planner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Planner used when the query carries no directive
    pub planner_version: PlannerVersion,

    /// Keyspace used for unqualified table names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_keyspace: Option<String>,

    /// VSchema file (TOML or JSON)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vschema_path: Option<PathBuf>,

    /// Output format of plan descriptions
    pub explain_format: ExplainFormat,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            planner_version: PlannerVersion::Gen4,
            default_keyspace: None,
            vschema_path: None,
            explain_format: ExplainFormat::Text,
        }
    }
}

impl PlannerConfig {
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Self, RouteplanError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| RouteplanError::Config(e.to_string()))
    }

    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), RouteplanError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
