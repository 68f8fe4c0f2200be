use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a cleaning call could not produce a rewritten URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CleanError {
    #[error("input is not an absolute URL")]
    #[serde(rename = "InvalidURL")]
    InvalidUrl,
    #[error("ruleset is absent or malformed")]
    RulesUnavailable,
}

/// Per-call knobs shared by both cleaners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CleaningOptions {
    pub keep_params: Vec<String>,
    pub extra_bad_params: Vec<String>,
    pub remove_referral: bool,
    pub allow_referral: bool,
    pub clean_hash: bool,
}

impl Default for CleaningOptions {
    fn default() -> Self {
        Self {
            keep_params: Vec::new(),
            extra_bad_params: Vec::new(),
            remove_referral: true,
            allow_referral: false,
            clean_hash: true,
        }
    }
}

impl CleaningOptions {
    pub fn keep_set(&self) -> HashSet<String> {
        fold_all(&self.keep_params)
    }

    pub fn extra_bad_set(&self) -> HashSet<String> {
        fold_all(&self.extra_bad_params)
    }
}

fn fold_all(names: &[String]) -> HashSet<String> {
    names
        .iter()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanResult {
    pub url: String,
    pub changed: bool,
    pub unwrapped_from: Option<String>,
    pub error: Option<CleanError>,
}

impl CleanResult {
    /// The original input, untouched, tagged with `error`.
    pub fn failed(input: &str, error: CleanError) -> Self {
        Self {
            url: input.to_string(),
            changed: false,
            unwrapped_from: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Heuristic,
    Rules,
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heuristic" | "simple" => Ok(Strategy::Heuristic),
            "rules" | "clearurls" => Ok(Strategy::Rules),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

/// Persisted popup preferences for one profile.
#[cfg(feature = "server")]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow)]
pub struct StoredOptions {
    pub profile: String,
    pub remove_referral: bool,
    pub clean_hash: bool,
    pub keep_params: String,      // Comma-separated list
    pub extra_bad_params: String, // Comma-separated list
}

#[cfg(feature = "server")]
impl StoredOptions {
    pub fn defaults_for(profile: &str) -> Self {
        Self {
            profile: profile.to_string(),
            remove_referral: true,
            clean_hash: true,
            keep_params: String::new(),
            extra_bad_params: String::new(),
        }
    }

    /// Fails when a parameter name would not survive the comma-separated column.
    pub fn from_options(profile: &str, options: &CleaningOptions) -> Result<Self, String> {
        Ok(Self {
            profile: profile.to_string(),
            remove_referral: options.remove_referral,
            clean_hash: options.clean_hash,
            keep_params: join_list(&options.keep_params)?,
            extra_bad_params: join_list(&options.extra_bad_params)?,
        })
    }

    pub fn to_options(&self) -> CleaningOptions {
        CleaningOptions {
            keep_params: split_list(&self.keep_params),
            extra_bad_params: split_list(&self.extra_bad_params),
            remove_referral: self.remove_referral,
            allow_referral: !self.remove_referral,
            clean_hash: self.clean_hash,
        }
    }
}

#[cfg(feature = "server")]
fn join_list(names: &[String]) -> Result<String, String> {
    if let Some(bad) = names.iter().find(|n| n.contains(',')) {
        return Err(format!("parameter name contains a comma: {bad}"));
    }
    Ok(names.join(","))
}

#[cfg(feature = "server")]
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(feature = "server")]
#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct CleanedLink {
    pub id: i64,
    pub original_url: String,
    pub cleaned_url: String,
    pub strategy: String,
    pub provider_name: Option<String>,
    pub timestamp: i64,
}
