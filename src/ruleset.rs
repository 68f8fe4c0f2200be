//! Compiled, immutable snapshot of a ClearURLs-style provider ruleset.

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::models::CleanError;

#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct RawProvider {
    #[serde(default)]
    urlPattern: String,
    #[serde(default)]
    rules: Vec<String>,
    #[serde(default)]
    exceptions: Vec<String>,
    #[serde(default)]
    rawRules: Vec<String>,
    #[serde(default)]
    redirections: Vec<String>,
    #[serde(default)]
    referralMarketing: Vec<String>,
}

/// A parameter-removal entry, classified once at load time.
#[derive(Debug, Clone)]
pub enum RuleMatcher {
    /// Case-folded parameter name.
    Literal(String),
    /// Case-insensitive pattern searched within the parameter key.
    Pattern(Regex),
}

const REGEX_META: &[char] = &['\\', '^', '$', '.', '|', '?', '*', '+', '(', ')', '[', ']', '{', '}'];

impl RuleMatcher {
    /// `None` when the entry is neither a plain name nor a valid regex.
    pub fn compile(entry: &str) -> Option<Self> {
        let is_literal = !entry.contains(REGEX_META) && !entry.contains('=') && !entry.contains("\\b");
        if is_literal {
            return Some(RuleMatcher::Literal(entry.to_lowercase()));
        }
        compile_ci(entry).map(RuleMatcher::Pattern)
    }

    /// `folded` is the lower-cased key; patterns are also tried against `key=`.
    pub fn matches(&self, key: &str, folded: &str) -> bool {
        match self {
            RuleMatcher::Literal(name) => name == folded,
            RuleMatcher::Pattern(re) => re.is_match(key) || re.is_match(&format!("{key}=")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Provider {
    pub name: String,
    pub url_pattern: Regex,
    pub exceptions: Vec<Regex>,
    pub redirections: Vec<Regex>,
    pub rules: Vec<RuleMatcher>,
    pub referral_marketing: Vec<RuleMatcher>,
    pub raw_rules: Vec<Regex>,
}

impl Provider {
    /// Pattern matches and no exception does.
    pub fn applies_to(&self, url: &str) -> bool {
        self.url_pattern.is_match(url) && !self.exceptions.iter().any(|e| e.is_match(url))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ruleset {
    providers: Vec<Provider>,
}

impl Ruleset {
    pub fn from_json(text: &str) -> Result<Self, CleanError> {
        let value: Value = serde_json::from_str(text).map_err(|err| {
            debug!(%err, "Ruleset is not valid JSON");
            CleanError::RulesUnavailable
        })?;
        Self::from_value(&value)
    }

    /// Requires an object with a `providers` object; keeps document order.
    pub fn from_value(value: &Value) -> Result<Self, CleanError> {
        let providers = value
            .get("providers")
            .and_then(Value::as_object)
            .ok_or(CleanError::RulesUnavailable)?;

        let mut compiled = Vec::with_capacity(providers.len());
        for (name, body) in providers {
            let raw: RawProvider = match RawProvider::deserialize(body) {
                Ok(raw) => raw,
                Err(err) => {
                    debug!(provider = %name, %err, "Skipping malformed provider");
                    continue;
                }
            };
            if let Some(provider) = compile_provider(name, raw) {
                compiled.push(provider);
            }
        }

        info!("Compiled {} providers", compiled.len());
        Ok(Self { providers: compiled })
    }

    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|p| p.name.as_str())
    }
}

fn compile_ci(pattern: &str) -> Option<Regex> {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(re) => Some(re),
        Err(err) => {
            debug!(pattern, %err, "Skipping invalid rule");
            None
        }
    }
}

fn compile_provider(name: &str, raw: RawProvider) -> Option<Provider> {
    if raw.urlPattern.is_empty() {
        return None;
    }
    let url_pattern = compile_ci(&raw.urlPattern)?;

    let compile_list = |list: &[String]| -> Vec<Regex> {
        list.iter().filter_map(|s| compile_ci(s)).collect()
    };
    let matcher_list = |list: &[String]| -> Vec<RuleMatcher> {
        list.iter().filter_map(|s| RuleMatcher::compile(s)).collect()
    };

    Some(Provider {
        name: name.to_string(),
        url_pattern,
        exceptions: compile_list(&raw.exceptions),
        redirections: compile_list(&raw.redirections),
        rules: matcher_list(&raw.rules),
        referral_marketing: matcher_list(&raw.referralMarketing),
        raw_rules: compile_list(&raw.rawRules),
    })
}
