//! Browser bindings for the popup. Every export takes and returns JSON text so
//! the JS side only deals with strings.

use clear_urls_service::{cleaner, CleanResult, CleaningOptions, Ruleset, Strategy};
use wasm_bindgen::prelude::*;

fn parse_options(options_json: &str) -> CleaningOptions {
    if options_json.trim().is_empty() {
        return CleaningOptions::default();
    }
    serde_json::from_str(options_json).unwrap_or_default()
}

fn to_json(result: &CleanResult) -> String {
    serde_json::to_string(result).unwrap_or_else(|_| String::from("{}"))
}

/// Heuristic cleaner; needs no ruleset.
#[wasm_bindgen]
pub fn clean_url(input_url: &str, options_json: &str) -> String {
    let options = parse_options(options_json);
    to_json(&cleaner::run(Strategy::Heuristic, input_url, None, &options))
}

/// Rule-engine cleaner over the cached ruleset text. An empty or malformed
/// ruleset yields `RulesUnavailable`.
#[wasm_bindgen]
pub fn apply_rules(input_url: &str, ruleset_json: &str, options_json: &str) -> String {
    let options = parse_options(options_json);
    let ruleset = Ruleset::from_json(ruleset_json).ok();
    to_json(&cleaner::run(Strategy::Rules, input_url, ruleset.as_ref(), &options))
}

/// Checks a ruleset blob before the extension persists it.
#[wasm_bindgen]
pub fn ruleset_provider_count(ruleset_json: &str) -> i32 {
    Ruleset::from_json(ruleset_json)
        .map(|ruleset| ruleset.provider_count() as i32)
        .unwrap_or(-1)
}
