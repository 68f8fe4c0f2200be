//! URL cleaning core. Both strategies are pure: same input, options and
//! ruleset always give the same [`CleanResult`].

pub mod engine;
pub mod heuristic;
pub mod query;

pub use engine::apply;
pub use heuristic::clean;

use url::Url;

use crate::models::{CleanResult, CleaningOptions, Strategy};
use crate::ruleset::Ruleset;

/// Caller-side entry point. Honors `clean_hash` by detaching the fragment
/// before cleaning and re-attaching it afterwards. An empty fragment is dropped.
pub fn run(strategy: Strategy, input: &str, ruleset: Option<&Ruleset>, options: &CleaningOptions) -> CleanResult {
    let trimmed = input.trim();
    let (target, fragment) = if options.clean_hash {
        (trimmed, None)
    } else {
        query::split_fragment(trimmed)
    };

    let mut result = match strategy {
        Strategy::Heuristic => clean(target, options),
        Strategy::Rules => apply(target, ruleset, options),
    };

    if let Some(error) = result.error {
        return CleanResult::failed(input, error);
    }
    if let Some(fragment) = fragment.filter(|f| !f.is_empty()) {
        if let Ok(mut url) = Url::parse(&result.url) {
            // An unwrapped target may bring its own fragment.
            if url.fragment().is_none() {
                url.set_fragment(Some(fragment));
                result.url = query::serialize(url);
            }
        }
    }
    result
}
