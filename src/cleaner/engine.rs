//! Interpreter for provider rulesets: redirection capture, per-parameter
//! removal and raw full-URL rewrites.

use std::collections::HashSet;

use percent_encoding::percent_decode_str;
use tracing::debug;
use url::Url;

use super::query;
use crate::models::{CleanError, CleanResult, CleaningOptions};
use crate::ruleset::{Provider, Ruleset};

pub fn apply(input: &str, ruleset: Option<&Ruleset>, options: &CleaningOptions) -> CleanResult {
    let Some(ruleset) = ruleset else {
        return CleanResult::failed(input, CleanError::RulesUnavailable);
    };
    let Ok(mut url) = Url::parse(input.trim()) else {
        return CleanResult::failed(input, CleanError::InvalidUrl);
    };

    let unwrapped_from = follow_redirections(&mut url, ruleset);
    let stripped = strip_parameters(&mut url, ruleset, options);

    CleanResult {
        url: query::serialize(url),
        changed: unwrapped_from.is_some() || stripped,
        unwrapped_from,
        error: None,
    }
}

/// One forward sweep over the providers. A provider is judged once against
/// the URL as it stands when reached; later redirections of the same provider
/// see the updated URL. Returns the first provider that redirected.
fn follow_redirections(url: &mut Url, ruleset: &Ruleset) -> Option<String> {
    let mut unwrapped_from = None;

    for provider in ruleset.providers() {
        if !provider.applies_to(url.as_str()) {
            continue;
        }
        for redirection in &provider.redirections {
            let current = url.to_string();
            let Some(target) = redirection.captures(&current).and_then(|caps| caps.get(1)) else {
                continue;
            };
            let decoded = decode_target(target.as_str());
            match Url::parse(&decoded) {
                Ok(next) if next.as_str() != current => {
                    debug!(provider = %provider.name, target = %next, "Followed redirection");
                    *url = next;
                    unwrapped_from.get_or_insert_with(|| provider.name.clone());
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(provider = %provider.name, %err, "Redirection target does not parse");
                }
            }
        }
    }

    unwrapped_from
}

fn decode_target(raw: &str) -> String {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

fn strip_parameters(url: &mut Url, ruleset: &Ruleset, options: &CleaningOptions) -> bool {
    let keep = options.keep_set();
    let extra = options.extra_bad_set();
    let mut changed = false;

    if !extra.is_empty() {
        let remove = |key: &str| {
            let folded = key.to_lowercase();
            !keep.contains(&folded) && extra.contains(&folded)
        };
        changed |= query::strip_query(url, remove) + query::strip_fragment(url, remove) > 0;
    }

    for provider in ruleset.providers() {
        if !provider.applies_to(url.as_str()) {
            continue;
        }

        let remove = |key: &str| provider_removes(provider, key, &keep, options.allow_referral);
        let removed = query::strip_query(url, remove) + query::strip_fragment(url, remove);
        if removed > 0 {
            debug!(provider = %provider.name, removed, "Removed parameters");
            changed = true;
        }

        changed |= apply_raw_rules(url, provider, &keep);
    }

    changed
}

fn provider_removes(provider: &Provider, key: &str, keep: &HashSet<String>, allow_referral: bool) -> bool {
    let folded = key.to_lowercase();
    if keep.contains(&folded) {
        return false;
    }
    provider.rules.iter().any(|m| m.matches(key, &folded))
        || (!allow_referral && provider.referral_marketing.iter().any(|m| m.matches(key, &folded)))
}

/// Each substitution must leave a parseable URL that still carries every kept
/// parameter, otherwise it is discarded.
fn apply_raw_rules(url: &mut Url, provider: &Provider, keep: &HashSet<String>) -> bool {
    let mut changed = false;

    for raw in &provider.raw_rules {
        let current = url.to_string();
        let replaced = raw.replace_all(&current, "");
        if replaced == current {
            continue;
        }

        let kept_before: Vec<String> = query::query_names(url)
            .into_iter()
            .filter(|n| keep.contains(n))
            .collect();

        match Url::parse(&replaced) {
            Ok(next) => {
                let names_after = query::query_names(&next);
                if kept_before.iter().all(|n| names_after.contains(n)) {
                    *url = next;
                    changed = true;
                } else {
                    debug!(provider = %provider.name, "Raw rule would drop a kept parameter");
                }
            }
            Err(err) => {
                debug!(provider = %provider.name, %err, "Raw rule produced an invalid URL");
            }
        }
    }

    changed
}
