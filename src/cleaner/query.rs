//! Query and fragment rewriting shared by both cleaners.
//!
//! Pairs are kept as their original serialized text so values survive
//! untouched; only the decoded key is used for matching. An empty query or
//! fragment is dropped together with its `?` / `#`.

use url::{form_urlencoded, Url};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// The `key=value` segment exactly as it appeared.
    pub raw: String,
    /// Percent/plus-decoded key.
    pub name: String,
}

pub fn parse_params(raw: &str) -> Vec<Param> {
    raw.split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let name = form_urlencoded::parse(segment.as_bytes())
                .next()
                .map(|(k, _)| k.into_owned())
                .unwrap_or_default();
            Param {
                raw: segment.to_string(),
                name,
            }
        })
        .collect()
}

/// `None` when nothing is left, so the caller drops the separator too.
pub fn join_params(params: &[Param]) -> Option<String> {
    if params.is_empty() {
        return None;
    }
    Some(
        params
            .iter()
            .map(|p| p.raw.as_str())
            .collect::<Vec<_>>()
            .join("&"),
    )
}

/// Drops every pair whose decoded key satisfies `remove`.
/// Returns the rebuilt text (if anything was removed) and the removal count.
pub fn filter_params(raw: &str, mut remove: impl FnMut(&str) -> bool) -> (Option<String>, usize) {
    let params = parse_params(raw);
    let before = params.len();
    let kept: Vec<Param> = params.into_iter().filter(|p| !remove(&p.name)).collect();
    let removed = before - kept.len();
    (join_params(&kept), removed)
}

pub fn strip_query(url: &mut Url, remove: impl FnMut(&str) -> bool) -> usize {
    let Some(raw) = url.query().map(str::to_string) else {
        return 0;
    };
    let (rebuilt, removed) = filter_params(&raw, remove);
    if removed > 0 {
        url.set_query(rebuilt.as_deref());
    }
    removed
}

/// Fragments are only treated as parameter lists when they contain `=`.
pub fn strip_fragment(url: &mut Url, remove: impl FnMut(&str) -> bool) -> usize {
    let Some(raw) = url.fragment().map(str::to_string) else {
        return 0;
    };
    if !raw.contains('=') {
        return 0;
    }
    let (rebuilt, removed) = filter_params(&raw, remove);
    if removed > 0 {
        url.set_fragment(rebuilt.as_deref());
    }
    removed
}

/// Canonical form: no dangling `?` or `#`.
pub fn normalize(url: &mut Url) {
    if url.query() == Some("") {
        url.set_query(None);
    }
    if url.fragment() == Some("") {
        url.set_fragment(None);
    }
}

pub fn serialize(mut url: Url) -> String {
    normalize(&mut url);
    url.into()
}

/// Case-folded names of every query parameter.
pub fn query_names(url: &Url) -> Vec<String> {
    url.query()
        .map(|q| parse_params(q).into_iter().map(|p| p.name.to_lowercase()).collect())
        .unwrap_or_default()
}

/// Splits raw input text at its first `#`.
pub fn split_fragment(input: &str) -> (&str, Option<&str>) {
    match input.split_once('#') {
        Some((head, frag)) => (head, Some(frag)),
        None => (input, None),
    }
}
