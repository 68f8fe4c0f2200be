//! Blocklist cleaner: static tracking/referral lists, the `utm_` prefix rule
//! and three built-in redirector unwraps.

use std::collections::HashSet;

use tracing::debug;
use url::Url;

use super::query;
use crate::models::{CleanError, CleanResult, CleaningOptions};

pub const TRACKING_PARAMS: &[&str] = &[
    // Google / analytics
    "gclid", "gclsrc", "dclid", "gbraid", "wbraid", "_ga", "_gl", "gad_source",
    "srsltid",
    // Facebook / Instagram
    "fbclid", "igshid", "igsh", "fb_action_ids", "fb_action_types", "fb_source",
    // Microsoft, Yandex, Twitter, TikTok
    "msclkid", "yclid", "twclid", "ttclid",
    // Mailchimp, HubSpot, Marketo, Vero
    "mc_cid", "mc_eid", "_hsenc", "_hsmi", "__hstc", "__hssc", "__hsfp",
    "hsctatracking", "mkt_tok", "vero_id", "vero_conv",
    // Adobe, Olytics, misc
    "s_kwcid", "ef_id", "oly_anon_id", "oly_enc_id", "wickedid", "rb_clickid",
    "spm", "scm", "trk", "trkcampaign", "sc_campaign", "sc_channel",
];

pub const REFERRAL_PARAMS: &[&str] = &[
    "ref", "ref_", "ref_src", "ref_url", "referer", "referrer", "refid", "affid",
    "aff_id", "affiliate", "affiliate_id", "partner", "partner_id", "tag",
    "ascsubtag", "clickref", "irclickid", "ranmid", "raneaid", "ransiteid",
];

const TRACKING_PREFIX: &str = "utm_";

/// A built-in link wrapper whose real destination rides in a query parameter.
#[derive(Debug, Clone, Copy)]
pub struct RedirectorRule {
    pub provider: &'static str,
    /// Matches the host exactly or as a `.`-delimited suffix.
    pub host: &'static str,
    pub path: &'static str,
    /// Tried in order; the first non-empty one wins.
    pub target_params: &'static [&'static str],
}

/// Checked in this order; first structural match wins.
pub const REDIRECTORS: [RedirectorRule; 3] = [
    RedirectorRule {
        provider: "google",
        host: "google.com",
        path: "/url",
        target_params: &["q", "url"],
    },
    RedirectorRule {
        provider: "facebook",
        host: "l.facebook.com",
        path: "/l.php",
        target_params: &["u"],
    },
    RedirectorRule {
        provider: "instagram",
        host: "l.instagram.com",
        path: "/",
        target_params: &["u"],
    },
];

impl RedirectorRule {
    fn host_matches(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        host == self.host
            || host
                .strip_suffix(self.host)
                .is_some_and(|rest| rest.ends_with('.'))
    }

    /// The embedded destination, if `url` is one of ours.
    pub fn target(&self, url: &Url) -> Option<String> {
        if !self.host_matches(url.host_str()?) || url.path() != self.path {
            return None;
        }
        self.target_params.iter().find_map(|name| {
            url.query_pairs()
                .find(|(k, v)| k.as_ref() == *name && !v.is_empty())
                .map(|(_, v)| v.into_owned())
        })
    }
}

/// Single hop: the first matching redirector only, never re-applied.
fn unwrap_once(url: &Url) -> Option<(Url, &'static str)> {
    let (raw, provider) = REDIRECTORS
        .iter()
        .find_map(|rule| rule.target(url).map(|t| (t, rule.provider)))?;
    match Url::parse(raw.trim()) {
        Ok(target) => Some((target, provider)),
        Err(err) => {
            debug!(provider, %err, "Redirect target does not parse, keeping wrapper");
            None
        }
    }
}

struct Blocklist {
    keep: HashSet<String>,
    remove: HashSet<String>,
}

impl Blocklist {
    fn new(options: &CleaningOptions) -> Self {
        let keep = options.keep_set();
        let mut remove: HashSet<String> = TRACKING_PARAMS.iter().map(|s| s.to_string()).collect();
        if options.remove_referral {
            remove.extend(REFERRAL_PARAMS.iter().map(|s| s.to_string()));
        }
        remove.extend(options.extra_bad_set());
        remove.retain(|name| !keep.contains(name));
        Self { keep, remove }
    }

    fn should_remove(&self, name: &str) -> bool {
        let folded = name.to_lowercase();
        if self.keep.contains(&folded) {
            return false;
        }
        folded.starts_with(TRACKING_PREFIX) || self.remove.contains(&folded)
    }
}

pub fn clean(input: &str, options: &CleaningOptions) -> CleanResult {
    let trimmed = input.trim();
    let Ok(parsed) = Url::parse(trimmed) else {
        return CleanResult::failed(input, CleanError::InvalidUrl);
    };

    let (mut url, unwrapped_from) = match unwrap_once(&parsed) {
        Some((target, provider)) => (target, Some(provider.to_string())),
        None => (parsed, None),
    };

    let blocklist = Blocklist::new(options);
    let removed = query::strip_query(&mut url, |k| blocklist.should_remove(k))
        + query::strip_fragment(&mut url, |k| blocklist.should_remove(k));

    if removed > 0 {
        debug!(removed, "Stripped tracking parameters");
    }

    CleanResult {
        url: query::serialize(url),
        changed: unwrapped_from.is_some() || removed > 0,
        unwrapped_from,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocklists_are_disjoint() {
        for name in REFERRAL_PARAMS {
            assert!(!TRACKING_PARAMS.contains(name), "{name} listed twice");
        }
    }

    #[test]
    fn redirector_host_suffix_requires_label_boundary() {
        let rule = REDIRECTORS[0];
        assert!(rule.host_matches("www.google.com"));
        assert!(rule.host_matches("google.com"));
        assert!(!rule.host_matches("notgoogle.com"));
    }

    #[test]
    fn google_falls_back_to_url_param() {
        let url = Url::parse("https://www.google.com/url?sa=t&url=https%3A%2F%2Fexample.org%2F").unwrap();
        assert_eq!(REDIRECTORS[0].target(&url).as_deref(), Some("https://example.org/"));
    }

    #[test]
    fn wrong_path_is_not_a_redirect() {
        let url = Url::parse("https://www.google.com/search?q=https://example.org").unwrap();
        assert!(unwrap_once(&url).is_none());
    }

    #[test]
    fn keep_overrides_prefix_rule() {
        let opts = CleaningOptions {
            keep_params: vec!["utm_campaign".into()],
            ..Default::default()
        };
        let list = Blocklist::new(&opts);
        assert!(!list.should_remove("UTM_Campaign"));
        assert!(list.should_remove("utm_source"));
    }

    #[test]
    fn extra_bad_params_are_removed() {
        let opts = CleaningOptions {
            extra_bad_params: vec!["Session".into()],
            ..Default::default()
        };
        assert!(Blocklist::new(&opts).should_remove("session"));
    }
}
