//! Fetches, verifies, persists and publishes ruleset snapshots.
//!
//! The cleaners never see this type; they receive the `Arc<Ruleset>` handed
//! out by [`RuleStore::snapshot`].

use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Db;
use crate::logging::Timer;
use crate::ruleset::Ruleset;

/// Hex SHA-256 of `body` equals the first token of `expected`, ignoring case.
pub fn verify_digest(body: &str, expected: &str) -> bool {
    let Some(expected) = expected.split_whitespace().next() else {
        return false;
    };
    let actual = hex::encode(Sha256::digest(body.as_bytes()));
    actual.eq_ignore_ascii_case(expected)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RuleStatus {
    pub loaded: bool,
    pub provider_count: usize,
    pub hash: Option<String>,
    pub fetched_at: Option<i64>,
}

#[derive(Clone)]
struct Snapshot {
    ruleset: Arc<Ruleset>,
    hash: String,
    fetched_at: i64,
}

#[derive(Clone)]
pub struct RuleStore {
    current: Arc<RwLock<Option<Snapshot>>>,
    db: Db,
    client: reqwest::Client,
    rules_url: String,
    hash_url: String,
}

impl RuleStore {
    pub fn new(db: Db, config: &Config) -> Self {
        Self {
            current: Arc::new(RwLock::new(None)),
            db,
            client: reqwest::Client::new(),
            rules_url: config.rules_url.clone(),
            hash_url: config.rules_hash_url.clone(),
        }
    }

    /// The active ruleset, if any has been installed.
    pub fn snapshot(&self) -> Option<Arc<Ruleset>> {
        self.read().map(|s| s.ruleset)
    }

    pub fn status(&self) -> RuleStatus {
        match self.read() {
            Some(s) => RuleStatus {
                loaded: true,
                provider_count: s.ruleset.provider_count(),
                hash: Some(s.hash),
                fetched_at: Some(s.fetched_at),
            },
            None => RuleStatus::default(),
        }
    }

    fn read(&self) -> Option<Snapshot> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn publish(&self, snapshot: Snapshot) {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(snapshot);
    }

    /// Restores the last persisted ruleset. Returns whether one was installed.
    pub async fn load_cached(&self) -> Result<bool> {
        let Some(stored) = self.db.load_ruleset().await? else {
            info!("No cached ruleset");
            return Ok(false);
        };
        if !verify_digest(&stored.body, &stored.hash) {
            warn!("Cached ruleset fails its digest check, ignoring it");
            return Ok(false);
        }
        let ruleset = Ruleset::from_json(&stored.body).context("Cached ruleset does not parse")?;
        info!(providers = ruleset.provider_count(), "Restored cached ruleset");
        self.publish(Snapshot {
            ruleset: Arc::new(ruleset),
            hash: stored.hash,
            fetched_at: stored.fetched_at,
        });
        Ok(true)
    }

    /// Verifies, parses and persists `body`, then swaps it in. On any failure
    /// the previous snapshot stays active.
    pub async fn install(&self, body: &str, expected_hash: &str) -> Result<Arc<Ruleset>> {
        if !verify_digest(body, expected_hash) {
            bail!("Ruleset digest mismatch");
        }
        let ruleset = Arc::new(Ruleset::from_json(body).context("Failed to parse ruleset JSON")?);
        let hash = expected_hash
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let fetched_at = time::OffsetDateTime::now_utc().unix_timestamp();

        self.db.save_ruleset(body, &hash, fetched_at).await?;
        self.publish(Snapshot {
            ruleset: ruleset.clone(),
            hash,
            fetched_at,
        });

        info!("Loaded {} providers", ruleset.provider_count());
        Ok(ruleset)
    }

    pub async fn refresh(&self) -> Result<Arc<Ruleset>> {
        let _timer = Timer::new("rules_refresh");
        info!("Fetching rules from {}", self.rules_url);

        let (body, hash) = tokio::try_join!(self.fetch_text(&self.rules_url), self.fetch_text(&self.hash_url))?;
        self.install(&body, &hash).await
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;
        if !resp.status().is_success() {
            return Err(anyhow!("{url} returned {}", resp.status()));
        }
        Ok(resp.text().await?)
    }

    /// `refresh` with up to `attempts` retries, doubling the delay each time.
    pub async fn refresh_with_retry(&self, attempts: u32, delay: Duration) -> Result<Arc<Ruleset>> {
        let mut wait = delay;
        let mut attempt = 0;
        loop {
            match self.refresh().await {
                Ok(ruleset) => return Ok(ruleset),
                Err(e) if attempt < attempts => {
                    attempt += 1;
                    warn!("Rule refresh failed, retrying ({}/{}): {:#}", attempt, attempts, e);
                    tokio::time::sleep(wait).await;
                    wait = wait.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
