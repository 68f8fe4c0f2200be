use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{CleanedLink, StoredOptions};

/// A persisted ruleset blob together with its verified digest.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StoredRuleset {
    pub body: String,
    pub hash: String,
    pub fetched_at: i64,
}

#[derive(Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    pub async fn new(database_url: &str) -> Result<Self> {
        // An in-memory database is per-connection, so keep a single one.
        let in_memory = database_url.contains(":memory:");

        let mut options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            options = options.idle_timeout(None).max_lifetime(None);
        }
        let pool = options.connect(database_url).await?;

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rulesets (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                body TEXT NOT NULL,
                hash TEXT NOT NULL,
                fetched_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS options (
                profile TEXT PRIMARY KEY,
                remove_referral INTEGER NOT NULL DEFAULT 1,
                clean_hash INTEGER NOT NULL DEFAULT 1,
                keep_params TEXT NOT NULL DEFAULT '',
                extra_bad_params TEXT NOT NULL DEFAULT ''
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cleaned_links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                original_url TEXT NOT NULL,
                cleaned_url TEXT NOT NULL,
                strategy TEXT NOT NULL,
                provider_name TEXT,
                timestamp INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn save_ruleset(&self, body: &str, hash: &str, fetched_at: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO rulesets (id, body, hash, fetched_at) VALUES (1, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET body = excluded.body, hash = excluded.hash, fetched_at = excluded.fetched_at",
        )
        .bind(body)
        .bind(hash)
        .bind(fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_ruleset(&self) -> Result<Option<StoredRuleset>> {
        let stored = sqlx::query_as::<_, StoredRuleset>(
            "SELECT body, hash, fetched_at FROM rulesets WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(stored)
    }

    pub async fn get_options(&self, profile: &str) -> Result<StoredOptions> {
        let options = sqlx::query_as::<_, StoredOptions>("SELECT * FROM options WHERE profile = ?")
            .bind(profile)
            .fetch_optional(&self.pool)
            .await?;

        Ok(options.unwrap_or_else(|| StoredOptions::defaults_for(profile)))
    }

    pub async fn save_options(&self, options: &StoredOptions) -> Result<()> {
        sqlx::query(
            "INSERT INTO options (profile, remove_referral, clean_hash, keep_params, extra_bad_params) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(profile) DO UPDATE SET remove_referral = excluded.remove_referral, clean_hash = excluded.clean_hash,
             keep_params = excluded.keep_params, extra_bad_params = excluded.extra_bad_params",
        )
        .bind(&options.profile)
        .bind(options.remove_referral)
        .bind(options.clean_hash)
        .bind(&options.keep_params)
        .bind(&options.extra_bad_params)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn log_cleaned_link(
        &self,
        original: &str,
        cleaned: &str,
        strategy: &str,
        provider: Option<&str>,
    ) -> Result<()> {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();

        sqlx::query(
            "INSERT INTO cleaned_links (original_url, cleaned_url, strategy, provider_name, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(original)
        .bind(cleaned)
        .bind(strategy)
        .bind(provider)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_history(&self, limit: i64) -> Result<Vec<CleanedLink>> {
        let history = sqlx::query_as::<_, CleanedLink>(
            "SELECT id, original_url, cleaned_url, strategy, provider_name, timestamp
             FROM cleaned_links ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn options_default_when_absent() {
        let db = Db::new("sqlite::memory:").await.unwrap();
        let opts = db.get_options("default").await.unwrap();
        assert!(opts.remove_referral);
        assert!(opts.clean_hash);
        assert_eq!(opts.keep_params, "");
    }

    #[tokio::test]
    async fn options_round_trip_through_upsert() {
        let db = Db::new("sqlite::memory:").await.unwrap();
        let mut opts = StoredOptions::defaults_for("work");
        opts.remove_referral = false;
        opts.keep_params = "ref,tag".into();
        db.save_options(&opts).await.unwrap();
        opts.clean_hash = false;
        db.save_options(&opts).await.unwrap();
        assert_eq!(db.get_options("work").await.unwrap(), opts);
    }

    #[tokio::test]
    async fn ruleset_row_is_replaced() {
        let db = Db::new("sqlite::memory:").await.unwrap();
        assert!(db.load_ruleset().await.unwrap().is_none());
        db.save_ruleset("{}", "aa", 1).await.unwrap();
        db.save_ruleset("{\"providers\":{}}", "bb", 2).await.unwrap();
        let stored = db.load_ruleset().await.unwrap().unwrap();
        assert_eq!(stored.hash, "bb");
        assert_eq!(stored.fetched_at, 2);
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let db = Db::new("sqlite::memory:").await.unwrap();
        db.log_cleaned_link("a", "b", "heuristic", None).await.unwrap();
        db.log_cleaned_link("c", "d", "rules", Some("google")).await.unwrap();
        let history = db.get_history(10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].original_url, "c");
        assert_eq!(history[0].provider_name.as_deref(), Some("google"));
    }
}
