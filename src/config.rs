use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dotenvy::dotenv;

pub const DEFAULT_RULES_URL: &str = "https://rules2.clearurls.xyz/data.minify.json";
pub const DEFAULT_RULES_HASH_URL: &str = "https://rules2.clearurls.xyz/rules.minify.hash";

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub server_addr: String,
    pub rules_url: String,
    pub rules_hash_url: String,
    pub refresh_interval: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub log_dir: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:clear_urls.db?mode=rwc".to_string());
        let server_addr = env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
        let rules_url = env::var("RULES_URL").unwrap_or_else(|_| DEFAULT_RULES_URL.to_string());
        let rules_hash_url = env::var("RULES_HASH_URL").unwrap_or_else(|_| DEFAULT_RULES_HASH_URL.to_string());
        let refresh_secs: u64 = parse_var("RULES_REFRESH_SECS", 86400)?;
        let retry_attempts: u32 = parse_var("RULES_RETRY_ATTEMPTS", 3)?;
        let retry_delay_secs: u64 = parse_var("RULES_RETRY_DELAY_SECS", 5)?;
        let log_dir = env::var("LOG_DIR").ok().filter(|s| !s.trim().is_empty());

        Ok(Self {
            database_url,
            server_addr,
            rules_url,
            rules_hash_url,
            refresh_interval: Duration::from_secs(refresh_secs),
            retry_attempts,
            retry_delay: Duration::from_secs(retry_delay_secs),
            log_dir,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval.is_zero() {
            bail!("RULES_REFRESH_SECS must be greater than zero");
        }
        self.server_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("SERVER_ADDR is not a socket address: {}", self.server_addr))?;
        for (name, value) in [("RULES_URL", &self.rules_url), ("RULES_HASH_URL", &self.rules_hash_url)] {
            url::Url::parse(value).with_context(|| format!("{name} is not a valid URL: {value}"))?;
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}
