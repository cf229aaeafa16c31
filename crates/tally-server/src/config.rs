use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};
use tally_engine::CrawlerConfig;
use tally_engine::crawler::DEFAULT_PAGE_SIZE;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub source_url: String,
    pub source_token: Option<String>,
    pub crawler: CrawlerConfig,
    pub crawler_enabled: bool,
    pub event_queue: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let db_path = get("TALLY_DB_PATH").unwrap_or_else(|| "tally.db".into());
        let host = get("TALLY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse(&get, "TALLY_PORT", 3100)?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", host, port))?;

        let source_url = match get("TALLY_SOURCE_URL") {
            Some(url) if !url.trim().is_empty() => url.trim().trim_end_matches('/').to_string(),
            _ => bail!("TALLY_SOURCE_URL is not set"),
        };
        let source_token = get("TALLY_SOURCE_TOKEN").filter(|t| !t.is_empty());

        let page_size: usize = parse(&get, "TALLY_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        if page_size == 0 {
            bail!("TALLY_PAGE_SIZE must be positive");
        }
        let interval = parse(&get, "TALLY_CRAWL_INTERVAL_SECS", 10)?;
        let idle_cooldown = parse(&get, "TALLY_IDLE_COOLDOWN_SECS", 600)?;

        Ok(Self {
            db_path: db_path.into(),
            addr,
            source_url,
            source_token,
            crawler: CrawlerConfig {
                page_size,
                interval: Duration::from_secs(interval),
                idle_cooldown: Duration::from_secs(idle_cooldown),
            },
            crawler_enabled: parse(&get, "TALLY_CRAWLER_ENABLED", true)?,
            event_queue: parse::<usize>(&get, "TALLY_EVENT_QUEUE", 1024)?.max(1),
        })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[("TALLY_SOURCE_URL", "http://source.local/")]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("tally.db"));
        assert_eq!(config.addr.port(), 3100);
        assert_eq!(config.source_url, "http://source.local");
        assert_eq!(config.source_token, None);
        assert_eq!(config.crawler.page_size, 1000);
        assert_eq!(config.crawler.interval, Duration::from_secs(10));
        assert_eq!(config.crawler.idle_cooldown, Duration::from_secs(600));
        assert!(config.crawler_enabled);
        assert_eq!(config.event_queue, 1024);
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("TALLY_SOURCE_URL", "http://source.local"),
            ("TALLY_SOURCE_TOKEN", "secret"),
            ("TALLY_PORT", "8080"),
            ("TALLY_PAGE_SIZE", "50"),
            ("TALLY_CRAWLER_ENABLED", "false"),
        ])
        .unwrap();
        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.source_token.as_deref(), Some("secret"));
        assert_eq!(config.crawler.page_size, 50);
        assert!(!config.crawler_enabled);
    }

    #[test]
    fn source_url_is_required() {
        assert!(config(&[]).is_err());
        assert!(config(&[("TALLY_SOURCE_URL", "  ")]).is_err());
    }

    #[test]
    fn bad_numbers_fail_startup() {
        let base = ("TALLY_SOURCE_URL", "http://source.local");
        assert!(config(&[base, ("TALLY_PORT", "http")]).is_err());
        assert!(config(&[base, ("TALLY_PAGE_SIZE", "0")]).is_err());
        assert!(config(&[base, ("TALLY_CRAWL_INTERVAL_SECS", "-1")]).is_err());
    }
}
