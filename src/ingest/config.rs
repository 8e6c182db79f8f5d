// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::ingest::types::{FeedDescriptor, SourceDescriptor};

const ENV_PATH: &str = "FEEDS_CONFIG_PATH";

/// Registry handle shared by the HTTP API (which reloads it) and the scheduler.
pub type SharedFeeds = Arc<RwLock<FeedRegistry>>;

/// Configured feeds, addressable by route slug.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRegistry {
    feeds: Vec<FeedDescriptor>,
}

impl FeedRegistry {
    pub fn new(feeds: Vec<FeedDescriptor>) -> Self {
        Self {
            feeds: clean_list(feeds),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FeedDescriptor> {
        let key = name.trim();
        self.feeds.iter().find(|f| f.name.eq_ignore_ascii_case(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeedDescriptor> {
        self.feeds.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.feeds.iter().map(|f| f.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    pub fn into_shared(self) -> SharedFeeds {
        Arc::new(RwLock::new(self))
    }

    /// Built-in fallback: the CoinDesk outbound RSS feed.
    pub fn default_seed() -> Self {
        Self::new(vec![FeedDescriptor {
            name: "coindesk".to_string(),
            feed_url: "https://www.coindesk.com/arc/outboundfeeds/rss/".to_string(),
            source: SourceDescriptor {
                name: "CoinDesk".to_string(),
                url: "https://www.coindesk.com".to_string(),
                weight: 1.0,
            },
        }])
    }
}

/// Load feeds from an explicit path. Supports TOML or JSON formats.
pub fn load_feeds_from(path: &Path) -> Result<FeedRegistry> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading feeds from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let feeds = parse_feeds(&content, ext.as_str())?;
    Ok(FeedRegistry::new(feeds))
}

/// Load feeds using env var + fallbacks:
/// 1) $FEEDS_CONFIG_PATH
/// 2) config/feeds.toml
/// 3) config/feeds.json
/// 4) built-in seed
pub fn load_feeds_default() -> Result<FeedRegistry> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_feeds_from(&pb);
        } else {
            return Err(anyhow!("FEEDS_CONFIG_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/feeds.toml");
    if toml_p.exists() {
        return load_feeds_from(&toml_p);
    }
    let json_p = PathBuf::from("config/feeds.json");
    if json_p.exists() {
        return load_feeds_from(&json_p);
    }
    Ok(FeedRegistry::default_seed())
}

#[derive(Deserialize)]
struct FeedsDoc {
    feeds: Vec<FeedDescriptor>,
}

fn parse_feeds(s: &str, hint_ext: &str) -> Result<Vec<FeedDescriptor>> {
    // Try TOML first if hinted or content looks like toml.
    let try_toml = hint_ext == "toml" || s.contains("[[feeds]]");
    if try_toml {
        if let Ok(v) = toml::from_str::<FeedsDoc>(s) {
            return Ok(v.feeds);
        }
    }
    // JSON: {"feeds": [...]} or a bare array
    if let Ok(v) = serde_json::from_str::<FeedsDoc>(s) {
        return Ok(v.feeds);
    }
    if let Ok(v) = serde_json::from_str::<Vec<FeedDescriptor>>(s) {
        return Ok(v);
    }
    // Fallback: also try TOML if not attempted
    if !try_toml {
        if let Ok(v) = toml::from_str::<FeedsDoc>(s) {
            return Ok(v.feeds);
        }
    }
    Err(anyhow!("unsupported feeds config format"))
}

/// Trim + lowercase slugs, drop blanks, keep the first occurrence of each name.
fn clean_list(items: Vec<FeedDescriptor>) -> Vec<FeedDescriptor> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for mut it in items {
        let name = it.name.trim().to_ascii_lowercase();
        if name.is_empty() || it.feed_url.trim().is_empty() || !seen.insert(name.clone()) {
            continue;
        }
        it.name = name;
        it.feed_url = it.feed_url.trim().to_string();
        out.push(it);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    const TOML: &str = r#"
[[feeds]]
name = " CoinDesk "
feed_url = "https://www.coindesk.com/arc/outboundfeeds/rss/"
source = { name = "CoinDesk", url = "https://www.coindesk.com" }

[[feeds]]
name = "coindesk"
feed_url = "https://dup.example/rss"
source = { name = "Dup", url = "https://dup.example" }

[[feeds]]
name = "decrypt"
feed_url = "https://decrypt.co/feed"
source = { name = "Decrypt", url = "https://decrypt.co", weight = 0.7 }
"#;

    #[test]
    fn toml_dedup_trim_and_defaults() {
        let reg = FeedRegistry::new(parse_feeds(TOML, "toml").unwrap());
        assert_eq!(reg.names(), vec!["coindesk".to_string(), "decrypt".to_string()]);
        let cd = reg.get("CoinDesk").unwrap();
        assert_eq!(cd.source.name, "CoinDesk");
        assert!((cd.source.weight - 1.0).abs() < f64::EPSILON);
        assert!((reg.get("decrypt").unwrap().source.weight - 0.7).abs() < 1e-9);
    }

    #[test]
    fn json_object_and_array_forms() {
        let obj = r#"{"feeds":[{"name":"a","feed_url":"https://a/rss","source":{"name":"A","url":"https://a"}}]}"#;
        let arr = r#"[{"name":"b","feed_url":"https://b/rss","source":{"name":"B","url":"https://b"}}]"#;
        assert_eq!(parse_feeds(obj, "json").unwrap()[0].name, "a");
        assert_eq!(parse_feeds(arr, "json").unwrap()[0].name, "b");
        assert!(parse_feeds("garbage", "").is_err());
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        // Isolate CWD so the repo's own config/ is not picked up
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();

        env::remove_var(ENV_PATH);

        // No files → built-in seed
        let v = load_feeds_default().unwrap();
        assert_eq!(v, FeedRegistry::default_seed());

        // Env wins
        let p_toml = tmp.path().join("feeds.toml");
        fs::write(&p_toml, TOML).unwrap();
        env::set_var(ENV_PATH, p_toml.display().to_string());
        let v2 = load_feeds_default().unwrap();
        assert_eq!(v2.len(), 2);

        env::set_var(ENV_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(load_feeds_default().is_err());
        env::remove_var(ENV_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
