//! BoardGameGeek-style XML catalog: search, detail fetch and match selection.

pub mod detail;
pub mod matcher;
pub mod search;
pub mod transport;
pub mod xml;

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use crate::database_ops::pacing::{Sleeper, TokioSleeper};
use crate::util::env::env_opt;

pub use detail::DetailImages;
pub use matcher::{pick_best_match, MatchOutcome};
pub use search::SearchFailed;
pub use transport::{HttpGet, ReqwestGet, RetryingTransport, DEFAULT_MAX_RETRIES};

const DEFAULT_BASE_URL: &str = "https://boardgamegeek.com/xmlapi2";
const DEFAULT_IMAGE_SOURCE: &str = "boardgamegeek";
const DEFAULT_USER_AGENT: &str = concat!("game-art/", env!("CARGO_PKG_VERSION"));
/// Upper bound on attempts per request read from the environment.
pub const MAX_RETRIES_CAP: u32 = 10;

/// One search hit, not yet confirmed as the right game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateMatch {
    pub external_id: i64,
    pub name: String,
    pub year_published: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Bearer token. `None` disables catalog resolution entirely.
    pub token: Option<String>,
    pub base_url: String,
    pub max_retries: u32,
    /// Provenance tag written to `image_source` on a successful resolution.
    pub image_source: String,
    pub user_agent: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            image_source: DEFAULT_IMAGE_SOURCE.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CatalogConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env_opt)
    }

    /// Build from any key lookup (blank values must already read as `None`).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            token: lookup("BGG_API_TOKEN")
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            base_url: lookup("BGG_BASE_URL")
                .map(|u| u.trim().trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            max_retries: lookup("BGG_MAX_RETRIES")
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(defaults.max_retries)
                .clamp(1, MAX_RETRIES_CAP),
            image_source: lookup("BGG_IMAGE_SOURCE").unwrap_or(defaults.image_source),
            user_agent: lookup("BGG_USER_AGENT").unwrap_or(defaults.user_agent),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }
}

/// Search and detail calls sharing one retrying transport.
pub struct CatalogClient {
    transport: RetryingTransport,
    base_url: String,
    max_retries: u32,
}

impl CatalogClient {
    pub fn new(config: &CatalogConfig, http: Arc<dyn HttpGet>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            transport: RetryingTransport::new(http, sleeper, config.token.clone()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        }
    }

    /// Production client over reqwest with real sleeps.
    pub fn from_config(config: &CatalogConfig) -> Result<Self> {
        let http = Arc::new(ReqwestGet::new(&config.user_agent)?);
        Ok(Self::new(config, http, Arc::new(TokioSleeper)))
    }

    pub fn search_url(&self, normalized_query: &str) -> String {
        format!(
            "{}/search?type=boardgame&query={}",
            self.base_url,
            urlencoding::encode(normalized_query)
        )
    }

    pub fn detail_url(&self, external_id: i64) -> String {
        format!("{}/thing?id={}", self.base_url, external_id)
    }

    async fn fetch(&self, url: &str) -> Option<String> {
        self.transport.fetch_with_retry(url, self.max_retries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSleeper, ScriptedHttp};
    use std::collections::HashMap;

    #[test]
    fn builds_encoded_search_url() {
        let cfg = CatalogConfig {
            base_url: "https://catalog.test/xmlapi2/".into(),
            ..CatalogConfig::default()
        };
        let client = CatalogClient::new(
            &cfg,
            Arc::new(ScriptedHttp::new(vec![])),
            Arc::new(RecordingSleeper::default()),
        );
        assert_eq!(
            client.search_url("ticket to ride: europe"),
            "https://catalog.test/xmlapi2/search?type=boardgame&query=ticket%20to%20ride%3A%20europe"
        );
        assert_eq!(client.detail_url(13), "https://catalog.test/xmlapi2/thing?id=13");
    }

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn config_from_lookup_trims_and_clamps() {
        let cfg = CatalogConfig::from_lookup(lookup_from(&[
            ("BGG_API_TOKEN", "  tok-9 \n"),
            ("BGG_BASE_URL", "https://catalog.test/xmlapi2//"),
            ("BGG_MAX_RETRIES", "0"),
        ]));
        assert_eq!(cfg.token.as_deref(), Some("tok-9"));
        assert_eq!(cfg.base_url, "https://catalog.test/xmlapi2");
        assert_eq!(cfg.max_retries, 1);
        assert_eq!(cfg.image_source, DEFAULT_IMAGE_SOURCE);

        let cfg = CatalogConfig::from_lookup(lookup_from(&[("BGG_MAX_RETRIES", "70")]));
        assert_eq!(cfg.max_retries, MAX_RETRIES_CAP);
        assert!(!cfg.is_enabled());

        let cfg = CatalogConfig::from_lookup(lookup_from(&[("BGG_MAX_RETRIES", "lots")]));
        assert_eq!(cfg.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn default_config_is_disabled() {
        let cfg = CatalogConfig::default();
        assert!(!cfg.is_enabled());
        assert!(cfg.with_token("abc").is_enabled());
    }
}
