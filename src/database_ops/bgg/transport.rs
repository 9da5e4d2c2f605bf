use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::database_ops::pacing::Sleeper;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: String,
}

/// A single GET, optionally with a bearer token. Network failures surface as `Err`.
#[async_trait]
pub trait HttpGet: Send + Sync {
    async fn get(&self, url: &str, bearer: Option<&str>) -> Result<RawResponse>;
}

pub struct ReqwestGet {
    http: Client,
}

impl ReqwestGet {
    pub fn new(user_agent: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent(user_agent)
            .build()
            .context("building catalog http client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpGet for ReqwestGet {
    async fn get(&self, url: &str, bearer: Option<&str>) -> Result<RawResponse> {
        let mut req = self.http.get(url).header("Accept", "application/xml");
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        // Bodies of queued/throttled/failed responses are never inspected.
        let body = if status == StatusCode::OK {
            resp.text().await?
        } else {
            String::new()
        };
        Ok(RawResponse { status, body })
    }
}

/// GET with exponential backoff on queued (202), throttled (429) and network failures.
pub struct RetryingTransport {
    http: Arc<dyn HttpGet>,
    sleeper: Arc<dyn Sleeper>,
    token: Option<String>,
}

impl RetryingTransport {
    pub fn new(http: Arc<dyn HttpGet>, sleeper: Arc<dyn Sleeper>, token: Option<String>) -> Self {
        Self {
            http,
            sleeper,
            token,
        }
    }

    /// Returns the body of the first 200 response, or `None` once the attempt
    /// budget is spent or a terminal status comes back.
    ///
    /// 202/429 wait `2^(attempt+1)` seconds after every attempt (2s, 4s, 8s);
    /// network errors wait `2^attempt` seconds (1s, 2s, 4s) unless it was the last attempt.
    pub async fn fetch_with_retry(&self, url: &str, max_retries: u32) -> Option<String> {
        for attempt in 0..max_retries {
            let last = attempt + 1 >= max_retries;
            match self.http.get(url, self.token.as_deref()).await {
                Ok(resp) if resp.status == StatusCode::OK => return Some(resp.body),
                Ok(resp)
                    if resp.status == StatusCode::ACCEPTED
                        || resp.status == StatusCode::TOO_MANY_REQUESTS =>
                {
                    let wait = Duration::from_secs(2u64.saturating_pow(attempt + 1));
                    debug!(
                        url,
                        status = resp.status.as_u16(),
                        attempt,
                        wait_secs = wait.as_secs(),
                        "catalog request queued/throttled; backing off"
                    );
                    self.sleeper.sleep(wait).await;
                }
                Ok(resp) => {
                    warn!(url, status = resp.status.as_u16(), "catalog request failed");
                    return None;
                }
                Err(err) => {
                    if last {
                        warn!(url, attempt, error = %err, "catalog request failed; giving up");
                        return None;
                    }
                    let wait = Duration::from_secs(2u64.saturating_pow(attempt));
                    debug!(url, attempt, error = %err, wait_secs = wait.as_secs(), "catalog request errored; retrying");
                    self.sleeper.sleep(wait).await;
                }
            }
        }
        warn!(url, max_retries, "catalog retries exhausted");
        None
    }
}
