//! Paced, retrying HTTP client for both endpoint families
//!
//! | Condition | Action |
//! |-----------|--------|
//! | Feed session past `valid_until` | `SessionExpired`, no request sent |
//! | HTTP 2xx | Return the document |
//! | HTTP 429 | Wait `Retry-After` or backoff; `RateLimitExceeded` once the 429 budget is spent |
//! | HTTP 401/403 on the feed | `SessionExpired`, never retried |
//! | HTTP 404 | `NotFound` |
//! | HTTP 5xx, timeout, connection error | Retry with backoff; `Transient` once retries are spent |
//! | Any other status | `Status` |

use crate::config::Config;
use crate::model::SourceKind;
use crate::transport::pacing::{backoff_delay, Pacer, PacingPolicy};
use crate::transport::session::{CookieFile, SessionMaterial};
use crate::transport::TransportError;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, AUTHORIZATION, COOKIE, RETRY_AFTER};
use reqwest::{redirect::Policy, Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Header carrying the remaining request quota
pub const QUOTA_HEADER: &str = "x-discogs-ratelimit-remaining";

/// A request to one of the two endpoint families
#[derive(Debug, Clone)]
pub struct Request {
    pub channel: SourceKind,
    pub url: Url,
}

impl Request {
    pub fn api(url: Url) -> Self {
        Self {
            channel: SourceKind::Api,
            url,
        }
    }

    pub fn feed(url: Url) -> Self {
        Self {
            channel: SourceKind::Feed,
            url,
        }
    }
}

/// Response body plus the headers pacing needs
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub url: String,
    pub status: u16,
    pub body: String,
    pub remaining_quota: Option<u32>,
    pub retry_after: Option<Duration>,
}

/// Request counters kept for the run summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestStats {
    pub requests: u64,
    pub retries: u64,
    pub rate_limited: u64,
    pub failures: u64,
}

/// HTTP client shared by the API and the feed
pub struct RateLimitedClient {
    http: Client,
    pacer: Pacer,
    max_retries: u32,
    max_rate_limit_retries: u32,
    api_token: Option<String>,
    cookies: Option<CookieFile>,
    session_valid_until: Option<DateTime<Utc>>,
    stats: RequestStats,
}

impl RateLimitedClient {
    /// Builds a client from the configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Full configuration; transport, user-agent, api and feed sections are used
    ///
    /// # Returns
    ///
    /// * `Ok(RateLimitedClient)` - Ready client
    /// * `Err(TransportError::Build)` - The HTTP client could not be built
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let http = build_http_client(config)?;
        Ok(Self {
            http,
            pacer: Pacer::new(PacingPolicy::from(&config.transport)),
            max_retries: config.transport.max_retries,
            max_rate_limit_retries: config.transport.max_rate_limit_retries,
            api_token: config.api.resolve_token(),
            cookies: config
                .feed
                .cookies_file
                .as_ref()
                .map(|path| CookieFile::new(path, config.feed.session_valid_until)),
            session_valid_until: config.feed.session_valid_until,
            stats: RequestStats::default(),
        })
    }

    pub fn stats(&self) -> &RequestStats {
        &self.stats
    }

    /// Current feed session material
    pub fn session(&mut self) -> SessionMaterial {
        match self.cookies.as_mut() {
            Some(file) => file.current().clone(),
            None => SessionMaterial::anonymous(self.session_valid_until),
        }
    }

    /// Fetches a document, pacing and retrying as described in the module docs
    pub async fn fetch(&mut self, request: &Request) -> Result<RawDocument, TransportError> {
        let url = request.url.to_string();

        let session = match request.channel {
            SourceKind::Feed => {
                let material = self.session();
                if !material.is_valid_at(Utc::now()) {
                    warn!(url = %url, valid_until = ?material.valid_until, "Session material expired");
                    return Err(TransportError::SessionExpired { url });
                }
                Some(material)
            }
            SourceKind::Api => None,
        };

        let policy = *self.pacer.policy();
        let mut failures: u32 = 0;
        let mut rate_limited: u32 = 0;
        let mut previous: Option<Duration> = None;

        loop {
            self.pacer.wait().await;
            self.stats.requests += 1;

            let reason = match self.send(request, session.as_ref()).await {
                Ok(doc) => {
                    self.pacer.observe(doc.remaining_quota);
                    let status = StatusCode::from_u16(doc.status)
                        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

                    if status.is_success() {
                        debug!(url = %url, status = doc.status, quota = ?doc.remaining_quota, "Fetched");
                        return Ok(doc);
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        self.stats.rate_limited += 1;
                        if rate_limited >= self.max_rate_limit_retries {
                            self.stats.failures += 1;
                            return Err(TransportError::RateLimitExceeded {
                                url,
                                attempts: rate_limited + 1,
                            });
                        }
                        let delay = backoff_delay(&policy, rate_limited, previous, doc.retry_after);
                        rate_limited += 1;
                        warn!(
                            url = %url,
                            attempt = rate_limited,
                            delay_ms = delay.as_millis() as u64,
                            "Rate limited, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        previous = Some(delay);
                        continue;
                    }

                    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
                        && request.channel == SourceKind::Feed
                    {
                        self.stats.failures += 1;
                        return Err(TransportError::SessionExpired { url });
                    }

                    if status == StatusCode::NOT_FOUND {
                        return Err(TransportError::NotFound { url });
                    }

                    if !status.is_server_error() {
                        self.stats.failures += 1;
                        return Err(TransportError::Status {
                            url,
                            status: doc.status,
                        });
                    }

                    format!("HTTP {}", doc.status)
                }
                Err(e) if e.is_builder() => {
                    return Err(TransportError::Build(e.to_string()));
                }
                Err(e) => e.to_string(),
            };

            if failures >= self.max_retries {
                self.stats.failures += 1;
                return Err(TransportError::Transient {
                    url,
                    attempts: failures + 1,
                    reason,
                });
            }
            let delay = backoff_delay(&policy, failures, previous, None);
            failures += 1;
            self.stats.retries += 1;
            warn!(
                url = %url,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "Transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
            previous = Some(delay);
        }
    }

    async fn send(
        &self,
        request: &Request,
        session: Option<&SessionMaterial>,
    ) -> Result<RawDocument, reqwest::Error> {
        let mut builder = self.http.get(request.url.clone());
        match request.channel {
            SourceKind::Api => {
                builder = builder.header(reqwest::header::ACCEPT, "application/json");
                if let Some(token) = &self.api_token {
                    builder = builder.header(AUTHORIZATION, format!("Discogs token={}", token));
                }
            }
            SourceKind::Feed => {
                if let Some(cookie) = session.and_then(|s| s.cookie_header.as_ref()) {
                    builder = builder.header(COOKIE, cookie.as_str());
                }
            }
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let remaining_quota = remaining_quota(response.headers());
        let retry_after = retry_after(response.headers());
        let body = response.text().await?;

        Ok(RawDocument {
            url: final_url,
            status,
            body,
            remaining_quota,
            retry_after,
        })
    }
}

/// Builds an HTTP client with proper configuration
///
/// Format of the user agent: CrawlerName/Version (+ContactURL; ContactEmail)
pub fn build_http_client(config: &Config) -> Result<Client, TransportError> {
    Client::builder()
        .user_agent(config.user_agent.header_value())
        .timeout(Duration::from_secs(config.transport.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(5))
        .gzip(true)
        .brotli(true)
        .build()
        .map_err(|e| TransportError::Build(e.to_string()))
}

fn remaining_quota(headers: &HeaderMap) -> Option<u32> {
    headers
        .get(QUOTA_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Delta-seconds form only; values too large for `u64` saturate
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let secs = raw.parse::<u64>().unwrap_or(u64::MAX);
    Some(Duration::from_secs(secs))
}
