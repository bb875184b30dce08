use crate::model::{InteractionKind, SourceKind};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Main configuration structure for Groove-Ripple
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    pub output: OutputConfig,
}

/// Discovery and budget configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Accounts the breadth-first walk starts from
    pub seeds: Vec<String>,

    /// Auxiliary accounts explored once the seeds' neighborhood runs dry
    #[serde(rename = "seed-pool")]
    pub seed_pool: Vec<String>,

    /// Maximum number of accounts processed in one run
    #[serde(rename = "max-accounts")]
    pub max_accounts: u32,

    /// Maximum BFS depth from the seeds
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Accounts that already hold this many interactions are skipped
    #[serde(rename = "min-prior-interactions")]
    pub min_prior_interactions: u32,

    /// Reprocess accounts regardless of the visited log and prior data
    #[serde(rename = "force-reprocess")]
    pub force_reprocess: bool,

    /// Maximum related accounts taken from one account
    #[serde(rename = "max-related-per-account")]
    pub max_related_per_account: usize,

    /// Maximum pages fetched per interaction kind
    #[serde(rename = "max-pages-per-kind")]
    pub max_pages_per_kind: u32,

    /// How often a rate-limited account may go back to the queue
    #[serde(rename = "max-deferrals")]
    pub max_deferrals: u32,

    /// Interaction kinds to collect
    pub kinds: Vec<InteractionKind>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            seed_pool: Vec::new(),
            max_accounts: 50,
            max_depth: 3,
            min_prior_interactions: 50,
            force_reprocess: false,
            max_related_per_account: 25,
            max_pages_per_kind: 20,
            max_deferrals: 2,
            kinds: InteractionKind::ALL.to_vec(),
        }
    }
}

/// Pacing and retry configuration shared by both channels
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Base interval between requests (milliseconds)
    #[serde(rename = "base-pause-ms")]
    pub base_pause_ms: u64,

    /// Bound of the random jitter added to or removed from the pause
    #[serde(rename = "jitter-ms")]
    pub jitter_ms: u64,

    /// Retries for timeouts, connection errors and 5xx responses
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// First backoff interval (milliseconds)
    #[serde(rename = "backoff-base-ms")]
    pub backoff_base_ms: u64,

    /// Multiplier applied per attempt
    #[serde(rename = "backoff-factor")]
    pub backoff_factor: f64,

    /// Upper bound of a computed backoff (milliseconds)
    #[serde(rename = "backoff-cap-ms")]
    pub backoff_cap_ms: u64,

    /// Consecutive 429 responses tolerated for one request
    #[serde(rename = "max-rate-limit-retries")]
    pub max_rate_limit_retries: u32,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_pause_ms: 1000,
            jitter_ms: 250,
            max_retries: 4,
            backoff_base_ms: 2000,
            backoff_factor: 2.0,
            backoff_cap_ms: 60_000,
            max_rate_limit_retries: 5,
            timeout_secs: 30,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Format: CrawlerName/Version (+ContactURL; ContactEmail)
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Structured API endpoint configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Personal access token; takes precedence over `token-env`
    pub token: Option<String>,

    /// Environment variable holding the token
    #[serde(rename = "token-env")]
    pub token_env: String,

    #[serde(rename = "per-page")]
    pub per_page: u32,
}

impl ApiConfig {
    /// Returns the configured token, falling back to the environment
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(&self.token_env).ok())
            .filter(|t| !t.is_empty())
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.discogs.com".to_string(),
            token: None,
            token_env: "DISCOGS_TOKEN".to_string(),
            per_page: 50,
        }
    }
}

/// Cookie-gated document feed configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Exported browser cookies (JSON or Netscape cookies.txt)
    #[serde(rename = "cookies-file")]
    pub cookies_file: Option<String>,

    /// Explicit validity limit of the session material
    #[serde(rename = "session-valid-until")]
    pub session_valid_until: Option<DateTime<Utc>>,

    /// Interaction kinds read from the feed instead of the API
    pub kinds: Vec<InteractionKind>,

    /// Fill missing profile fields from the profile page
    #[serde(rename = "enrich-profiles")]
    pub enrich_profiles: bool,

    /// Editions per account whose have/want lists are read for new accounts
    #[serde(rename = "audience-editions")]
    pub audience_editions: usize,

    /// Pages read from each have/want list
    #[serde(rename = "audience-pages")]
    pub audience_pages: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.discogs.com".to_string(),
            cookies_file: None,
            session_valid_until: None,
            kinds: Vec::new(),
            enrich_profiles: false,
            audience_editions: 0,
            audience_pages: 1,
        }
    }
}

impl FeedConfig {
    pub fn is_used(&self) -> bool {
        !self.kinds.is_empty() || self.enrich_profiles || self.audience_editions > 0
    }
}

/// Which source wins when both describe the same catalog field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldPrecedence {
    /// API metadata overrides feed metadata
    #[default]
    Structured,
    /// Feed metadata overrides API metadata
    Document,
}

impl FieldPrecedence {
    pub fn preferred_source(&self) -> SourceKind {
        match self {
            Self::Structured => SourceKind::Api,
            Self::Document => SourceKind::Feed,
        }
    }
}

/// Catalog resolution configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub precedence: FieldPrecedence,

    /// Channel used to look up an edition's canonical grouping
    #[serde(rename = "lookup-channel")]
    pub lookup_channel: SourceKind,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            precedence: FieldPrecedence::Structured,
            lookup_channel: SourceKind::Api,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Path to the append-only log of visited accounts
    #[serde(rename = "visited-log-path", default = "default_visited_log_path")]
    pub visited_log_path: String,
}

fn default_visited_log_path() -> String {
    ".discovered_accounts.log".to_string()
}
