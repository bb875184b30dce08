//! Integration tests for the crawl pipeline
//!
//! The pipeline tests drive the coordinator with an in-memory
//! `InteractionSource`. The transport tests use wiremock servers standing in
//! for the API and the feed.

use async_trait::async_trait;
use groove_ripple::checkpoint::{FileVisitedLog, MemoryVisitedLog, VisitedLog};
use groove_ripple::config::Config;
use groove_ripple::crawler::{shutdown_channel, Coordinator, HaltReason};
use groove_ripple::model::{
    AccountId, AccountProfile, CanonicalId, EditionId, EditionMetadata, Interaction,
    InteractionKind, Observation, SourceKind,
};
use groove_ripple::storage::{RunStatus, SqliteStorage, Storage};
use groove_ripple::transport::{
    EditionLookup, InteractionSet, InteractionSource, RateLimitedClient, RemoteSource, Request,
    RequestStats, TransportError,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration with instant pacing and tiny backoffs
fn create_test_config(seeds: &[&str], max_accounts: u32, api_url: &str, feed_url: &str) -> Config {
    let seeds = seeds
        .iter()
        .map(|s| format!("\"{}\"", s))
        .collect::<Vec<_>>()
        .join(", ");
    let toml = format!(
        r#"
[crawler]
seeds = [{seeds}]
max-accounts = {max_accounts}
max-depth = 3
min-prior-interactions = 0
max-deferrals = 1
kinds = ["collection"]

[transport]
base-pause-ms = 0
jitter-ms = 0
max-retries = 2
backoff-base-ms = 1
backoff-factor = 2.0
backoff-cap-ms = 5
max-rate-limit-retries = 2
timeout-secs = 5

[user-agent]
crawler-name = "GrooveTest"
crawler-version = "1.0.0"
contact-url = "https://example.com/about"
contact-email = "test@example.com"

[api]
base-url = "{api_url}"
token = "test-token"

[feed]
base-url = "{feed_url}"

[output]
database-path = "unused.db"
visited-log-path = "unused.log"
"#
    );
    toml::from_str(&toml).expect("test config parses")
}

fn offline_config(seeds: &[&str], max_accounts: u32) -> Config {
    create_test_config(seeds, max_accounts, "http://127.0.0.1:9", "http://127.0.0.1:9")
}

// ===== In-memory source =====

#[derive(Default, Clone)]
struct FakeAccount {
    collection: Vec<u64>,
    related: Vec<String>,
}

/// Serves accounts from memory and records every profile fetch
#[derive(Default)]
struct FakeSource {
    accounts: HashMap<String, FakeAccount>,
    groupings: HashMap<u64, u64>,
    expired: HashSet<String>,
    rate_limited: HashMap<String, u32>,
    truncated: HashSet<String>,
    audience: HashMap<u64, Vec<String>>,
    visits: Arc<Mutex<Vec<String>>>,
}

impl FakeSource {
    fn new() -> Self {
        Self::default()
    }

    fn account(mut self, name: &str, collection: &[u64], related: &[&str]) -> Self {
        self.accounts.insert(
            name.to_string(),
            FakeAccount {
                collection: collection.to_vec(),
                related: related.iter().map(|r| r.to_string()).collect(),
            },
        );
        self
    }

    fn grouping(mut self, edition: u64, canonical: u64) -> Self {
        self.groupings.insert(edition, canonical);
        self
    }

    fn expired(mut self, name: &str) -> Self {
        self.expired.insert(name.to_string());
        self
    }

    fn rate_limited(mut self, name: &str, times: u32) -> Self {
        self.rate_limited.insert(name.to_string(), times);
        self
    }

    /// Marks the account's collection as cut short by the page limit
    fn truncated(mut self, name: &str) -> Self {
        self.truncated.insert(name.to_string());
        self
    }

    fn audience(mut self, edition: u64, accounts: &[&str]) -> Self {
        self.audience
            .insert(edition, accounts.iter().map(|a| a.to_string()).collect());
        self
    }

    fn visits(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.visits)
    }
}

#[async_trait]
impl InteractionSource for FakeSource {
    async fn fetch_profile(&mut self, account: &AccountId) -> Result<AccountProfile, TransportError> {
        let key = account.key();
        self.visits.lock().unwrap().push(key.clone());
        let url = format!("fake://users/{}", key);

        if self.expired.contains(&key) {
            return Err(TransportError::SessionExpired { url });
        }
        if let Some(remaining) = self.rate_limited.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::RateLimitExceeded { url, attempts: 3 });
            }
        }
        if !self.accounts.contains_key(&key) {
            return Err(TransportError::NotFound { url });
        }
        Ok(AccountProfile::bare(account.clone()))
    }

    async fn fetch_interactions(
        &mut self,
        account: &AccountId,
        kind: InteractionKind,
    ) -> Result<InteractionSet, TransportError> {
        let mut set = InteractionSet::new(SourceKind::Api);
        set.pages_fetched = 1;
        if kind != InteractionKind::Collection {
            return Ok(set);
        }
        set.truncated = self.truncated.contains(&account.key());
        let editions = self
            .accounts
            .get(&account.key())
            .map(|a| a.collection.clone())
            .unwrap_or_default();
        for edition in editions {
            let mut observation = Observation::new(EditionId(edition));
            observation.metadata.title = Some(format!("Edition {}", edition));
            set.items.push(Interaction::new(kind, observation));
        }
        Ok(set)
    }

    async fn fetch_related(
        &mut self,
        account: &AccountId,
        limit: usize,
    ) -> Result<Vec<AccountId>, TransportError> {
        Ok(self
            .accounts
            .get(&account.key())
            .map(|a| a.related.iter().take(limit).map(AccountId::new).collect())
            .unwrap_or_default())
    }

    async fn lookup_edition(&mut self, edition: EditionId) -> Result<EditionLookup, TransportError> {
        Ok(EditionLookup {
            canonical: self.groupings.get(&edition.0).copied().map(CanonicalId),
            metadata: EditionMetadata {
                title: Some(format!("Edition {}", edition)),
                ..Default::default()
            },
            source: SourceKind::Api,
        })
    }

    async fn fetch_release_audience(
        &mut self,
        edition: EditionId,
        _max_pages: u32,
    ) -> Result<Vec<AccountId>, TransportError> {
        Ok(self
            .audience
            .get(&edition.0)
            .map(|names| names.iter().map(AccountId::new).collect())
            .unwrap_or_default())
    }

    fn request_stats(&self) -> RequestStats {
        RequestStats::default()
    }
}

fn coordinator(config: Config, storage: SqliteStorage, source: FakeSource) -> Coordinator {
    Coordinator::with_parts(
        config,
        "test-hash",
        false,
        Box::new(storage),
        Box::new(source),
        Box::new(MemoryVisitedLog::default()),
    )
    .expect("coordinator initializes")
}

fn visited(visits: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    visits.lock().unwrap().clone()
}

// ===== Pipeline =====

#[tokio::test]
async fn test_single_account_scenario() {
    let source = FakeSource::new()
        .account("u1", &[100, 101], &["u2"])
        .account("u2", &[100], &[])
        .grouping(100, 9000);
    let storage = SqliteStorage::new_in_memory().unwrap();

    let mut coordinator = coordinator(offline_config(&["u1"], 1), storage, source);
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.halt_reason, HaltReason::BudgetReached);
    assert_eq!(report.counters.accounts_processed, 1);
    assert_eq!(report.pending, 1);

    let storage = coordinator.storage();
    assert_eq!(storage.count_accounts().unwrap(), 1);
    assert!(storage.get_account(&AccountId::new("u1")).unwrap().is_some());

    assert_eq!(storage.count_catalog_entries().unwrap(), 2);
    assert!(storage.get_catalog_entry(CanonicalId(9000)).unwrap().is_some());
    assert!(storage.get_catalog_entry(CanonicalId(101)).unwrap().is_some());
    assert_eq!(storage.get_mapping(EditionId(100)).unwrap(), Some(CanonicalId(9000)));
    assert_eq!(storage.get_mapping(EditionId(101)).unwrap(), Some(CanonicalId(101)));

    let mut edges: Vec<(u64, InteractionKind)> = storage
        .get_edges_for_account(&AccountId::new("u1"))
        .unwrap()
        .into_iter()
        .map(|e| (e.canonical_id.0, e.kind))
        .collect();
    edges.sort();
    assert_eq!(
        edges,
        vec![
            (101, InteractionKind::Collection),
            (9000, InteractionKind::Collection)
        ]
    );

    let checkpoint = storage.load_checkpoint().unwrap().unwrap();
    assert_eq!(checkpoint.last_processed_account.as_deref(), Some("u1"));
    assert_eq!(checkpoint.run_id, report.run_id);
    assert_eq!(storage.get_run(report.run_id).unwrap().status, RunStatus::Completed);
}

#[tokio::test]
async fn test_breadth_first_order_visits_each_account_once() {
    let source = FakeSource::new()
        .account("a", &[1], &["c", "d"])
        .account("b", &[2], &["d", "e"])
        .account("c", &[3], &[])
        .account("d", &[4], &["a"])
        .account("e", &[5], &[]);
    let visits = source.visits();

    let mut coordinator = coordinator(
        offline_config(&["a", "b"], 10),
        SqliteStorage::new_in_memory().unwrap(),
        source,
    );
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.halt_reason, HaltReason::FrontierExhausted);
    assert_eq!(visited(&visits), vec!["a", "b", "c", "d", "e"]);
    assert_eq!(coordinator.storage().count_accounts().unwrap(), 5);
}

#[tokio::test]
async fn test_budget_stops_after_three_accounts() {
    let source = FakeSource::new()
        .account("a", &[1], &["c", "d"])
        .account("b", &[2], &["d", "e"])
        .account("c", &[3], &[])
        .account("d", &[4], &[])
        .account("e", &[5], &[]);
    let visits = source.visits();

    let mut coordinator = coordinator(
        offline_config(&["a", "b"], 3),
        SqliteStorage::new_in_memory().unwrap(),
        source,
    );
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.halt_reason, HaltReason::BudgetReached);
    assert_eq!(report.counters.accounts_processed, 3);
    assert_eq!(visited(&visits), vec!["a", "b", "c"]);
    assert_eq!(coordinator.storage().count_accounts().unwrap(), 3);
    assert_eq!(coordinator.storage().load_frontier().unwrap().len(), 2);
}

#[tokio::test]
async fn test_resume_after_crash_between_commit_and_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("crawl.db");

    let source = FakeSource::new()
        .account("u1", &[100, 101], &[])
        .grouping(100, 9000);
    let mut first = coordinator(
        offline_config(&["u1"], 5),
        SqliteStorage::new(&db_path).unwrap(),
        source,
    );
    let report = first.run().await.unwrap();
    assert_eq!(report.counters.edges_inserted, 2);
    drop(first);

    // The commit survived but the checkpoint, frontier and log append did not
    {
        let mut storage = SqliteStorage::new(&db_path).unwrap();
        storage.update_run_status(report.run_id, RunStatus::Running).unwrap();
        storage.clear_progress().unwrap();
    }

    let source = FakeSource::new()
        .account("u1", &[100, 101], &[])
        .grouping(100, 9000);
    let visits = source.visits();
    let mut second = coordinator(
        offline_config(&["u1"], 5),
        SqliteStorage::new(&db_path).unwrap(),
        source,
    );
    assert_eq!(second.run_id(), report.run_id);
    let resumed = second.run().await.unwrap();

    assert_eq!(visited(&visits), vec!["u1"]);
    assert_eq!(resumed.counters.edges_inserted, 0);
    assert_eq!(second.storage().count_edges().unwrap(), 2);
    assert_eq!(second.storage().count_catalog_entries().unwrap(), 2);
}

#[tokio::test]
async fn test_crash_resume_does_not_filter_accounts_committed_by_the_same_run() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("crawl.db");
    let graph = || {
        FakeSource::new()
            .account("u1", &[100, 101], &["u2", "u3"])
            .account("u2", &[102], &[])
            .account("u3", &[103], &[])
    };

    let mut config = offline_config(&["u1"], 1);
    config.crawler.min_prior_interactions = 1;
    let mut first = coordinator(config, SqliteStorage::new(&db_path).unwrap(), graph());
    let report = first.run().await.unwrap();
    assert_eq!(report.counters.accounts_processed, 1);
    drop(first);

    // u1 committed, then the process died before its checkpoint
    {
        let mut storage = SqliteStorage::new(&db_path).unwrap();
        storage.update_run_status(report.run_id, RunStatus::Running).unwrap();
        storage.clear_progress().unwrap();
    }

    let source = graph();
    let visits = source.visits();
    let mut config = offline_config(&["u1"], 2);
    config.crawler.min_prior_interactions = 1;
    let mut second = coordinator(config, SqliteStorage::new(&db_path).unwrap(), source);
    assert_eq!(second.run_id(), report.run_id);
    let resumed = second.run().await.unwrap();

    assert_eq!(resumed.halt_reason, HaltReason::BudgetReached);
    assert_eq!(resumed.counters.accounts_filtered, 0);
    assert_eq!(visited(&visits), vec!["u1", "u2"]);
    assert_eq!(second.storage().count_accounts().unwrap(), 2);
}

#[tokio::test]
async fn test_resumed_run_restores_budget_from_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("crawl.db");

    let source = FakeSource::new()
        .account("u1", &[1], &["u2", "u3"])
        .account("u2", &[2], &[])
        .account("u3", &[3], &[])
        .expired("u2");
    let mut halted = coordinator(
        offline_config(&["u1"], 2),
        SqliteStorage::new(&db_path).unwrap(),
        source,
    );
    let report = halted.run().await.unwrap();
    assert_eq!(report.halt_reason, HaltReason::SessionExpired);
    assert_eq!(report.counters.accounts_processed, 1);
    drop(halted);

    let source = FakeSource::new()
        .account("u1", &[1], &["u2", "u3"])
        .account("u2", &[2], &[])
        .account("u3", &[3], &[]);
    let visits = source.visits();
    let mut resumed = coordinator(
        offline_config(&["u1"], 2),
        SqliteStorage::new(&db_path).unwrap(),
        source,
    );
    assert_eq!(resumed.run_id(), report.run_id);
    assert_eq!(resumed.counters().accounts_processed, 1);

    let report2 = resumed.run().await.unwrap();
    assert_eq!(report2.halt_reason, HaltReason::BudgetReached);
    assert_eq!(report2.counters.accounts_processed, 2);
    assert_eq!(visited(&visits), vec!["u2"]);
    assert_eq!(report2.pending, 1);
}

#[tokio::test]
async fn test_interrupted_run_resumes_pending_accounts() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("crawl.db");

    let (trigger, signal) = shutdown_channel();
    trigger.trigger();
    let source = FakeSource::new().account("u1", &[1], &["u2"]).account("u2", &[2], &[]);
    let visits = source.visits();
    let mut interrupted = coordinator(
        offline_config(&["u1"], 5),
        SqliteStorage::new(&db_path).unwrap(),
        source,
    )
    .with_shutdown(signal);

    let report = interrupted.run().await.unwrap();
    assert_eq!(report.halt_reason, HaltReason::Interrupted);
    assert!(visited(&visits).is_empty());
    assert_eq!(interrupted.storage().count_edges().unwrap(), 0);
    assert_eq!(
        interrupted.storage().get_run(report.run_id).unwrap().status,
        RunStatus::Interrupted
    );
    drop(interrupted);

    let source = FakeSource::new().account("u1", &[1], &["u2"]).account("u2", &[2], &[]);
    let visits = source.visits();
    let mut resumed = coordinator(
        offline_config(&["u1"], 5),
        SqliteStorage::new(&db_path).unwrap(),
        source,
    );
    let report2 = resumed.run().await.unwrap();

    assert_eq!(report2.run_id, report.run_id);
    assert_eq!(report2.halt_reason, HaltReason::FrontierExhausted);
    assert_eq!(visited(&visits), vec!["u1", "u2"]);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("crawl.db");

    for _ in 0..2 {
        let source = FakeSource::new()
            .account("u1", &[100, 101, 102], &[])
            .grouping(100, 9000)
            .grouping(101, 9000);
        let mut config = offline_config(&["u1"], 5);
        config.crawler.force_reprocess = true;
        let mut coordinator = Coordinator::with_parts(
            config,
            "test-hash",
            true,
            Box::new(SqliteStorage::new(&db_path).unwrap()),
            Box::new(source),
            Box::new(MemoryVisitedLog::default()),
        )
        .unwrap();
        coordinator.run().await.unwrap();
    }

    let storage = SqliteStorage::new(&db_path).unwrap();
    // 100 and 101 share a canonical id, so one edge covers both
    assert_eq!(storage.count_edges().unwrap(), 2);
    assert_eq!(storage.count_catalog_entries().unwrap(), 2);
    assert_eq!(storage.count_accounts().unwrap(), 1);
}

#[tokio::test]
async fn test_fresh_forced_run_clears_visited_log() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("visited.log");
    let mut log = FileVisitedLog::new(&log_path);
    log.append(&AccountId::new("stale")).unwrap();

    // Without force a fresh start keeps the log
    let mut coordinator = Coordinator::with_parts(
        offline_config(&["u1"], 5),
        "test-hash",
        true,
        Box::new(SqliteStorage::new_in_memory().unwrap()),
        Box::new(FakeSource::new().account("u1", &[1], &[])),
        Box::new(FileVisitedLog::new(&log_path)),
    )
    .unwrap();
    coordinator.run().await.unwrap();
    let kept = FileVisitedLog::new(&log_path).load().unwrap();
    assert!(kept.contains("stale"));
    assert!(kept.contains("u1"));

    let mut config = offline_config(&["u2"], 5);
    config.crawler.force_reprocess = true;
    let mut coordinator = Coordinator::with_parts(
        config,
        "test-hash",
        true,
        Box::new(SqliteStorage::new_in_memory().unwrap()),
        Box::new(FakeSource::new().account("u2", &[2], &[])),
        Box::new(FileVisitedLog::new(&log_path)),
    )
    .unwrap();
    coordinator.run().await.unwrap();

    let visited = FileVisitedLog::new(&log_path).load().unwrap();
    assert_eq!(visited, HashSet::from(["u2".to_string()]));
}

#[tokio::test]
async fn test_seed_pool_feeds_the_crawl_after_neighbourhood_is_exhausted() {
    let source = FakeSource::new()
        .account("a", &[1], &["b"])
        .account("b", &[2], &[])
        .account("p1", &[3], &[]);
    let visits = source.visits();

    let mut config = offline_config(&["a"], 10);
    config.crawler.seed_pool = vec!["b".to_string(), "p1".to_string()];
    let mut coordinator = coordinator(config, SqliteStorage::new_in_memory().unwrap(), source);
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.halt_reason, HaltReason::FrontierExhausted);
    assert_eq!(visited(&visits), vec!["a", "b", "p1"]);
    assert_eq!(coordinator.storage().count_accounts().unwrap(), 3);
}

#[tokio::test]
async fn test_truncated_listings_are_counted() {
    let source = FakeSource::new()
        .account("u1", &[1, 2], &["u2"])
        .account("u2", &[3], &[])
        .truncated("u1");

    let mut coordinator = coordinator(
        offline_config(&["u1"], 5),
        SqliteStorage::new_in_memory().unwrap(),
        source,
    );
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.counters.listings_truncated, 1);
    let checkpoint = coordinator.storage().load_checkpoint().unwrap().unwrap();
    assert_eq!(checkpoint.counters.listings_truncated, 1);
}

#[tokio::test]
async fn test_release_audience_adds_related_accounts() {
    let source = FakeSource::new()
        .account("u1", &[100, 101], &["u2"])
        .account("u2", &[], &[])
        .account("fan", &[], &[])
        .account("other", &[], &[])
        .audience(100, &["U1", "u2", "fan"])
        .audience(101, &["other"]);
    let visits = source.visits();

    let mut config = offline_config(&["u1"], 10);
    config.feed.audience_editions = 1;
    let mut coordinator = coordinator(config, SqliteStorage::new_in_memory().unwrap(), source);
    coordinator.run().await.unwrap();

    // Only the first edition's list is read, and u1 never queues itself
    assert_eq!(visited(&visits), vec!["u1", "u2", "fan"]);
}

#[tokio::test]
async fn test_prior_interactions_filter_still_discovers_neighbours() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("crawl.db");

    let source = FakeSource::new().account("u1", &[1, 2], &[]);
    let mut first = coordinator(
        offline_config(&["u1"], 5),
        SqliteStorage::new(&db_path).unwrap(),
        source,
    );
    first.run().await.unwrap();
    drop(first);

    let source = FakeSource::new()
        .account("u1", &[1, 2], &["u2"])
        .account("u2", &[3], &[]);
    let visits = source.visits();
    let mut config = offline_config(&["u1"], 5);
    config.crawler.min_prior_interactions = 2;
    let mut second = Coordinator::with_parts(
        config,
        "test-hash",
        true,
        Box::new(SqliteStorage::new(&db_path).unwrap()),
        Box::new(source),
        Box::new(MemoryVisitedLog::default()),
    )
    .unwrap();
    let report = second.run().await.unwrap();

    assert_eq!(report.counters.accounts_filtered, 1);
    assert_eq!(report.counters.accounts_processed, 1);
    assert_eq!(visited(&visits), vec!["u2"]);
}

#[tokio::test]
async fn test_missing_account_is_skipped_and_recorded() {
    let source = FakeSource::new().account("u2", &[7], &[]);

    let mut coordinator = coordinator(
        offline_config(&["ghost", "u2"], 5),
        SqliteStorage::new_in_memory().unwrap(),
        source,
    );
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.halt_reason, HaltReason::FrontierExhausted);
    assert_eq!(report.counters.accounts_skipped, 1);
    assert_eq!(report.counters.accounts_processed, 2);

    let skipped = coordinator.storage().get_skipped(report.run_id).unwrap();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].account_id, "ghost");
    assert!(skipped[0].item_ref.is_none());
    assert_eq!(coordinator.storage().count_accounts().unwrap(), 1);
}

#[tokio::test]
async fn test_skipped_account_keeps_last_committed_in_checkpoint() {
    let source = FakeSource::new().account("u2", &[7], &[]);

    let mut coordinator = coordinator(
        offline_config(&["u2", "ghost"], 5),
        SqliteStorage::new_in_memory().unwrap(),
        source,
    );
    coordinator.run().await.unwrap();

    let checkpoint = coordinator.storage().load_checkpoint().unwrap().unwrap();
    assert_eq!(checkpoint.last_processed_account.as_deref(), Some("u2"));
    assert_eq!(checkpoint.counters.accounts_skipped, 1);
    assert_eq!(checkpoint.counters.accounts_processed, 2);
}

#[tokio::test]
async fn test_rate_limited_account_is_deferred_then_processed() {
    let source = FakeSource::new()
        .account("busy", &[1], &[])
        .account("calm", &[2], &[])
        .rate_limited("busy", 1);
    let visits = source.visits();

    let mut coordinator = coordinator(
        offline_config(&["busy", "calm"], 5),
        SqliteStorage::new_in_memory().unwrap(),
        source,
    );
    let report = coordinator.run().await.unwrap();

    assert_eq!(visited(&visits), vec!["busy", "calm", "busy"]);
    assert_eq!(report.counters.accounts_deferred, 1);
    assert_eq!(report.counters.accounts_skipped, 0);
    assert_eq!(coordinator.storage().count_accounts().unwrap(), 2);
}

#[tokio::test]
async fn test_session_expiry_halts_and_keeps_account_queued() {
    let source = FakeSource::new()
        .account("u1", &[1], &["u2"])
        .account("u2", &[2], &[])
        .expired("u2");

    let mut coordinator = coordinator(
        offline_config(&["u1"], 5),
        SqliteStorage::new_in_memory().unwrap(),
        source,
    );
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.halt_reason, HaltReason::SessionExpired);
    assert_eq!(report.counters.accounts_processed, 1);

    let storage = coordinator.storage();
    assert_eq!(storage.get_run(report.run_id).unwrap().status, RunStatus::Halted);
    let frontier = storage.load_frontier().unwrap();
    assert_eq!(frontier[0].account, AccountId::new("u2"));
}

// ===== Transport =====

#[tokio::test]
async fn test_rate_limit_waits_and_retries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/u1"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/u1"))
        .and(header("authorization", "Discogs token=test-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-discogs-ratelimit-remaining", "42")
                .set_body_string(r#"{"username": "u1"}"#),
        )
        .mount(&server)
        .await;

    let config = create_test_config(&["u1"], 1, &server.uri(), &server.uri());
    let mut client = RateLimitedClient::new(&config).unwrap();
    let url = url::Url::parse(&format!("{}/users/u1", server.uri())).unwrap();

    let doc = client.fetch(&Request::api(url)).await.unwrap();
    assert_eq!(doc.status, 200);
    assert_eq!(doc.remaining_quota, Some(42));
    assert_eq!(client.stats().rate_limited, 2);
    assert_eq!(client.stats().requests, 3);
}

#[tokio::test]
async fn test_oversized_retry_after_is_capped() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/u1"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("retry-after", "100000000000000000000"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"username": "u1"}"#))
        .mount(&server)
        .await;

    let config = create_test_config(&["u1"], 1, &server.uri(), &server.uri());
    let mut client = RateLimitedClient::new(&config).unwrap();
    let url = url::Url::parse(&format!("{}/users/u1", server.uri())).unwrap();

    let doc = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        client.fetch(&Request::api(url)),
    )
    .await
    .expect("wait is capped by backoff-cap-ms")
    .unwrap();
    assert_eq!(doc.status, 200);
    assert_eq!(client.stats().rate_limited, 1);
}

#[tokio::test]
async fn test_persistent_rate_limit_gives_up() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let config = create_test_config(&["u1"], 1, &server.uri(), &server.uri());
    let mut client = RateLimitedClient::new(&config).unwrap();
    let url = url::Url::parse(&format!("{}/users/u1", server.uri())).unwrap();

    let err = client.fetch(&Request::api(url)).await.unwrap_err();
    assert!(matches!(err, TransportError::RateLimitExceeded { attempts: 3, .. }));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_server_errors_are_retried_then_transient() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let config = create_test_config(&["u1"], 1, &server.uri(), &server.uri());
    let mut client = RateLimitedClient::new(&config).unwrap();
    let url = url::Url::parse(&format!("{}/users/u1", server.uri())).unwrap();

    let err = client.fetch(&Request::api(url)).await.unwrap_err();
    assert!(matches!(err, TransportError::Transient { attempts: 3, .. }));
    assert_eq!(client.stats().retries, 2);
}

#[tokio::test]
async fn test_unauthorized_feed_is_session_expiry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user/u1/collection"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&["u1"], 1, &server.uri(), &server.uri());
    let mut client = RateLimitedClient::new(&config).unwrap();
    let url = url::Url::parse(&format!("{}/user/u1/collection", server.uri())).unwrap();

    let err = client.fetch(&Request::feed(url)).await.unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_expired_session_sends_no_feed_requests() {
    let api = MockServer::start().await;
    let feed = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"username": "u1"}"#))
        .mount(&api)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .expect(0)
        .mount(&feed)
        .await;

    let mut config = create_test_config(&["u1"], 1, &api.uri(), &feed.uri());
    config.feed.kinds = vec![InteractionKind::Collection];
    config.feed.session_valid_until = Some(
        chrono::DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc),
    );

    let source = RemoteSource::new(&config).unwrap();
    let mut coordinator = Coordinator::with_parts(
        config,
        "test-hash",
        false,
        Box::new(SqliteStorage::new_in_memory().unwrap()),
        Box::new(source),
        Box::new(MemoryVisitedLog::default()),
    )
    .unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.halt_reason, HaltReason::SessionExpired);
    assert_eq!(coordinator.storage().count_edges().unwrap(), 0);
    assert!(feed.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_full_crawl_over_api() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"username": "u1", "location": "Bristol", "registered": "2012-03-05T10:00:00-08:00"}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/u1/collection/folders/0/releases"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"pagination": {"page": 1, "pages": 2},
                "releases": [{"id": 100, "rating": 0, "basic_information": {"id": 100, "title": "Blue Lines"}}]}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/u1/collection/folders/0/releases"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"pagination": {"page": 2, "pages": 2},
                "releases": [{"id": 101, "rating": 4, "basic_information": {"id": 101, "title": "Rare Promo"}}]}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/releases/100"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"id": 100, "master_id": 9000, "title": "Blue Lines", "genres": ["Electronic"]}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/releases/101"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"id": 101, "master_id": 0, "title": "Rare Promo"}"#),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/u1/following"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"following": [{"username": "u2"}]}"#),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/u1/followers"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"followers": []}"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/u1/lists"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = create_test_config(&["u1"], 1, &server.uri(), &server.uri());
    let source = RemoteSource::new(&config).unwrap();
    let mut coordinator = Coordinator::with_parts(
        config,
        "test-hash",
        false,
        Box::new(SqliteStorage::new_in_memory().unwrap()),
        Box::new(source),
        Box::new(MemoryVisitedLog::default()),
    )
    .unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.halt_reason, HaltReason::BudgetReached);
    assert_eq!(report.pending, 1);

    let storage = coordinator.storage();
    let account = storage.get_account(&AccountId::new("u1")).unwrap().unwrap();
    assert_eq!(account.location.as_deref(), Some("Bristol"));

    let edges = storage.get_edges_for_account(&AccountId::new("u1")).unwrap();
    assert_eq!(edges.len(), 2);
    let promo = edges
        .iter()
        .find(|e| e.canonical_id == CanonicalId(101))
        .unwrap();
    assert_eq!(promo.rating, Some(4));

    let entry = storage.get_catalog_entry(CanonicalId(9000)).unwrap().unwrap();
    assert_eq!(entry.title, "Blue Lines");
    assert_eq!(entry.genres, vec!["Electronic".to_string()]);
    assert_eq!(storage.get_mapping(EditionId(101)).unwrap(), Some(CanonicalId(101)));
}
