//! Crawl coordinator - the per-account pipeline
//!
//! Each iteration takes one account from the frontier and:
//! 1. Applies the prior-interactions filter
//! 2. Fetches the profile, every configured interaction kind and the related
//!    accounts, racing the shutdown signal
//! 3. Resolves every edition to its canonical id
//! 4. Commits the account in one ingestion transaction
//! 5. Discovers related accounts and completes the account in the frontier
//! 6. Records a checkpoint
//!
//! Nothing is written for an account whose fetch phase was interrupted.

use crate::checkpoint::{CheckpointStore, Counters, FileVisitedLog, RunCheckpoint, VisitedLog};
use crate::config::Config;
use crate::crawler::shutdown::ShutdownSignal;
use crate::frontier::{Frontier, FrontierEntry};
use crate::ingest::{combine_metadata, IngestionBatch, MergePolicy};
use crate::model::{AccountId, EditionId};
use crate::resolver::{CanonicalResolver, ResolverStats};
use crate::storage::{RunStatus, SqliteStorage, Storage, StorageError};
use crate::transport::{InteractionSource, RemoteSource, RequestStats, TransportError};
use crate::{GrooveError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    FrontierExhausted,
    BudgetReached,
    Interrupted,
    /// Feed credentials must be refreshed before the run can continue
    SessionExpired,
}

impl HaltReason {
    pub fn run_status(&self) -> RunStatus {
        match self {
            Self::FrontierExhausted | Self::BudgetReached => RunStatus::Completed,
            Self::Interrupted => RunStatus::Interrupted,
            Self::SessionExpired => RunStatus::Halted,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }
}

/// Outcome of a run, printed as the machine-readable summary
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: i64,
    pub halt_reason: HaltReason,
    pub counters: Counters,
    /// Accounts still queued when the run stopped
    pub pending: usize,
    pub requests: RequestStats,
    pub resolution: ResolverStats,
}

/// What happened to one account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccountOutcome {
    Committed,
    Filtered,
    Skipped,
    Deferred,
    Interrupted,
    SessionExpired,
}

/// Everything fetched for one account, ready to write
struct FetchedAccount {
    batch: IngestionBatch,
    related: Vec<AccountId>,
    /// (item reference, reason) for listings or items that could not be used
    skipped_items: Vec<(String, String)>,
    /// Listings cut short by the page limit
    truncated: u64,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Config,
    storage: Box<dyn Storage>,
    source: Box<dyn InteractionSource>,
    checkpoints: CheckpointStore,
    frontier: Frontier,
    resolver: CanonicalResolver,
    policy: MergePolicy,
    counters: Counters,
    run_id: i64,
    /// Edges observed before this instant came from earlier runs
    run_started_at: DateTime<Utc>,
    /// Account named by the next checkpoint
    last_committed: Option<AccountId>,
    shutdown: ShutdownSignal,
}

impl Coordinator {
    /// Creates a coordinator backed by the configured database, visited log
    /// and remote endpoints
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `config_hash` - Hash stored on a newly created run
    /// * `fresh` - Discard the checkpoint and the persisted frontier; with
    ///   `force-reprocess` the visited log is cleared as well
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(GrooveError)` - Failed to initialize
    pub fn new(config: Config, config_hash: &str, fresh: bool) -> Result<Self> {
        let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
        let source = RemoteSource::new(&config)?;
        let log = FileVisitedLog::new(&config.output.visited_log_path);
        Self::with_parts(
            config,
            config_hash,
            fresh,
            Box::new(storage),
            Box::new(source),
            Box::new(log),
        )
    }

    /// Creates a coordinator from explicit parts
    ///
    /// Resumes the latest unfinished run unless `fresh` is set. The frontier
    /// is rebuilt from the persisted queue, then the seeds are added. When the
    /// checkpoint belongs to the resumed run its counters are restored so the
    /// budget spans the whole logical run.
    pub fn with_parts(
        config: Config,
        config_hash: &str,
        fresh: bool,
        mut storage: Box<dyn Storage>,
        source: Box<dyn InteractionSource>,
        log: Box<dyn VisitedLog>,
    ) -> Result<Self> {
        if fresh {
            info!("Fresh start requested, clearing checkpoint and frontier");
            storage.clear_progress()?;
        }

        let resumable = if fresh {
            None
        } else {
            storage
                .get_latest_run()?
                .filter(|run| run.status.is_resumable())
        };

        let run = match resumable {
            Some(run) => {
                if run.config_hash != config_hash {
                    warn!(run_id = run.id, "Configuration changed since the run started");
                }
                info!(run_id = run.id, status = run.status.to_db_string(), "Resuming run");
                storage.update_run_status(run.id, RunStatus::Running)?;
                run
            }
            None => {
                let id = storage.create_run(config_hash)?;
                info!(run_id = id, "Starting new run");
                storage.get_run(id)?
            }
        };
        let run_id = run.id;
        let run_started_at = run.started().ok_or_else(|| StorageError::Corrupt {
            column: "started_at".to_string(),
            value: run.started_at.clone(),
        })?;

        let mut checkpoints = CheckpointStore::new(log);
        let force = config.crawler.force_reprocess;
        if fresh && force {
            info!("Fresh forced start, clearing visited log");
            checkpoints.clear_visited()?;
        }
        let visited = checkpoints.load_visited()?;
        info!(visited = visited.len(), force, "Loaded visited accounts");

        let mut frontier = Frontier::new(
            config.crawler.max_accounts,
            config.crawler.max_depth,
            force,
            visited,
        );

        let mut counters = Counters::default();
        let mut last_committed = None;
        if let Some(checkpoint) = checkpoints.load_last_checkpoint(storage.as_ref())? {
            if checkpoint.run_id == run_id {
                last_committed = checkpoint.account();
                // The log append may have been lost after the checkpoint committed
                if let Some(account) = &last_committed {
                    frontier.mark_done(account);
                }
                counters = checkpoint.counters;
                frontier.set_processed(counters.accounts_processed);
                info!(
                    account = ?checkpoint.last_processed_account,
                    processed = counters.accounts_processed,
                    "Restored checkpoint"
                );
            }
        }

        let restored = frontier.restore(storage.load_frontier()?);
        let seeds: Vec<AccountId> = config.crawler.seeds.iter().map(AccountId::new).collect();
        let seeded = frontier.seed(&seeds);
        frontier.set_seed_pool(config.crawler.seed_pool.iter().map(AccountId::new).collect());
        info!(restored, seeded, pending = frontier.pending(), "Frontier ready");

        let policy = MergePolicy::from(config.catalog.precedence);

        Ok(Self {
            config,
            storage,
            source,
            checkpoints,
            frontier,
            resolver: CanonicalResolver::new(),
            policy,
            counters,
            run_id,
            run_started_at,
            last_committed,
            shutdown: ShutdownSignal::never(),
        })
    }

    /// Attaches the signal that stops the run between accounts
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Runs the main crawl loop until the frontier or budget is exhausted,
    /// shutdown is requested, or the session expires
    ///
    /// Storage failures mark the run failed and are returned as errors.
    pub async fn run(&mut self) -> Result<RunReport> {
        info!(
            run_id = self.run_id,
            pending = self.frontier.pending(),
            budget = self.config.crawler.max_accounts,
            "Starting crawl"
        );
        let start_time = std::time::Instant::now();

        let halt = match self.crawl_loop().await {
            Ok(halt) => halt,
            Err(e) => {
                error!(run_id = self.run_id, error = %e, "Run failed");
                if let Err(status_err) = self.storage.finish_run(self.run_id, RunStatus::Failed) {
                    warn!(error = %status_err, "Could not mark run as failed");
                }
                return Err(e);
            }
        };

        self.storage.finish_run(self.run_id, halt.run_status())?;
        let report = self.report(halt);

        let resolution = self.resolver.stats();
        info!(
            run_id = self.run_id,
            reason = ?halt,
            processed = self.counters.accounts_processed,
            skipped = self.counters.accounts_skipped,
            filtered = self.counters.accounts_filtered,
            truncated = self.counters.listings_truncated,
            edges_inserted = self.counters.edges_inserted,
            edges_updated = self.counters.edges_updated,
            pending = report.pending,
            "Crawl stopped after {:?}",
            start_time.elapsed()
        );
        debug!(
            cache_hits = resolution.cache_hits,
            stored_hits = resolution.stored_hits,
            hinted = resolution.hinted,
            looked_up = resolution.looked_up,
            self_mapped = resolution.self_mapped,
            "Resolution statistics"
        );
        if halt.is_fatal() {
            error!("Session expired: credentials must be refreshed before resuming");
        }

        Ok(report)
    }

    /// Builds the report for the current state
    pub fn report(&self, halt_reason: HaltReason) -> RunReport {
        RunReport {
            run_id: self.run_id,
            halt_reason,
            counters: self.counters.clone(),
            pending: self.frontier.snapshot().len(),
            requests: self.source.request_stats(),
            resolution: self.resolver.stats().clone(),
        }
    }

    async fn crawl_loop(&mut self) -> Result<HaltReason> {
        loop {
            if self.shutdown.is_triggered() {
                self.storage.save_frontier(&self.frontier.snapshot())?;
                return Ok(HaltReason::Interrupted);
            }

            let Some(entry) = self.frontier.next() else {
                self.storage.save_frontier(&self.frontier.snapshot())?;
                return Ok(if self.frontier.budget_reached() {
                    info!(budget = self.config.crawler.max_accounts, "Account budget reached");
                    HaltReason::BudgetReached
                } else {
                    info!("Frontier is empty, crawl complete");
                    HaltReason::FrontierExhausted
                });
            };

            debug!(account = %entry.account, depth = entry.depth, "Processing account");
            match self.process_account(&entry).await? {
                AccountOutcome::Interrupted => return Ok(HaltReason::Interrupted),
                AccountOutcome::SessionExpired => return Ok(HaltReason::SessionExpired),
                AccountOutcome::Committed
                | AccountOutcome::Filtered
                | AccountOutcome::Skipped
                | AccountOutcome::Deferred => {}
            }
        }
    }

    /// Processes one in-progress account
    ///
    /// Transport failures are classified here; only storage and state errors
    /// escape as `Err`.
    async fn process_account(&mut self, entry: &FrontierEntry) -> Result<AccountOutcome> {
        if self.is_filtered(&entry.account)? {
            return self.process_filtered(entry).await;
        }

        let mut signal = self.shutdown.clone();
        let fetched = tokio::select! {
            biased;
            _ = signal.triggered() => {
                info!(account = %entry.account, "Interrupted before write, account stays queued");
                return self.stop_at(entry, AccountOutcome::Interrupted);
            }
            result = self.fetch_account(entry) => result,
        };

        match fetched {
            Ok(fetched) => self.commit_account(entry, fetched),
            Err(e) => self.handle_fetch_error(entry, e),
        }
    }

    /// Only edges from earlier runs count, so an account committed by this
    /// run before a crash is not filtered when the run resumes
    fn is_filtered(&self, account: &AccountId) -> Result<bool> {
        let threshold = self.config.crawler.min_prior_interactions;
        if self.frontier.is_force() || threshold == 0 {
            return Ok(false);
        }
        let prior = self
            .storage
            .count_edges_observed_before(account, self.run_started_at)?;
        Ok(prior >= u64::from(threshold))
    }

    /// Accounts that already hold enough data are not refetched, but their
    /// neighbours are still discovered
    async fn process_filtered(&mut self, entry: &FrontierEntry) -> Result<AccountOutcome> {
        info!(
            account = %entry.account,
            threshold = self.config.crawler.min_prior_interactions,
            "Account already has enough interactions, skipping fetch"
        );

        let limit = self.config.crawler.max_related_per_account;
        let mut signal = self.shutdown.clone();
        let related = tokio::select! {
            biased;
            _ = signal.triggered() => return self.stop_at(entry, AccountOutcome::Interrupted),
            result = self.source.fetch_related(&entry.account, limit) => result,
        };

        match related {
            Ok(related) => {
                self.frontier.discover(entry, &related);
            }
            Err(e) if e.is_fatal() => return self.stop_at(entry, AccountOutcome::SessionExpired),
            Err(e) => warn!(account = %entry.account, error = %e, "Related accounts unavailable"),
        }

        self.frontier.complete(&entry.account, false)?;
        self.counters.accounts_filtered += 1;
        if let Err(e) = self.checkpoints.mark_visited(&entry.account) {
            warn!(account = %entry.account, error = %e, "Failed to append to visited log");
        }
        self.storage.save_frontier(&self.frontier.snapshot())?;
        Ok(AccountOutcome::Filtered)
    }

    /// Fetch phase: reads and resolves everything, writes nothing but mappings
    async fn fetch_account(&mut self, entry: &FrontierEntry) -> Result<FetchedAccount> {
        let account = &entry.account;
        let profile = self.source.fetch_profile(account).await?;
        let mut batch = IngestionBatch::new(&profile, Utc::now());
        let mut skipped_items = Vec::new();
        let mut truncated = 0;
        let mut editions: Vec<EditionId> = Vec::new();

        for kind in self.config.crawler.kinds.clone() {
            let set = match self.source.fetch_interactions(account, kind).await {
                Ok(set) => set,
                Err(
                    e @ (TransportError::NotFound { .. }
                    | TransportError::Status { .. }
                    | TransportError::Malformed { .. }),
                ) => {
                    warn!(account = %account, kind = %kind, error = %e, "Listing unavailable");
                    skipped_items.push((kind.to_string(), e.to_string()));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if set.truncated {
                truncated += 1;
            }

            for item in &set.malformed {
                debug!(account = %account, kind = %kind, raw_id = %item.raw_id, "Malformed item");
                skipped_items.push((format!("{}:{}", kind, item.raw_id), item.reason.clone()));
            }

            for interaction in &set.items {
                let observation = interaction.observation();
                if editions.len() < self.config.feed.audience_editions
                    && !editions.contains(&observation.edition)
                {
                    editions.push(observation.edition);
                }
                let resolution = self
                    .resolver
                    .resolve(
                        self.storage.as_mut(),
                        self.source.as_mut(),
                        observation.edition,
                        observation.canonical_hint,
                    )
                    .await?;

                let (metadata, metadata_source) = match resolution.lookup {
                    Some(lookup) => combine_metadata(
                        (observation.metadata.clone(), set.source),
                        (lookup.metadata, lookup.source),
                        self.policy,
                    ),
                    None => (observation.metadata.clone(), set.source),
                };

                batch.add_interaction(
                    interaction,
                    resolution.canonical,
                    &metadata,
                    metadata_source,
                    set.source,
                    self.policy,
                );
            }
        }

        let limit = self.config.crawler.max_related_per_account;
        let mut related = match self.source.fetch_related(account, limit).await {
            Ok(related) => related,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(account = %account, error = %e, "Related accounts unavailable");
                Vec::new()
            }
        };
        self.add_release_audience(account, &editions, &mut related).await?;

        Ok(FetchedAccount {
            batch,
            related,
            skipped_items,
            truncated,
        })
    }

    /// Tops up `related` with accounts that have or want the account's first
    /// editions, up to `max-related-per-account`
    async fn add_release_audience(
        &mut self,
        account: &AccountId,
        editions: &[EditionId],
        related: &mut Vec<AccountId>,
    ) -> Result<()> {
        let limit = self.config.crawler.max_related_per_account;
        let wanted = self.config.feed.audience_editions;
        if wanted == 0 || related.len() >= limit {
            return Ok(());
        }

        let mut seen: HashSet<String> = related.iter().map(AccountId::key).collect();
        seen.insert(account.key());
        let pages = self.config.feed.audience_pages;

        for &edition in editions.iter().take(wanted) {
            let audience = match self.source.fetch_release_audience(edition, pages).await {
                Ok(audience) => audience,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(
                        account = %account,
                        edition = %edition,
                        error = %e,
                        "Release audience unavailable"
                    );
                    continue;
                }
            };
            for candidate in audience {
                if related.len() >= limit {
                    return Ok(());
                }
                if seen.insert(candidate.key()) {
                    related.push(candidate);
                }
            }
        }
        Ok(())
    }

    /// Write phase: one transaction, then frontier bookkeeping and checkpoint
    fn commit_account(&mut self, entry: &FrontierEntry, fetched: FetchedAccount) -> Result<AccountOutcome> {
        let outcome = self.storage.write_interactions(&fetched.batch, self.policy)?;

        for (item_ref, reason) in &fetched.skipped_items {
            self.storage
                .record_skip(self.run_id, &entry.account, Some(item_ref), reason)?;
        }

        self.counters.accounts_processed += 1;
        self.counters.entries_written += outcome.entries_inserted + outcome.entries_updated;
        self.counters.edges_inserted += outcome.edges_inserted;
        self.counters.edges_updated += outcome.edges_updated;
        self.counters.items_skipped += fetched.skipped_items.len() as u64;
        self.counters.listings_truncated += fetched.truncated;

        let queued = self.frontier.discover(entry, &fetched.related);
        self.frontier.complete(&entry.account, true)?;

        let checkpoint =
            RunCheckpoint::new(self.run_id, Some(&entry.account), self.counters.clone());
        self.checkpoints
            .record_progress(self.storage.as_mut(), &checkpoint, &self.frontier.snapshot())?;

        info!(
            account = %entry.account,
            edges = fetched.batch.edges.len(),
            inserted = outcome.edges_inserted,
            updated = outcome.edges_updated,
            unchanged = outcome.edges_unchanged,
            truncated = fetched.truncated,
            queued,
            processed = self.frontier.processed(),
            "Account committed"
        );
        self.last_committed = Some(entry.account.clone());
        Ok(AccountOutcome::Committed)
    }

    fn handle_fetch_error(&mut self, entry: &FrontierEntry, e: GrooveError) -> Result<AccountOutcome> {
        let transport = match e {
            GrooveError::Transport(transport) => transport,
            other => return Err(other),
        };

        match transport {
            TransportError::SessionExpired { .. } => {
                warn!(account = %entry.account, error = %transport, "Halting run");
                self.stop_at(entry, AccountOutcome::SessionExpired)
            }
            TransportError::RateLimitExceeded { .. }
                if entry.deferrals < self.config.crawler.max_deferrals =>
            {
                let deferrals = self.frontier.defer(entry)?;
                self.counters.accounts_deferred += 1;
                self.storage.save_frontier(&self.frontier.snapshot())?;
                warn!(
                    account = %entry.account,
                    deferrals,
                    "Rate limit persisted, account moved to the back of the queue"
                );
                Ok(AccountOutcome::Deferred)
            }
            other => {
                warn!(account = %entry.account, error = %other, "Skipping account");
                self.storage
                    .record_skip(self.run_id, &entry.account, None, &other.to_string())?;
                self.frontier.complete(&entry.account, true)?;
                self.counters.accounts_processed += 1;
                self.counters.accounts_skipped += 1;

                // The checkpoint keeps naming the last committed account
                let checkpoint = RunCheckpoint::new(
                    self.run_id,
                    self.last_committed.as_ref(),
                    self.counters.clone(),
                );
                self.checkpoints
                    .record_attempt(self.storage.as_mut(), &checkpoint, &self.frontier.snapshot())?;
                Ok(AccountOutcome::Skipped)
            }
        }
    }

    /// Returns the in-progress account to the head of the queue and persists it
    fn stop_at(&mut self, entry: &FrontierEntry, outcome: AccountOutcome) -> Result<AccountOutcome> {
        self.frontier.requeue_front(entry)?;
        self.storage.save_frontier(&self.frontier.snapshot())?;
        Ok(outcome)
    }
}

/// Runs a crawl with the on-disk database and the live endpoints
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `config_hash` - Hash of the configuration file
/// * `fresh` - Discard the checkpoint and persisted frontier first
/// * `shutdown` - Signal that stops the run between accounts
///
/// # Example
///
/// ```no_run
/// use groove_ripple::config::load_config_with_hash;
/// use groove_ripple::crawler::{run_crawl, ShutdownSignal};
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (config, hash) = load_config_with_hash(Path::new("groove-ripple.toml"))?;
/// let report = run_crawl(config, &hash, false, ShutdownSignal::never()).await?;
/// println!("{} accounts processed", report.counters.accounts_processed);
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(
    config: Config,
    config_hash: &str,
    fresh: bool,
    shutdown: ShutdownSignal,
) -> Result<RunReport> {
    let mut coordinator = Coordinator::new(config, config_hash, fresh)?.with_shutdown(shutdown);
    coordinator.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halt_reason_maps_to_run_status() {
        assert_eq!(HaltReason::BudgetReached.run_status(), RunStatus::Completed);
        assert_eq!(HaltReason::FrontierExhausted.run_status(), RunStatus::Completed);
        assert_eq!(HaltReason::Interrupted.run_status(), RunStatus::Interrupted);
        assert_eq!(HaltReason::SessionExpired.run_status(), RunStatus::Halted);
        assert!(HaltReason::SessionExpired.is_fatal());
        assert!(!HaltReason::Interrupted.is_fatal());
    }

    #[test]
    fn test_halt_reason_serializes_snake_case() {
        let json = serde_json::to_string(&HaltReason::SessionExpired).unwrap();
        assert_eq!(json, "\"session_expired\"");
    }
}
