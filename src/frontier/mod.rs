//! Frontier manager
//!
//! Breadth-first queue over accounts, bounded by depth and by the
//! processed-account budget. Account keys compare case-insensitively.
//! Accounts found in the visited log start out `Done` and are never queued
//! again unless force-reprocess is set.

use crate::model::AccountId;
use crate::state::AccountState;
use crate::{GrooveError, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info};

/// An account waiting in the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub account: AccountId,
    /// Hops from the nearest seed
    pub depth: u32,
    /// Times this account went back to the queue after rate limiting
    pub deferrals: u32,
    /// Taken from the auxiliary seed pool
    pub from_pool: bool,
}

impl FrontierEntry {
    pub fn new(account: AccountId, depth: u32) -> Self {
        Self {
            account,
            depth,
            deferrals: 0,
            from_pool: false,
        }
    }

    fn pooled(account: AccountId) -> Self {
        Self {
            from_pool: true,
            ..Self::new(account, 0)
        }
    }
}

/// BFS frontier with a durable visited set
pub struct Frontier {
    queue: VecDeque<FrontierEntry>,
    states: HashMap<String, AccountState>,
    pool: VecDeque<AccountId>,
    in_progress: Option<FrontierEntry>,
    processed: u64,
    max_accounts: u64,
    max_depth: u32,
    force: bool,
}

impl Frontier {
    /// Creates an empty frontier
    ///
    /// # Arguments
    ///
    /// * `max_accounts` - Processed-account budget
    /// * `max_depth` - Deepest BFS level that may be queued
    /// * `force` - Ignore the visited set
    /// * `visited` - Lowercased keys of accounts already done
    pub fn new(max_accounts: u32, max_depth: u32, force: bool, visited: HashSet<String>) -> Self {
        let states = if force {
            HashMap::new()
        } else {
            visited
                .into_iter()
                .map(|key| (key, AccountState::Done))
                .collect()
        };

        Self {
            queue: VecDeque::new(),
            states,
            pool: VecDeque::new(),
            in_progress: None,
            processed: 0,
            max_accounts: u64::from(max_accounts),
            max_depth,
            force,
        }
    }

    /// Enqueues accounts at depth 0
    ///
    /// Returns the number of accounts actually queued.
    pub fn seed(&mut self, accounts: &[AccountId]) -> usize {
        accounts
            .iter()
            .filter(|account| self.enqueue(FrontierEntry::new((*account).clone(), 0)))
            .count()
    }

    /// Sets the auxiliary accounts used once the queue runs dry
    pub fn set_seed_pool(&mut self, accounts: Vec<AccountId>) {
        self.pool = accounts.into();
    }

    /// Rebuilds the queue from a persisted snapshot
    ///
    /// Entries keep their order, depth and deferral count. Accounts that are
    /// already done are dropped.
    pub fn restore(&mut self, snapshot: Vec<FrontierEntry>) -> usize {
        snapshot
            .into_iter()
            .filter(|entry| self.enqueue(entry.clone()))
            .count()
    }

    /// Pops the next account to process
    ///
    /// Returns `None` when the budget is reached, or when both the queue and
    /// the seed pool are exhausted.
    pub fn next(&mut self) -> Option<FrontierEntry> {
        if self.budget_reached() {
            return None;
        }

        let entry = loop {
            if let Some(entry) = self.queue.pop_front() {
                if self.state_of(&entry.account) == AccountState::Queued {
                    break entry;
                }
                continue;
            }
            let account = self.pool.pop_front()?;
            if self.state_of(&account).is_known() {
                continue;
            }
            info!(account = %account, "Frontier exhausted, taking account from seed pool");
            break FrontierEntry::pooled(account);
        };

        self.states
            .insert(entry.account.key(), AccountState::InProgress);
        self.in_progress = Some(entry.clone());
        Some(entry)
    }

    /// Enqueues related accounts one level below `from`
    ///
    /// Accounts already known to the frontier, and anything deeper than the
    /// configured maximum, are ignored. Returns the number queued.
    pub fn discover(&mut self, from: &FrontierEntry, related: &[AccountId]) -> usize {
        let depth = from.depth + 1;
        if depth > self.max_depth {
            return 0;
        }

        let queued = related
            .iter()
            .filter(|account| **account != from.account)
            .filter(|account| self.enqueue(FrontierEntry::new((*account).clone(), depth)))
            .count();

        if queued > 0 {
            debug!(account = %from.account, queued, depth, "Discovered related accounts");
        }
        queued
    }

    /// Marks the in-progress account done
    ///
    /// # Arguments
    ///
    /// * `account` - The account returned by the last `next()`
    /// * `counts_toward_budget` - False for accounts skipped by the prior-data filter
    pub fn complete(&mut self, account: &AccountId, counts_toward_budget: bool) -> Result<()> {
        self.transition(account, AccountState::Done)?;
        self.in_progress = None;
        if counts_toward_budget {
            self.processed += 1;
        }
        Ok(())
    }

    /// Sends the in-progress account to the back of the queue
    ///
    /// Returns the entry's new deferral count.
    pub fn defer(&mut self, entry: &FrontierEntry) -> Result<u32> {
        self.transition(&entry.account, AccountState::Queued)?;
        let mut deferred = entry.clone();
        deferred.deferrals += 1;
        let deferrals = deferred.deferrals;
        self.queue.push_back(deferred);
        self.in_progress = None;
        Ok(deferrals)
    }

    /// Puts the in-progress account back at the head of the queue
    pub fn requeue_front(&mut self, entry: &FrontierEntry) -> Result<()> {
        self.transition(&entry.account, AccountState::Queued)?;
        self.queue.push_front(entry.clone());
        self.in_progress = None;
        Ok(())
    }

    /// Marks an account done without it passing through the queue
    pub fn mark_done(&mut self, account: &AccountId) {
        self.queue.retain(|e| e.account != *account);
        self.states.insert(account.key(), AccountState::Done);
    }

    /// Pending queue with any in-progress account at its head
    pub fn snapshot(&self) -> Vec<FrontierEntry> {
        self.in_progress
            .iter()
            .chain(self.queue.iter())
            .cloned()
            .collect()
    }

    pub fn state_of(&self, account: &AccountId) -> AccountState {
        self.states
            .get(&account.key())
            .copied()
            .unwrap_or(AccountState::Unseen)
    }

    pub fn budget_reached(&self) -> bool {
        self.processed >= self.max_accounts
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Restores the processed count of a resumed run
    pub fn set_processed(&mut self, processed: u64) {
        self.processed = processed;
    }

    /// Accounts queued, not counting the seed pool
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_force(&self) -> bool {
        self.force
    }

    fn enqueue(&mut self, entry: FrontierEntry) -> bool {
        if entry.account.is_empty() || self.state_of(&entry.account).is_known() {
            return false;
        }
        self.states
            .insert(entry.account.key(), AccountState::Queued);
        self.queue.push_back(entry);
        true
    }

    fn transition(&mut self, account: &AccountId, to: AccountState) -> Result<()> {
        let from = self.state_of(account);
        if !from.can_transition_to(to) {
            return Err(GrooveError::InvalidTransition {
                account: account.to_string(),
                from,
                to,
            });
        }
        self.states.insert(account.key(), to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<AccountId> {
        names.iter().map(|n| AccountId::new(*n)).collect()
    }

    fn frontier(max_accounts: u32, max_depth: u32) -> Frontier {
        Frontier::new(max_accounts, max_depth, false, HashSet::new())
    }

    fn drain(frontier: &mut Frontier, graph: &HashMap<&str, Vec<&str>>) -> Vec<String> {
        let mut order = Vec::new();
        while let Some(entry) = frontier.next() {
            let key = entry.account.key();
            let related = ids(graph.get(key.as_str()).map(Vec::as_slice).unwrap_or(&[]));
            frontier.discover(&entry, &related);
            frontier.complete(&entry.account, true).unwrap();
            order.push(key);
        }
        order
    }

    #[test]
    fn test_breadth_first_order_visits_shared_neighbor_once() {
        let graph = HashMap::from([("a", vec!["c", "d"]), ("b", vec!["d", "e"])]);
        let mut frontier = frontier(50, 3);
        frontier.seed(&ids(&["a", "b"]));

        let order = drain(&mut frontier, &graph);
        assert_eq!(order, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_budget_stops_iteration() {
        let graph = HashMap::from([("a", vec!["b", "c", "d", "e"])]);
        let mut frontier = frontier(3, 3);
        frontier.seed(&ids(&["a"]));

        let order = drain(&mut frontier, &graph);
        assert_eq!(order.len(), 3);
        assert!(frontier.budget_reached());
        assert!(frontier.next().is_none());
    }

    #[test]
    fn test_filtered_accounts_do_not_consume_budget() {
        let mut frontier = frontier(1, 3);
        frontier.seed(&ids(&["a", "b"]));

        let a = frontier.next().unwrap();
        frontier.complete(&a.account, false).unwrap();
        let b = frontier.next().unwrap();
        assert_eq!(b.account, AccountId::new("b"));
    }

    #[test]
    fn test_depth_limit() {
        let mut frontier = frontier(50, 1);
        frontier.seed(&ids(&["a"]));
        let a = frontier.next().unwrap();
        assert_eq!(frontier.discover(&a, &ids(&["b"])), 1);
        frontier.complete(&a.account, true).unwrap();

        let b = frontier.next().unwrap();
        assert_eq!(b.depth, 1);
        assert_eq!(frontier.discover(&b, &ids(&["c"])), 0);
    }

    #[test]
    fn test_visited_accounts_are_not_requeued() {
        let visited = HashSet::from(["b".to_string()]);
        let mut frontier = Frontier::new(50, 3, false, visited);
        frontier.seed(&ids(&["a", "B"]));

        assert_eq!(frontier.pending(), 1);
        assert_eq!(frontier.state_of(&AccountId::new("b")), AccountState::Done);
    }

    #[test]
    fn test_force_ignores_visited() {
        let visited = HashSet::from(["a".to_string()]);
        let mut frontier = Frontier::new(50, 3, true, visited);
        assert_eq!(frontier.seed(&ids(&["a"])), 1);
    }

    #[test]
    fn test_case_insensitive_dedup() {
        let mut frontier = frontier(50, 3);
        assert_eq!(frontier.seed(&ids(&["Alice", "alice", "ALICE"])), 1);
    }

    #[test]
    fn test_seed_pool_used_after_exhaustion() {
        let mut frontier = frontier(50, 3);
        frontier.seed(&ids(&["a"]));
        frontier.set_seed_pool(ids(&["a", "p1"]));

        let a = frontier.next().unwrap();
        frontier.complete(&a.account, true).unwrap();

        let pooled = frontier.next().unwrap();
        assert_eq!(pooled.account, AccountId::new("p1"));
        assert!(pooled.from_pool);
        frontier.complete(&pooled.account, true).unwrap();

        assert!(frontier.next().is_none());
    }

    #[test]
    fn test_defer_moves_account_to_tail() {
        let mut frontier = frontier(50, 3);
        frontier.seed(&ids(&["a", "b"]));

        let a = frontier.next().unwrap();
        assert_eq!(frontier.defer(&a).unwrap(), 1);

        let b = frontier.next().unwrap();
        assert_eq!(b.account, AccountId::new("b"));
        frontier.complete(&b.account, true).unwrap();

        let again = frontier.next().unwrap();
        assert_eq!(again.account, AccountId::new("a"));
        assert_eq!(again.deferrals, 1);
    }

    #[test]
    fn test_snapshot_puts_in_progress_first() {
        let mut frontier = frontier(50, 3);
        frontier.seed(&ids(&["a", "b"]));
        let a = frontier.next().unwrap();

        let snapshot = frontier.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].account, a.account);

        let mut restored = Frontier::new(50, 3, false, HashSet::new());
        assert_eq!(restored.restore(snapshot), 2);
        assert_eq!(restored.next().unwrap().account, AccountId::new("a"));
    }

    #[test]
    fn test_complete_requires_in_progress() {
        let mut frontier = frontier(50, 3);
        frontier.seed(&ids(&["a"]));
        assert!(matches!(
            frontier.complete(&AccountId::new("a"), true),
            Err(GrooveError::InvalidTransition { .. })
        ));
    }
}
