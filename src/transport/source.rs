//! The seam between the orchestrator and the remote service
//!
//! `RemoteSource` drives the rate-limited client over both endpoint
//! families. Tests substitute their own `InteractionSource`.

use crate::config::Config;
use crate::model::{AccountId, AccountProfile, CanonicalId, EditionId, EditionMetadata, InteractionKind, SourceKind};
use crate::transport::api::{self, ApiEndpoints};
use crate::transport::client::{RateLimitedClient, Request, RequestStats};
use crate::transport::feed::{self, FeedEndpoints};
use crate::transport::{InteractionSet, TransportError};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Lists whose contributors are considered per account
const MAX_LISTS_PER_ACCOUNT: usize = 5;

/// Result of looking up one edition
#[derive(Debug, Clone, PartialEq)]
pub struct EditionLookup {
    /// Grouping the edition belongs to, if it has one
    pub canonical: Option<CanonicalId>,
    pub metadata: EditionMetadata,
    /// Channel the metadata came from
    pub source: SourceKind,
}

/// Remote operations the orchestrator needs
#[async_trait]
pub trait InteractionSource: Send {
    /// Fetches the public profile of an account
    async fn fetch_profile(&mut self, account: &AccountId) -> Result<AccountProfile, TransportError>;

    /// Fetches every page of one interaction kind
    async fn fetch_interactions(
        &mut self,
        account: &AccountId,
        kind: InteractionKind,
    ) -> Result<InteractionSet, TransportError>;

    /// Collects accounts related to `account`, at most `limit` of them
    async fn fetch_related(
        &mut self,
        account: &AccountId,
        limit: usize,
    ) -> Result<Vec<AccountId>, TransportError>;

    /// Looks up the grouping and metadata of an edition
    async fn lookup_edition(&mut self, edition: EditionId) -> Result<EditionLookup, TransportError>;

    /// Collects accounts that have or want an edition from at most
    /// `max_pages` pages of its feed list
    async fn fetch_release_audience(
        &mut self,
        edition: EditionId,
        max_pages: u32,
    ) -> Result<Vec<AccountId>, TransportError>;

    /// Request counters so far
    fn request_stats(&self) -> RequestStats;
}

/// `InteractionSource` backed by the live API and feed
pub struct RemoteSource {
    client: RateLimitedClient,
    api: ApiEndpoints,
    feed: FeedEndpoints,
    feed_kinds: Vec<InteractionKind>,
    enrich_profiles: bool,
    lookup_channel: SourceKind,
    max_pages: u32,
}

impl RemoteSource {
    /// Creates a source from the configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Full configuration
    ///
    /// # Returns
    ///
    /// * `Ok(RemoteSource)` - Source ready to fetch
    /// * `Err(TransportError::Build)` - A base URL or the HTTP client is invalid
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        Ok(Self {
            client: RateLimitedClient::new(config)?,
            api: ApiEndpoints::new(&config.api.base_url, config.api.per_page)?,
            feed: FeedEndpoints::new(&config.feed.base_url)?,
            feed_kinds: config.feed.kinds.clone(),
            enrich_profiles: config.feed.enrich_profiles,
            lookup_channel: config.catalog.lookup_channel,
            max_pages: config.crawler.max_pages_per_kind.max(1),
        })
    }

    /// Channel a listing of `kind` is read from
    pub fn channel_for(&self, kind: InteractionKind) -> SourceKind {
        if self.feed_kinds.contains(&kind) {
            SourceKind::Feed
        } else {
            SourceKind::Api
        }
    }

    async fn fetch_api_list(
        &mut self,
        url: url::Url,
        key: &str,
    ) -> Result<Vec<AccountId>, TransportError> {
        let doc = self.client.fetch(&Request::api(url)).await?;
        api::parse_account_list(&doc.body, &doc.url, key)
    }

    async fn fetch_list_contributors(
        &mut self,
        account: &AccountId,
    ) -> Result<Vec<AccountId>, TransportError> {
        let doc = self.client.fetch(&Request::api(self.api.lists(account)?)).await?;
        let lists = api::parse_lists(&doc.body, &doc.url)?;

        let mut contributors = Vec::new();
        for resource in lists.iter().take(MAX_LISTS_PER_ACCOUNT) {
            let url = self.api.resource(resource)?;
            match self.client.fetch(&Request::api(url)).await {
                Ok(doc) => contributors.extend(api::parse_list_contributors(&doc.body, &doc.url)?),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(account = %account, list = %resource, error = %e, "Skipping list"),
            }
        }
        Ok(contributors)
    }
}

#[async_trait]
impl InteractionSource for RemoteSource {
    async fn fetch_profile(&mut self, account: &AccountId) -> Result<AccountProfile, TransportError> {
        let doc = self.client.fetch(&Request::api(self.api.profile(account)?)).await?;
        let mut profile = api::parse_profile(&doc.body, &doc.url, account)?;

        if self.enrich_profiles && (profile.location.is_none() || profile.joined_at.is_none()) {
            let url = self.feed.profile(account)?;
            match self.client.fetch(&Request::feed(url)).await {
                Ok(page) => {
                    let extra = feed::parse_profile_page(&page.body, account);
                    profile.location = profile.location.or(extra.location);
                    profile.joined_at = profile.joined_at.or(extra.joined_at);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!(account = %account, error = %e, "Profile page unavailable"),
            }
        }
        Ok(profile)
    }

    async fn fetch_interactions(
        &mut self,
        account: &AccountId,
        kind: InteractionKind,
    ) -> Result<InteractionSet, TransportError> {
        let channel = self.channel_for(kind);
        let mut set = InteractionSet::new(channel);
        let mut page = 1;

        loop {
            let parsed = match channel {
                SourceKind::Api => {
                    let url = self.api.interactions(account, kind, page)?;
                    let doc = self.client.fetch(&Request::api(url)).await?;
                    api::parse_interaction_page(kind, &doc.body, &doc.url)?
                }
                SourceKind::Feed => {
                    let url = self.feed.interactions(account, kind, page)?;
                    let doc = self.client.fetch(&Request::feed(url)).await?;
                    feed::parse_interaction_page(kind, &doc.body, &doc.url, page)?
                }
            };
            let has_next = parsed.has_next();
            set.extend(parsed);

            if !has_next {
                break;
            }
            if page >= self.max_pages {
                info!(
                    account = %account,
                    kind = %kind,
                    pages = page,
                    "Page limit reached, listing truncated"
                );
                set.truncated = true;
                break;
            }
            page += 1;
        }

        debug!(
            account = %account,
            kind = %kind,
            items = set.items.len(),
            malformed = set.malformed.len(),
            pages = set.pages_fetched,
            "Fetched interactions"
        );
        Ok(set)
    }

    async fn fetch_related(
        &mut self,
        account: &AccountId,
        limit: usize,
    ) -> Result<Vec<AccountId>, TransportError> {
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(account.key());
        let mut related = Vec::new();

        let mut take = |candidates: Vec<AccountId>, related: &mut Vec<AccountId>| {
            for candidate in candidates {
                if related.len() >= limit {
                    break;
                }
                if !candidate.is_empty() && seen.insert(candidate.key()) {
                    related.push(candidate);
                }
            }
        };

        let following = self.api.following(account)?;
        match self.fetch_api_list(following, "following").await {
            Ok(found) => take(found, &mut related),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(account = %account, error = %e, "Following list unavailable"),
        }

        if related.len() < limit {
            let followers = self.api.followers(account)?;
            match self.fetch_api_list(followers, "followers").await {
                Ok(found) => take(found, &mut related),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(account = %account, error = %e, "Followers list unavailable"),
            }
        }

        if related.len() < limit {
            match self.fetch_list_contributors(account).await {
                Ok(found) => take(found, &mut related),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(account = %account, error = %e, "Lists unavailable"),
            }
        }

        Ok(related)
    }

    async fn lookup_edition(&mut self, edition: EditionId) -> Result<EditionLookup, TransportError> {
        match self.lookup_channel {
            SourceKind::Api => {
                let doc = self.client.fetch(&Request::api(self.api.release(edition)?)).await?;
                api::parse_release(&doc.body, &doc.url)
            }
            SourceKind::Feed => {
                let doc = self.client.fetch(&Request::feed(self.feed.release(edition)?)).await?;
                Ok(feed::parse_release_page(&doc.body))
            }
        }
    }

    async fn fetch_release_audience(
        &mut self,
        edition: EditionId,
        max_pages: u32,
    ) -> Result<Vec<AccountId>, TransportError> {
        let mut seen = HashSet::new();
        let mut audience = Vec::new();

        for page in 1..=max_pages.max(1) {
            let url = self.feed.release_audience(edition, page)?;
            let doc = self.client.fetch(&Request::feed(url)).await?;
            let before = audience.len();
            for account in feed::parse_release_audience(&doc.body) {
                if seen.insert(account.key()) {
                    audience.push(account);
                }
            }
            // An empty or repeated page means the list has ended
            if audience.len() == before {
                break;
            }
        }

        debug!(edition = %edition, accounts = audience.len(), "Fetched release audience");
        Ok(audience)
    }

    fn request_stats(&self) -> RequestStats {
        self.client.stats().clone()
    }
}
