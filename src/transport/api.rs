//! Structured API endpoints and JSON document parsing
//!
//! Items are parsed one by one from `serde_json::Value`, so a single bad
//! entry is reported as malformed without losing the rest of the page.

use crate::model::{
    normalize_rating, AccountId, AccountProfile, CanonicalId, EditionId, EditionMetadata,
    Interaction, InteractionKind, Observation, SourceKind,
};
use crate::transport::source::EditionLookup;
use crate::transport::{InteractionPage, MalformedItem, TransportError};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use url::Url;

/// Builds API URLs below a base URL
#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    base: Url,
    per_page: u32,
}

impl ApiEndpoints {
    pub fn new(base_url: &str, per_page: u32) -> Result<Self, TransportError> {
        let base = Url::parse(base_url)
            .map_err(|e| TransportError::Build(format!("invalid API base URL {base_url}: {e}")))?;
        Ok(Self { base, per_page })
    }

    pub fn profile(&self, account: &AccountId) -> Result<Url, TransportError> {
        self.endpoint(&["users", account.as_str()])
    }

    pub fn interactions(
        &self,
        account: &AccountId,
        kind: InteractionKind,
        page: u32,
    ) -> Result<Url, TransportError> {
        let user = account.as_str();
        let mut url = match kind {
            InteractionKind::Collection => {
                self.endpoint(&["users", user, "collection", "folders", "0", "releases"])?
            }
            InteractionKind::Wantlist => self.endpoint(&["users", user, "wants"])?,
            InteractionKind::Contribution => self.endpoint(&["users", user, "contributions"])?,
        };
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &self.per_page.to_string());
        Ok(url)
    }

    pub fn following(&self, account: &AccountId) -> Result<Url, TransportError> {
        self.endpoint(&["users", account.as_str(), "following"])
    }

    pub fn followers(&self, account: &AccountId) -> Result<Url, TransportError> {
        self.endpoint(&["users", account.as_str(), "followers"])
    }

    pub fn lists(&self, account: &AccountId) -> Result<Url, TransportError> {
        self.endpoint(&["users", account.as_str(), "lists"])
    }

    pub fn release(&self, edition: EditionId) -> Result<Url, TransportError> {
        self.endpoint(&["releases", &edition.to_string()])
    }

    /// Resolves a `resource_url` returned by the API
    ///
    /// Absolute URLs are used as given; relative ones are joined to the base.
    pub fn resource(&self, resource_url: &str) -> Result<Url, TransportError> {
        self.base
            .join(resource_url)
            .map_err(|e| TransportError::Build(format!("invalid resource URL {resource_url}: {e}")))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Build(format!("API base URL {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Parses `/users/{u}`
pub fn parse_profile(body: &str, url: &str, requested: &AccountId) -> Result<AccountProfile, TransportError> {
    let doc = parse_json(body, url)?;
    let account = doc
        .get("username")
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .map(AccountId::new)
        .unwrap_or_else(|| requested.clone());

    Ok(AccountProfile {
        account,
        location: text(&doc, "location"),
        joined_at: doc.get("registered").and_then(Value::as_str).and_then(parse_date),
    })
}

/// Parses one page of collection, wantlist or contribution items
pub fn parse_interaction_page(
    kind: InteractionKind,
    body: &str,
    url: &str,
) -> Result<InteractionPage, TransportError> {
    let doc = parse_json(body, url)?;
    let key = match kind {
        InteractionKind::Collection => "releases",
        InteractionKind::Wantlist => "wants",
        InteractionKind::Contribution => "contributions",
    };
    let items = doc
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| TransportError::malformed(url, format!("missing \"{key}\" array")))?;

    let pagination = doc.get("pagination");
    let page = pagination
        .and_then(|p| p.get("page"))
        .and_then(Value::as_u64)
        .unwrap_or(1) as u32;
    let pages = pagination
        .and_then(|p| p.get("pages"))
        .and_then(Value::as_u64)
        .unwrap_or(1) as u32;

    let mut result = InteractionPage {
        page,
        pages,
        ..Default::default()
    };

    for item in items {
        let parsed = match kind {
            InteractionKind::Contribution => parse_contribution(item),
            _ => parse_listed_release(item).map(Some),
        };
        match parsed {
            Ok(Some(observation)) => result.items.push(Interaction::new(kind, observation)),
            Ok(None) => {}
            Err(reason) => result.malformed.push(MalformedItem {
                raw_id: raw_id(item),
                reason,
            }),
        }
    }
    Ok(result)
}

/// Parses the account names in a `following` or `followers` listing
pub fn parse_account_list(body: &str, url: &str, key: &str) -> Result<Vec<AccountId>, TransportError> {
    let doc = parse_json(body, url)?;
    Ok(doc
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(account_name).collect())
        .unwrap_or_default())
}

/// Parses `/users/{u}/lists` into list resource URLs
pub fn parse_lists(body: &str, url: &str) -> Result<Vec<String>, TransportError> {
    let doc = parse_json(body, url)?;
    Ok(doc
        .get("lists")
        .and_then(Value::as_array)
        .map(|lists| {
            lists
                .iter()
                .filter_map(|l| l.get("resource_url").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default())
}

/// Parses the contributors of one list
pub fn parse_list_contributors(body: &str, url: &str) -> Result<Vec<AccountId>, TransportError> {
    parse_account_list(body, url, "contributors")
}

/// Parses `/releases/{id}` into a canonical grouping plus metadata
pub fn parse_release(body: &str, url: &str) -> Result<EditionLookup, TransportError> {
    let doc = parse_json(body, url)?;
    let canonical = doc
        .get("master_id")
        .and_then(Value::as_u64)
        .filter(|id| *id > 0)
        .map(CanonicalId);

    let community = doc.get("community");
    let rating = community.and_then(|c| c.get("rating"));

    let metadata = EditionMetadata {
        title: text(&doc, "title"),
        artist: joined_names(&doc, "artists"),
        genres: string_list(&doc, "genres"),
        styles: string_list(&doc, "styles"),
        country: text(&doc, "country"),
        released: text(&doc, "released"),
        year: year(&doc),
        image: doc
            .get("images")
            .and_then(Value::as_array)
            .and_then(|images| images.first())
            .and_then(|image| text(image, "uri")),
        format_summary: joined_names(&doc, "formats"),
        label_summary: joined_names(&doc, "labels"),
        have_count: community.and_then(|c| c.get("have")).and_then(Value::as_i64),
        want_count: community.and_then(|c| c.get("want")).and_then(Value::as_i64),
        rating_avg: rating.and_then(|r| r.get("average")).and_then(Value::as_f64),
        rating_count: rating.and_then(|r| r.get("count")).and_then(Value::as_i64),
    };

    Ok(EditionLookup {
        canonical,
        metadata,
        source: SourceKind::Api,
    })
}

fn parse_listed_release(item: &Value) -> Result<Observation, String> {
    let info = item.get("basic_information");
    let edition = item
        .get("id")
        .and_then(Value::as_u64)
        .or_else(|| info.and_then(|i| i.get("id")).and_then(Value::as_u64))
        .filter(|id| *id > 0)
        .ok_or("missing release id")?;

    let mut observation = Observation::new(EditionId(edition));
    observation.rating = item.get("rating").and_then(Value::as_f64).and_then(normalize_rating);
    observation.added_at = item
        .get("date_added")
        .and_then(Value::as_str)
        .and_then(parse_date);
    observation.review = item.get("notes").and_then(notes_text);

    if let Some(info) = info {
        observation.canonical_hint = info
            .get("master_id")
            .and_then(Value::as_u64)
            .filter(|id| *id > 0)
            .map(CanonicalId);
        observation.metadata = EditionMetadata {
            title: text(info, "title"),
            artist: joined_names(info, "artists"),
            genres: string_list(info, "genres"),
            styles: string_list(info, "styles"),
            year: year(info),
            image: text(info, "cover_image"),
            format_summary: joined_names(info, "formats"),
            label_summary: joined_names(info, "labels"),
            ..Default::default()
        };
    }
    Ok(observation)
}

/// Contributions list several entity types; only releases become edges
fn parse_contribution(item: &Value) -> Result<Option<Observation>, String> {
    if let Some(entity) = item.get("entity_type_name").and_then(Value::as_str) {
        if !entity.eq_ignore_ascii_case("release") {
            return Ok(None);
        }
    }
    let edition = item
        .get("entity_id")
        .or_else(|| item.get("id"))
        .and_then(Value::as_u64)
        .filter(|id| *id > 0)
        .ok_or("missing release id")?;

    let mut observation = Observation::new(EditionId(edition));
    observation.canonical_hint = item
        .get("master_id")
        .and_then(Value::as_u64)
        .filter(|id| *id > 0)
        .map(CanonicalId);
    observation.metadata.title = text(item, "title");
    observation.metadata.artist = text(item, "artist").or_else(|| joined_names(item, "artists"));
    observation.metadata.year = year(item);
    Ok(Some(observation))
}

fn parse_json(body: &str, url: &str) -> Result<Value, TransportError> {
    serde_json::from_str(body).map_err(|e| TransportError::malformed(url, e.to_string()))
}

fn account_name(value: &Value) -> Option<AccountId> {
    let name = match value {
        Value::String(s) => s.as_str(),
        other => other.get("username").and_then(Value::as_str)?,
    };
    let account = AccountId::new(name);
    (!account.is_empty()).then_some(account)
}

fn raw_id(item: &Value) -> String {
    ["id", "entity_id"]
        .iter()
        .find_map(|key| item.get(*key))
        .map(|v| v.to_string())
        .unwrap_or_else(|| item.to_string().chars().take(80).collect())
}

fn text(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Joins the `name` field of an array of objects
fn joined_names(value: &Value, key: &str) -> Option<String> {
    let names: Vec<&str> = value
        .get(key)?
        .as_array()?
        .iter()
        .filter_map(|v| v.get("name").and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    (!names.is_empty()).then(|| names.join(", "))
}

fn year(value: &Value) -> Option<i32> {
    value
        .get("year")
        .and_then(Value::as_i64)
        .and_then(|y| i32::try_from(y).ok())
        .filter(|y| *y > 0)
}

fn notes_text(notes: &Value) -> Option<String> {
    match notes {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Array(fields) => {
            let joined = fields
                .iter()
                .filter_map(|f| f.get("value").and_then(Value::as_str))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            (!joined.is_empty()).then_some(joined)
        }
        _ => None,
    }
}

/// Parses RFC 3339 timestamps and plain `YYYY-MM-DD` dates
pub(crate) fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|t| t.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLLECTION_PAGE: &str = r#"{
        "pagination": {"page": 1, "pages": 2, "per_page": 50, "items": 3},
        "releases": [
            {
                "id": 100,
                "rating": 4,
                "date_added": "2021-06-05T10:40:59-07:00",
                "basic_information": {
                    "id": 100,
                    "master_id": 9000,
                    "title": "Blue Lines",
                    "year": 1991,
                    "artists": [{"name": "Massive Attack"}],
                    "genres": ["Electronic"],
                    "styles": ["Trip Hop"],
                    "formats": [{"name": "Vinyl"}],
                    "labels": [{"name": "Wild Bunch"}]
                }
            },
            {"id": 101, "rating": 0, "basic_information": {"id": 101, "master_id": 0, "title": "Demo"}},
            {"rating": 3, "basic_information": {"title": "No id"}}
        ]
    }"#;

    #[test]
    fn test_endpoints() {
        let api = ApiEndpoints::new("https://api.discogs.com", 50).unwrap();
        let account = AccountId::new("dj bob");

        assert_eq!(
            api.profile(&account).unwrap().as_str(),
            "https://api.discogs.com/users/dj%20bob"
        );
        assert_eq!(
            api.interactions(&account, InteractionKind::Collection, 2)
                .unwrap()
                .as_str(),
            "https://api.discogs.com/users/dj%20bob/collection/folders/0/releases?page=2&per_page=50"
        );
        assert_eq!(
            api.release(EditionId(42)).unwrap().as_str(),
            "https://api.discogs.com/releases/42"
        );
        assert_eq!(
            api.resource("https://api.discogs.com/lists/7").unwrap().as_str(),
            "https://api.discogs.com/lists/7"
        );
    }

    #[test]
    fn test_parse_collection_page() {
        let page =
            parse_interaction_page(InteractionKind::Collection, COLLECTION_PAGE, "test").unwrap();

        assert_eq!(page.page, 1);
        assert_eq!(page.pages, 2);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.malformed.len(), 1);

        let first = page.items[0].observation();
        assert_eq!(first.edition, EditionId(100));
        assert_eq!(first.canonical_hint, Some(CanonicalId(9000)));
        assert_eq!(first.rating, Some(4));
        assert!(first.added_at.is_some());
        assert_eq!(first.metadata.artist.as_deref(), Some("Massive Attack"));
        assert_eq!(first.metadata.year, Some(1991));

        let second = page.items[1].observation();
        assert_eq!(second.canonical_hint, None);
        assert_eq!(second.rating, None);
        assert_eq!(page.items[1].edge_rating(), Some(0));
    }

    #[test]
    fn test_missing_listing_is_malformed() {
        let err = parse_interaction_page(InteractionKind::Wantlist, r#"{"releases": []}"#, "u")
            .unwrap_err();
        assert!(matches!(err, TransportError::Malformed { .. }));

        let err = parse_interaction_page(InteractionKind::Wantlist, "<html>", "u").unwrap_err();
        assert!(matches!(err, TransportError::Malformed { .. }));
    }

    #[test]
    fn test_contributions_keep_only_releases() {
        let body = r#"{"contributions": [
            {"entity_type_name": "release", "entity_id": 55},
            {"entity_type_name": "artist", "entity_id": 7},
            {"entity_type_name": "release"}
        ]}"#;
        let page = parse_interaction_page(InteractionKind::Contribution, body, "u").unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].observation().edition, EditionId(55));
        assert_eq!(page.items[0].edge_rating(), None);
        assert_eq!(page.malformed.len(), 1);
    }

    #[test]
    fn test_parse_profile() {
        let profile = parse_profile(
            r#"{"username": "Alice", "location": "Lyon", "registered": "2012-03-05T08:00:00-08:00"}"#,
            "u",
            &AccountId::new("alice"),
        )
        .unwrap();
        assert_eq!(profile.account.as_str(), "Alice");
        assert_eq!(profile.location.as_deref(), Some("Lyon"));
        assert!(profile.joined_at.is_some());

        let bare = parse_profile("{}", "u", &AccountId::new("bob")).unwrap();
        assert_eq!(bare.account.as_str(), "bob");
        assert_eq!(bare.location, None);
    }

    #[test]
    fn test_parse_related_accounts() {
        let following = parse_account_list(
            r#"{"following": [{"username": "carol"}, {"username": ""}, {"id": 3}]}"#,
            "u",
            "following",
        )
        .unwrap();
        assert_eq!(following, vec![AccountId::new("carol")]);

        let contributors =
            parse_list_contributors(r#"{"contributors": ["dave", {"username": "erin"}]}"#, "u")
                .unwrap();
        assert_eq!(contributors.len(), 2);

        let lists = parse_lists(
            r#"{"lists": [{"resource_url": "https://api.discogs.com/lists/1", "name": "Faves"}]}"#,
            "u",
        )
        .unwrap();
        assert_eq!(lists, vec!["https://api.discogs.com/lists/1".to_string()]);
    }

    #[test]
    fn test_parse_release() {
        let body = r#"{
            "id": 100, "master_id": 9000, "title": "Blue Lines",
            "artists": [{"name": "Massive Attack"}],
            "country": "UK", "released": "1991-04-08", "year": 1991,
            "images": [{"uri": "https://img/1.jpg"}],
            "community": {"have": 1200, "want": 300, "rating": {"average": 4.6, "count": 210}}
        }"#;
        let lookup = parse_release(body, "u").unwrap();
        assert_eq!(lookup.canonical, Some(CanonicalId(9000)));
        assert_eq!(lookup.metadata.country.as_deref(), Some("UK"));
        assert_eq!(lookup.metadata.image.as_deref(), Some("https://img/1.jpg"));
        assert_eq!(lookup.metadata.have_count, Some(1200));
        assert_eq!(lookup.metadata.rating_count, Some(210));

        let ungrouped = parse_release(r#"{"id": 101, "master_id": 0}"#, "u").unwrap();
        assert_eq!(ungrouped.canonical, None);
    }

    #[test]
    fn test_parse_date_formats() {
        assert!(parse_date("2021-06-05T10:40:59-07:00").is_some());
        assert!(parse_date("2021-06-05").is_some());
        assert!(parse_date("June 2021").is_none());
    }
}
