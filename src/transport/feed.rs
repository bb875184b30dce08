//! Document feed endpoints and HTML parsing
//!
//! The feed serves the same listings as the API, as paged HTML. Item rows
//! are located by their release link; ratings, dates and master links are
//! read from inside the row.

use crate::model::{
    normalize_rating, AccountId, AccountProfile, CanonicalId, EditionId, EditionMetadata,
    Interaction, InteractionKind, Observation, SourceKind,
};
use crate::transport::api::parse_date;
use crate::transport::source::EditionLookup;
use crate::transport::{InteractionPage, MalformedItem, TransportError};
use chrono::{DateTime, NaiveDate, Utc};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Accounts requested per page of a release's have/want list
const AUDIENCE_PAGE_SIZE: u32 = 50;

/// Builds feed URLs below a base URL
#[derive(Debug, Clone)]
pub struct FeedEndpoints {
    base: Url,
}

impl FeedEndpoints {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let base = Url::parse(base_url)
            .map_err(|e| TransportError::Build(format!("invalid feed base URL {base_url}: {e}")))?;
        Ok(Self { base })
    }

    pub fn profile(&self, account: &AccountId) -> Result<Url, TransportError> {
        self.endpoint(&["user", account.as_str()])
    }

    pub fn interactions(
        &self,
        account: &AccountId,
        kind: InteractionKind,
        page: u32,
    ) -> Result<Url, TransportError> {
        let listing = match kind {
            InteractionKind::Collection => "collection",
            InteractionKind::Wantlist => "wantlist",
            InteractionKind::Contribution => "contributions",
        };
        let mut url = self.endpoint(&["user", account.as_str(), listing])?;
        url.query_pairs_mut().append_pair("page", &page.to_string());
        Ok(url)
    }

    pub fn release(&self, edition: EditionId) -> Result<Url, TransportError> {
        self.endpoint(&["release", &edition.to_string()])
    }

    /// Page of the accounts that have or want an edition
    pub fn release_audience(&self, edition: EditionId, page: u32) -> Result<Url, TransportError> {
        let mut url = self.endpoint(&["release", "stats", &edition.to_string()])?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &AUDIENCE_PAGE_SIZE.to_string());
        Ok(url)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Build(format!("feed base URL {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Parses a profile page
///
/// Location and join date are read from the element that follows their
/// label (`Location:`, `Joined:`).
pub fn parse_profile_page(html: &str, requested: &AccountId) -> AccountProfile {
    let document = Html::parse_document(html);

    let account = selector("meta[property='profile:username']")
        .and_then(|sel| document.select(&sel).next())
        .and_then(|meta| meta.value().attr("content"))
        .map(AccountId::new)
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| requested.clone());

    let labels = labelled_values(&document);
    let location = labels.get("location").cloned();
    let joined_at = labels.get("joined").and_then(|raw| parse_feed_date(raw));

    AccountProfile {
        account,
        location,
        joined_at,
    }
}

/// Parses one HTML listing page
///
/// # Arguments
///
/// * `kind` - Listing being parsed
/// * `html` - Page body
/// * `url` - Page URL, used in errors
/// * `page` - 1-based number of this page
pub fn parse_interaction_page(
    kind: InteractionKind,
    html: &str,
    url: &str,
    page: u32,
) -> Result<InteractionPage, TransportError> {
    let document = Html::parse_document(html);
    let rows_sel = selector("[data-release-id], tr.shortcut_navigable, li.release-item")
        .ok_or_else(|| TransportError::malformed(url, "invalid row selector"))?;
    let link_sel = selector("a[href*='/release/']")
        .ok_or_else(|| TransportError::malformed(url, "invalid link selector"))?;

    let mut result = InteractionPage {
        page,
        pages: page,
        ..Default::default()
    };
    let mut seen = HashSet::new();

    let rows: Vec<ElementRef> = document.select(&rows_sel).collect();
    if rows.is_empty() {
        // Bare listings carry nothing but release links
        for link in document.select(&link_sel) {
            let Some(edition) = link.value().attr("href").and_then(|h| id_after(h, "/release/"))
            else {
                continue;
            };
            if seen.insert(edition) {
                let mut observation = Observation::new(EditionId(edition));
                observation.metadata.title = element_text(&link);
                result.items.push(Interaction::new(kind, observation));
            }
        }
    } else {
        for row in rows {
            match parse_row(&row, &link_sel) {
                Ok(observation) => {
                    if seen.insert(observation.edition.0) {
                        result.items.push(Interaction::new(kind, observation));
                    }
                }
                Err(reason) => result.malformed.push(MalformedItem {
                    raw_id: row
                        .value()
                        .attr("data-release-id")
                        .unwrap_or("unknown")
                        .to_string(),
                    reason,
                }),
            }
        }
    }

    if has_next_page(&document) {
        result.pages = page + 1;
    }
    Ok(result)
}

/// Parses a release detail page
pub fn parse_release_page(html: &str) -> EditionLookup {
    let document = Html::parse_document(html);

    let title = selector("#profile_title, h1[itemprop='name'], h1.title")
        .and_then(|sel| document.select(&sel).next())
        .and_then(|h| element_text(&h));

    let canonical = selector("a[href*='/master/']")
        .and_then(|sel| {
            document
                .select(&sel)
                .find_map(|a| a.value().attr("href").and_then(|h| id_after(h, "/master/")))
        })
        .map(CanonicalId);

    let image = selector("meta[property='og:image']")
        .and_then(|sel| document.select(&sel).next())
        .and_then(|m| m.value().attr("content"))
        .map(str::to_string);

    let mut metadata = EditionMetadata {
        title,
        image,
        ..Default::default()
    };

    if let Some(sel) = selector("#profile ul li, #release-information ul li") {
        for entry in document.select(&sel) {
            let text = element_text(&entry).unwrap_or_default();
            let Some((label, value)) = text.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match label.trim().to_lowercase().as_str() {
                "genre" | "genres" => metadata.genres = split_list(value),
                "style" | "styles" => metadata.styles = split_list(value),
                "country" => metadata.country = Some(value.to_string()),
                "released" | "release date" => {
                    metadata.released = Some(value.to_string());
                    metadata.year = leading_year(value);
                }
                "year" => metadata.year = leading_year(value),
                "format" | "formats" => metadata.format_summary = Some(value.to_string()),
                "label" | "labels" => metadata.label_summary = Some(value.to_string()),
                "artist" | "artists" => metadata.artist = Some(value.to_string()),
                _ => {}
            }
        }
    }

    EditionLookup {
        canonical,
        metadata,
        source: SourceKind::Feed,
    }
}

fn parse_row(row: &ElementRef, link_sel: &Selector) -> Result<Observation, String> {
    let link = row.select(link_sel).next();
    let edition = row
        .value()
        .attr("data-release-id")
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .or_else(|| {
            link.and_then(|a| a.value().attr("href"))
                .and_then(|h| id_after(h, "/release/"))
        })
        .filter(|id| *id > 0)
        .ok_or("row without release id")?;

    let mut observation = Observation::new(EditionId(edition));
    observation.metadata.title = link.and_then(|a| element_text(&a));

    observation.canonical_hint = selector("a[href*='/master/']")
        .and_then(|sel| {
            row.select(&sel)
                .find_map(|a| a.value().attr("href").and_then(|h| id_after(h, "/master/")))
        })
        .map(CanonicalId);

    observation.rating = selector("[data-rating]")
        .and_then(|sel| row.select(&sel).next())
        .or_else(|| row.value().attr("data-rating").map(|_| *row))
        .and_then(|el| el.value().attr("data-rating"))
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .and_then(normalize_rating);

    observation.added_at = selector("time[datetime]")
        .and_then(|sel| row.select(&sel).next())
        .and_then(|t| t.value().attr("datetime"))
        .and_then(parse_date);

    Ok(observation)
}

/// Parses one page of a release's have/want list
///
/// Usernames come from profile and seller links; pages without such links
/// fall back to `data-username` attributes. Duplicates are dropped.
pub fn parse_release_audience(html: &str) -> Vec<AccountId> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut accounts = Vec::new();

    let mut push = |name: &str, accounts: &mut Vec<AccountId>| {
        let account = AccountId::new(name);
        if !account.is_empty() && seen.insert(account.key()) {
            accounts.push(account);
        }
    };

    if let Some(sel) = selector("a[href*='/user/'], a[href*='/seller/']") {
        for link in document.select(&sel) {
            let name = link.value().attr("href").and_then(|href| {
                name_after(href, "/user/").or_else(|| name_after(href, "/seller/"))
            });
            if let Some(name) = name {
                push(&name, &mut accounts);
            }
        }
    }

    if accounts.is_empty() {
        if let Some(sel) = selector("[data-username]") {
            for el in document.select(&sel) {
                if let Some(name) = el.value().attr("data-username") {
                    push(name.trim(), &mut accounts);
                }
            }
        }
    }
    accounts
}

/// Path segment following `marker`, e.g. `alice` in `/user/alice/collection`
fn name_after(href: &str, marker: &str) -> Option<String> {
    let start = href.find(marker)? + marker.len();
    let name: String = href[start..]
        .chars()
        .take_while(|c| !matches!(c, '/' | '?' | '#'))
        .collect();
    (!name.trim().is_empty()).then(|| name.trim().to_string())
}

fn has_next_page(document: &Html) -> bool {
    selector("a[rel='next'], a.pagination_next, link[rel='next']")
        .map(|sel| document.select(&sel).next().is_some())
        .unwrap_or(false)
}

/// Maps lowercased labels to the text of the element after the label
fn labelled_values(document: &Html) -> std::collections::HashMap<String, String> {
    let mut values = std::collections::HashMap::new();
    let Some(sel) = selector("span, dt, th") else {
        return values;
    };
    for label in document.select(&sel) {
        let Some(text) = element_text(&label) else {
            continue;
        };
        let Some(name) = text.strip_suffix(':') else {
            continue;
        };
        let value = label
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .next()
            .and_then(|el| element_text(&el));
        if let Some(value) = value {
            values.entry(name.trim().to_lowercase()).or_insert(value);
        }
    }
    values
}

fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    parse_date(raw).or_else(|| {
        ["%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%d %b %Y"]
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(raw.trim(), fmt).ok())
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|t| t.and_utc())
    })
}

/// Extracts the numeric id following `marker` in a link
///
/// `/release/123-Artist-Title` and `https://host/master/77` both work.
fn id_after(href: &str, marker: &str) -> Option<u64> {
    let start = href.find(marker)? + marker.len();
    let digits: String = href[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok().filter(|id| *id > 0)
}

fn element_text(element: &ElementRef) -> Option<String> {
    let text = element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn leading_year(value: &str) -> Option<i32> {
    value
        .split(|c: char| !c.is_ascii_digit())
        .find(|part| part.len() == 4)
        .and_then(|part| part.parse().ok())
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_endpoints() {
        let feed = FeedEndpoints::new("https://www.discogs.com").unwrap();
        let account = AccountId::new("alice");
        assert_eq!(
            feed.interactions(&account, InteractionKind::Wantlist, 3)
                .unwrap()
                .as_str(),
            "https://www.discogs.com/user/alice/wantlist?page=3"
        );
        assert_eq!(
            feed.release(EditionId(9)).unwrap().as_str(),
            "https://www.discogs.com/release/9"
        );
    }

    #[test]
    fn test_parse_listing_rows() {
        let html = r#"<html><body><table>
            <tr data-release-id="100">
              <td><a href="/release/100-Massive-Attack-Blue-Lines">Blue Lines</a></td>
              <td><a href="/master/9000-Blue-Lines">master</a></td>
              <td><span data-rating="400"></span></td>
              <td><time datetime="2021-06-05T10:40:59Z">June 5</time></td>
            </tr>
            <tr data-release-id="101">
              <td><a href="/release/101">Demo</a></td>
            </tr>
            <tr data-release-id="oops"><td>broken</td></tr>
          </table>
          <a rel="next" href="?page=2">Next</a>
        </body></html>"#;

        let page = parse_interaction_page(InteractionKind::Collection, html, "u", 1).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.malformed.len(), 1);
        assert_eq!(page.malformed[0].raw_id, "oops");
        assert!(page.has_next());

        let first = page.items[0].observation();
        assert_eq!(first.edition, EditionId(100));
        assert_eq!(first.canonical_hint, Some(CanonicalId(9000)));
        assert_eq!(first.rating, Some(4));
        assert!(first.added_at.is_some());
        assert_eq!(first.metadata.title.as_deref(), Some("Blue Lines"));

        let second = page.items[1].observation();
        assert_eq!(second.canonical_hint, None);
        assert_eq!(second.rating, None);
    }

    #[test]
    fn test_parse_bare_link_listing() {
        let html = r#"<ul>
            <li><a href="https://www.discogs.com/release/5-A">A</a></li>
            <li><a href="/release/5-A">A again</a></li>
            <li><a href="/release/6">B</a></li>
        </ul>"#;
        let page = parse_interaction_page(InteractionKind::Wantlist, html, "u", 2).unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(!page.has_next());
        assert_eq!(page.pages, 2);
    }

    #[test]
    fn test_parse_profile_page() {
        let html = r#"<html><head>
            <meta property="profile:username" content="Alice">
          </head><body>
            <div><span>Location:</span> <span>Lyon, France</span></div>
            <div><span>Joined:</span> <span>March 5, 2012</span></div>
          </body></html>"#;
        let profile = parse_profile_page(html, &AccountId::new("alice"));
        assert_eq!(profile.account.as_str(), "Alice");
        assert_eq!(profile.location.as_deref(), Some("Lyon, France"));
        assert!(profile.joined_at.is_some());
    }

    #[test]
    fn test_parse_release_page() {
        let html = r#"<html><head>
            <meta property="og:image" content="https://img/cover.jpg">
          </head><body>
            <h1 id="profile_title">Massive Attack - Blue Lines</h1>
            <a href="/master/9000-Blue-Lines">All versions</a>
            <div id="release-information"><ul>
              <li>Genre: Electronic, Hip Hop</li>
              <li>Style: Trip Hop</li>
              <li>Country: UK</li>
              <li>Released: 08 Apr 1991</li>
            </ul></div>
          </body></html>"#;
        let lookup = parse_release_page(html);
        assert_eq!(lookup.canonical, Some(CanonicalId(9000)));
        assert_eq!(
            lookup.metadata.title.as_deref(),
            Some("Massive Attack - Blue Lines")
        );
        assert_eq!(lookup.metadata.genres, vec!["Electronic", "Hip Hop"]);
        assert_eq!(lookup.metadata.country.as_deref(), Some("UK"));
        assert_eq!(lookup.metadata.year, Some(1991));
        assert_eq!(lookup.metadata.image.as_deref(), Some("https://img/cover.jpg"));
    }

    #[test]
    fn test_parse_release_audience() {
        let html = r#"<table>
            <tr><td><a href="/user/alice">alice</a></td></tr>
            <tr><td><a href="https://www.discogs.com/user/Bob/collection?page=2">Bob</a></td></tr>
            <tr><td><a href="/seller/carol/profile">carol</a></td></tr>
            <tr><td><a href="/user/ALICE">again</a></td></tr>
          </table>"#;
        let names: Vec<String> = parse_release_audience(html)
            .iter()
            .map(|a| a.as_str().to_string())
            .collect();
        assert_eq!(names, vec!["alice", "Bob", "carol"]);

        let fallback = r#"<ul><li data-username="dave"></li><li data-username=" "></li></ul>"#;
        let accounts = parse_release_audience(fallback);
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].as_str(), "dave");

        assert!(parse_release_audience("<p>nobody</p>").is_empty());
        assert_eq!(
            FeedEndpoints::new("https://www.discogs.com")
                .unwrap()
                .release_audience(EditionId(42), 2)
                .unwrap()
                .as_str(),
            "https://www.discogs.com/release/stats/42?page=2&per_page=50"
        );
    }

    #[test]
    fn test_id_after() {
        assert_eq!(id_after("/release/123-Foo", "/release/"), Some(123));
        assert_eq!(id_after("/release/abc", "/release/"), None);
        assert_eq!(id_after("/master/0", "/master/"), None);
    }
}
