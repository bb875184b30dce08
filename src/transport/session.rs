//! Session material for the cookie-gated feed
//!
//! Cookies come from a browser export. The file is re-read whenever its
//! modification time changes, so an external refresh agent can swap in new
//! cookies while a run is in progress.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{info, warn};

/// One cookie from an export file
#[derive(Debug, Clone, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub expires: Option<DateTime<Utc>>,
}

/// Cookie header plus the instant until which it may be used
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMaterial {
    pub cookie_header: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl SessionMaterial {
    /// Material with no cookies; feed requests go out anonymously
    pub fn anonymous(valid_until: Option<DateTime<Utc>>) -> Self {
        Self {
            cookie_header: None,
            valid_until,
        }
    }

    /// Builds material from parsed cookies
    ///
    /// An explicit `valid_until` wins; otherwise the earliest cookie expiry
    /// bounds the session.
    pub fn from_cookies(cookies: &[Cookie], explicit: Option<DateTime<Utc>>) -> Self {
        let header = cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        let valid_until = explicit.or_else(|| cookies.iter().filter_map(|c| c.expires).min());
        Self {
            cookie_header: (!header.is_empty()).then_some(header),
            valid_until,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.map_or(true, |until| now < until)
    }
}

/// Cookie export file that reloads on change
#[derive(Debug)]
pub struct CookieFile {
    path: PathBuf,
    explicit_valid_until: Option<DateTime<Utc>>,
    modified: Option<SystemTime>,
    loaded: bool,
    material: SessionMaterial,
}

impl CookieFile {
    pub fn new(path: impl Into<PathBuf>, explicit_valid_until: Option<DateTime<Utc>>) -> Self {
        Self {
            path: path.into(),
            explicit_valid_until,
            modified: None,
            loaded: false,
            material: SessionMaterial::anonymous(explicit_valid_until),
        }
    }

    /// Returns the current material, re-reading the file if it changed
    ///
    /// A missing or unreadable file leaves the feed anonymous.
    pub fn current(&mut self) -> &SessionMaterial {
        let modified = fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        if self.loaded && modified == self.modified {
            return &self.material;
        }

        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let cookies = parse_cookie_file(&contents);
                if cookies.is_empty() {
                    warn!(path = %self.path.display(), "Cookie file holds no cookies");
                } else {
                    info!(
                        path = %self.path.display(),
                        count = cookies.len(),
                        "Loaded session cookies"
                    );
                }
                self.material = SessionMaterial::from_cookies(&cookies, self.explicit_valid_until);
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Cookie file unavailable, feed requests will be anonymous"
                );
                self.material = SessionMaterial::anonymous(self.explicit_valid_until);
            }
        }
        self.modified = modified;
        self.loaded = true;
        &self.material
    }
}

/// Parses a cookie export
///
/// Accepted shapes:
/// - JSON list of `{name, value, expires | expirationDate}`
/// - JSON object `{"cookies": [...]}` with the same entries
/// - JSON object mapping names to values
/// - Netscape `cookies.txt` (seven tab-separated fields, expiry in the fifth)
pub fn parse_cookie_file(contents: &str) -> Vec<Cookie> {
    match serde_json::from_str::<Value>(contents) {
        Ok(Value::Array(items)) => items.iter().filter_map(cookie_from_json).collect(),
        Ok(Value::Object(map)) => match map.get("cookies") {
            Some(Value::Array(items)) => items.iter().filter_map(cookie_from_json).collect(),
            _ => map
                .iter()
                .filter_map(|(name, value)| {
                    value.as_str().map(|v| Cookie {
                        name: name.clone(),
                        value: v.to_string(),
                        expires: None,
                    })
                })
                .collect(),
        },
        _ => parse_netscape(contents),
    }
}

fn cookie_from_json(item: &Value) -> Option<Cookie> {
    let name = item.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let value = item.get("value").and_then(Value::as_str).unwrap_or_default();
    let expires = item
        .get("expires")
        .or_else(|| item.get("expirationDate"))
        .and_then(parse_expiry);
    Some(Cookie {
        name: name.to_string(),
        value: value.to_string(),
        expires,
    })
}

fn parse_expiry(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc))
            .or_else(|| s.parse::<f64>().ok().and_then(from_epoch)),
        _ => None,
    }
}

fn from_epoch(seconds: f64) -> Option<DateTime<Utc>> {
    // Session cookies are exported with an expiry of 0 or -1
    if seconds <= 0.0 {
        return None;
    }
    Utc.timestamp_opt(seconds as i64, 0).single()
}

fn parse_netscape(contents: &str) -> Vec<Cookie> {
    contents
        .lines()
        .map(|line| line.strip_prefix("#HttpOnly_").unwrap_or(line))
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 7 {
                return None;
            }
            Some(Cookie {
                name: fields[5].to_string(),
                value: fields[6].trim_end().to_string(),
                expires: fields[4].parse::<f64>().ok().and_then(from_epoch),
            })
        })
        .collect()
}
