//! Per-host persistent cookie jars.
//!
//! Each origin host gets its own jar file `<sha256(host)>.cookie`. The jar
//! plugs into reqwest as a [`CookieStore`], so cookies set by intermediate
//! redirect responses are captured and written back immediately.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use url::Url;

use pageshot_core::cache::compute_host_key;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredCookie {
    name: String,
    value: String,
    domain: String,
    /// Set when the cookie carried a `Domain` attribute and applies to subdomains.
    #[serde(default)]
    include_subdomains: bool,
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires: Option<DateTime<Utc>>,
}

impl StoredCookie {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }

    fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let domain_ok = host == self.domain
            || (self.include_subdomains && host.ends_with(&format!(".{}", self.domain)));
        domain_ok && path_matches(url.path(), &self.path)
    }
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    request_path == cookie_path
        || (request_path.starts_with(cookie_path)
            && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/')))
}

fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

fn parse_expires(value: &str) -> Option<DateTime<Utc>> {
    let normalized = value.trim().replace('-', " ");
    DateTime::parse_from_rfc2822(&normalized).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Parse one `Set-Cookie` header value received for `url`.
fn parse_set_cookie(raw: &str, url: &Url, now: DateTime<Utc>) -> Option<StoredCookie> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let request_host = url.host_str()?.to_ascii_lowercase();
    let mut cookie = StoredCookie {
        name: name.to_string(),
        value: value.trim().trim_matches('"').to_string(),
        domain: request_host.clone(),
        include_subdomains: false,
        path: default_path(url),
        expires: None,
    };
    let mut max_age_seen = false;

    for attr in parts {
        let (key, val) = attr.split_once('=').map(|(k, v)| (k.trim(), v.trim())).unwrap_or((attr.trim(), ""));
        match key.to_ascii_lowercase().as_str() {
            "domain" if !val.is_empty() => {
                let domain = val.trim_start_matches('.').to_ascii_lowercase();
                // An origin may only scope cookies to itself or a parent domain.
                if request_host != domain && !request_host.ends_with(&format!(".{domain}")) {
                    return None;
                }
                cookie.domain = domain;
                cookie.include_subdomains = true;
            }
            "path" if val.starts_with('/') => cookie.path = val.to_string(),
            "max-age" => {
                if let Ok(seconds) = val.parse::<i64>() {
                    max_age_seen = true;
                    cookie.expires = Some(now + chrono::Duration::seconds(seconds));
                }
            }
            "expires" if !max_age_seen => cookie.expires = parse_expires(val),
            _ => {}
        }
    }

    Some(cookie)
}

fn write_atomic_sync(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("jar");
    let tmp = path.with_file_name(format!(".{name}.{}.tmp", std::process::id()));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp);
    })
}

/// Cookie jar for one origin host, persisted to disk after every change.
#[derive(Debug)]
pub struct PersistentJar {
    path: PathBuf,
    cookies: Mutex<BTreeMap<(String, String, String), StoredCookie>>,
}

impl PersistentJar {
    /// Path of the jar file for `host` under `dir`.
    pub fn path_for(dir: &Path, host: &str) -> PathBuf {
        dir.join(format!("{}.cookie", compute_host_key(host)))
    }

    /// Load the jar for `host`, starting empty when no file exists yet.
    ///
    /// A corrupt jar file is discarded with a warning.
    pub fn load(dir: &Path, host: &str) -> Self {
        let path = Self::path_for(dir, host);
        let stored: Vec<StoredCookie> = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "discarding unreadable cookie jar: {e}");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };

        let now = Utc::now();
        let cookies = stored
            .into_iter()
            .filter(|c| !c.is_expired(now))
            .map(|c| ((c.domain.clone(), c.path.clone(), c.name.clone()), c))
            .collect();

        Self { path, cookies: Mutex::new(cookies) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live cookies in the jar.
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.cookies.lock().map(|c| c.values().filter(|c| !c.is_expired(now)).count()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Cookie` header value for a request to `url`, if any cookie applies.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let now = Utc::now();
        let cookies = self.cookies.lock().ok()?;
        let pairs: Vec<String> = cookies
            .values()
            .filter(|c| !c.is_expired(now) && c.matches(url))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        (!pairs.is_empty()).then(|| pairs.join("; "))
    }

    /// Record `Set-Cookie` values received for `url` and persist the jar.
    pub fn store_set_cookies<'a>(&self, headers: impl Iterator<Item = &'a str>, url: &Url) {
        let now = Utc::now();
        let snapshot = {
            let Ok(mut cookies) = self.cookies.lock() else {
                return;
            };
            let mut changed = false;
            for raw in headers {
                let Some(cookie) = parse_set_cookie(raw, url, now) else {
                    continue;
                };
                let key = (cookie.domain.clone(), cookie.path.clone(), cookie.name.clone());
                if cookie.is_expired(now) {
                    changed |= cookies.remove(&key).is_some();
                } else {
                    cookies.insert(key, cookie);
                    changed = true;
                }
            }
            if !changed {
                return;
            }
            cookies.values().cloned().collect::<Vec<_>>()
        };

        self.persist(&snapshot);
    }

    fn persist(&self, cookies: &[StoredCookie]) {
        let result = serde_json::to_vec_pretty(cookies)
            .map_err(std::io::Error::other)
            .and_then(|bytes| {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                write_atomic_sync(&self.path, &bytes)
            });
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), "failed to persist cookie jar: {e}");
        }
    }
}

impl CookieStore for PersistentJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.store_set_cookies(cookie_headers.filter_map(|v| v.to_str().ok()), url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.header_for(url).and_then(|h| HeaderValue::from_str(&h).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_set_and_send_cookie() {
        let dir = tempfile::tempdir().unwrap();
        let jar = PersistentJar::load(dir.path(), "example.com");
        let page = url("https://example.com/");

        jar.store_set_cookies(["sid=abc; Path=/; HttpOnly", "theme=dark"].into_iter(), &page);

        let header = jar.header_for(&url("https://example.com/about")).unwrap();
        assert!(header.contains("sid=abc"));
        assert!(header.contains("theme=dark"));
        assert_eq!(jar.len(), 2);
    }

    #[test]
    fn test_jar_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        {
            let jar = PersistentJar::load(dir.path(), "Example.com");
            jar.store_set_cookies(["sid=abc; Max-Age=3600"].into_iter(), &url("https://example.com/"));
        }
        let path = PersistentJar::path_for(dir.path(), "example.com");
        assert!(path.exists());
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with(".cookie"));

        let reloaded = PersistentJar::load(dir.path(), "example.com");
        assert_eq!(reloaded.header_for(&url("https://example.com/")).as_deref(), Some("sid=abc"));
    }

    #[test]
    fn test_expired_cookie_removes_existing() {
        let dir = tempfile::tempdir().unwrap();
        let jar = PersistentJar::load(dir.path(), "example.com");
        let page = url("https://example.com/");
        jar.store_set_cookies(["sid=abc"].into_iter(), &page);
        jar.store_set_cookies(["sid=; Max-Age=0"].into_iter(), &page);
        assert!(jar.is_empty());
        assert!(jar.header_for(&page).is_none());
    }

    #[test]
    fn test_expires_attribute_in_past() {
        let dir = tempfile::tempdir().unwrap();
        let jar = PersistentJar::load(dir.path(), "example.com");
        jar.store_set_cookies(["old=1; Expires=Wed, 21-Oct-2015 07:28:00 GMT"].into_iter(), &url("https://example.com/"));
        assert!(jar.is_empty());
    }

    #[test]
    fn test_domain_attribute_scopes_subdomains() {
        let dir = tempfile::tempdir().unwrap();
        let jar = PersistentJar::load(dir.path(), "example.com");
        jar.store_set_cookies(["a=1; Domain=.example.com"].into_iter(), &url("https://www.example.com/"));
        jar.store_set_cookies(["evil=1; Domain=other.com"].into_iter(), &url("https://www.example.com/"));

        assert_eq!(jar.header_for(&url("https://cdn.example.com/x")).as_deref(), Some("a=1"));
        assert!(jar.header_for(&url("https://other.com/")).is_none());
    }

    #[test]
    fn test_path_scoping() {
        let dir = tempfile::tempdir().unwrap();
        let jar = PersistentJar::load(dir.path(), "example.com");
        jar.store_set_cookies(["p=1; Path=/shop"].into_iter(), &url("https://example.com/"));

        assert!(jar.header_for(&url("https://example.com/shop/cart")).is_some());
        assert!(jar.header_for(&url("https://example.com/shopping")).is_none());
        assert!(jar.header_for(&url("https://example.com/")).is_none());
    }

    #[test]
    fn test_corrupt_jar_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(PersistentJar::path_for(dir.path(), "example.com"), b"{not json").unwrap();
        let jar = PersistentJar::load(dir.path(), "example.com");
        assert!(jar.is_empty());
    }
}
