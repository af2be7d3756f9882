//! Sitemap discovery through an external JSON service.
//!
//! The service answers `GET <endpoint>?url=<target>` with
//! `{"sitemap": [...]}`, where entries are URL strings or objects carrying
//! `loc` / `url`. Entries are absolutized against the target, filtered to
//! http(s), de-duplicated in order and truncated.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;
use url::Url;

use pageshot_core::{AppConfig, Error};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

pub struct SitemapClient {
    http: reqwest::Client,
    endpoint: String,
    limit: usize,
}

impl SitemapClient {
    pub fn new(endpoint: impl Into<String>, limit: usize) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("pageshot/", env!("CARGO_PKG_VERSION")))
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::Sitemap(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, endpoint: endpoint.into(), limit })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        Self::new(config.sitemap_endpoint.clone(), config.sitemap_limit)
    }

    /// Discover up to `limit` page URLs for `target`.
    ///
    /// # Errors
    ///
    /// [`Error::Sitemap`] when the service is unreachable after retries,
    /// answers with an unusable body, or yields no usable entries.
    pub async fn discover(&self, target: &Url) -> Result<Vec<String>, Error> {
        let body = self.query(target).await?;
        let sitemap = body
            .get("sitemap")
            .ok_or_else(|| Error::Sitemap("missing sitemap key".into()))?;

        let urls = normalize_entries(target, sitemap, self.limit);
        if urls.is_empty() {
            return Err(Error::Sitemap(format!("empty sitemap for {target}")));
        }
        tracing::info!(target = %target, pages = urls.len(), "sitemap discovered");
        Ok(urls)
    }

    async fn query(&self, target: &Url) -> Result<Value, Error> {
        let mut delay = INITIAL_BACKOFF;
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let result = self.http.get(&self.endpoint).query(&[("url", target.as_str())]).send().await;
            match result {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<Value>()
                        .await
                        .map_err(|e| Error::Sitemap(format!("invalid JSON from sitemap service: {e}")));
                }
                Ok(response) if response.status().is_client_error() => {
                    return Err(Error::Sitemap(format!("sitemap service returned {}", response.status())));
                }
                Ok(response) => last_error = format!("sitemap service returned {}", response.status()),
                Err(e) => last_error = e.to_string(),
            }

            if attempt < MAX_ATTEMPTS {
                tracing::debug!(attempt, "sitemap request failed, retrying in {:?}: {last_error}", delay);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(Error::Sitemap(format!("failed after {MAX_ATTEMPTS} attempts: {last_error}")))
    }
}

fn entry_text(entry: &Value) -> Option<String> {
    let text = match entry {
        Value::String(s) => s.trim().to_string(),
        Value::Object(map) => ["loc", "url"]
            .iter()
            .filter_map(|key| map.get(*key))
            .map(|v| match v {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .find(|s| !s.is_empty())?,
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Normalize a `sitemap` value (array or single entry) into absolute, unique http(s) URLs.
pub fn normalize_entries(base: &Url, sitemap: &Value, limit: usize) -> Vec<String> {
    let entries: Vec<&Value> = match sitemap {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        single => vec![single],
    };

    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for entry in entries {
        let Some(raw) = entry_text(entry) else {
            continue;
        };
        let Ok(absolute) = base.join(&raw) else {
            continue;
        };
        if !matches!(absolute.scheme(), "http" | "https") {
            continue;
        }
        let href = absolute.to_string();
        if seen.insert(href.clone()) {
            urls.push(href);
        }
        if urls.len() == limit {
            break;
        }
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Url {
        Url::parse("https://shop.test/").unwrap()
    }

    #[test]
    fn test_strings_and_objects() {
        let sitemap = json!(["https://shop.test/a", {"loc": "/b"}, {"url": "c"}, {"loc": "  ", "url": "/d"}]);
        assert_eq!(
            normalize_entries(&base(), &sitemap, 10),
            vec!["https://shop.test/a", "https://shop.test/b", "https://shop.test/c", "https://shop.test/d"]
        );
    }

    #[test]
    fn test_dedupes_and_filters_schemes() {
        let sitemap = json!(["/a", "https://shop.test/a", "mailto:x@shop.test", "ftp://shop.test/f", 42, null]);
        assert_eq!(normalize_entries(&base(), &sitemap, 10), vec!["https://shop.test/a"]);
    }

    #[test]
    fn test_limit_applied_after_dedupe() {
        let sitemap = json!(["/1", "/1", "/2", "/3", "/4"]);
        assert_eq!(normalize_entries(&base(), &sitemap, 3), vec![
            "https://shop.test/1",
            "https://shop.test/2",
            "https://shop.test/3"
        ]);
    }

    #[test]
    fn test_single_entry_value() {
        assert_eq!(normalize_entries(&base(), &json!("/only"), 10), vec!["https://shop.test/only"]);
        assert!(normalize_entries(&base(), &Value::Null, 10).is_empty());
    }

    #[tokio::test]
    #[ignore = "requires network"]
    async fn test_discover_live_service() {
        let client = SitemapClient::from_config(&AppConfig::default()).unwrap();
        let urls = client.discover(&Url::parse("https://example.com").unwrap()).await;
        assert!(urls.is_ok() || matches!(urls, Err(Error::Sitemap(_))));
    }
}
