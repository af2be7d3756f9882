//! HTTP fetch pipeline with browser-like request profiles and per-host cookie jars.
//!
//! ### URL Canonicalization
//! - Trim whitespace, ensure scheme (default: `https`)
//! - Lowercase host, remove fragments
//! - Preserve query string
//!
//! ### Identity
//! - Every request carries a desktop Chrome identity (User-Agent, Accept,
//!   Accept-Language, Sec-Fetch-*), varied by [`RequestProfile`].
//! - Cookies live in one [`PersistentJar`] per origin host, persisted after
//!   every response, redirects included.
//!
//! ### Limits
//! - Max redirects: 10
//! - Max body bytes: 20MB (configurable)
//! - Separate timeouts for documents and assets

pub mod cached;
pub mod cookies;
pub mod session;
pub mod sitemap;
pub mod ssrf;
pub mod url;

use bytes::Bytes;
use reqwest::{Client, header};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub use cached::FetchCache;
pub use cookies::PersistentJar;
pub use session::SessionEmulator;
pub use sitemap::SitemapClient;
pub use ssrf::{SsrfError, ensure_public_host, validate_ip};
pub use self::url::{UrlError, canonicalize, resolve};

use pageshot_core::{AppConfig, Error};

const ACCEPT_DOCUMENT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Which kind of browser request to imitate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestProfile {
    /// Top-level navigation typed into the address bar.
    Document,
    /// Same-origin navigation following a link (second warm-up hop).
    Navigation,
    /// Subresource: stylesheet, font or image.
    #[default]
    Asset,
}

impl RequestProfile {
    fn headers(self) -> [(&'static str, &'static str); 6] {
        match self {
            RequestProfile::Document => [
                ("Accept", ACCEPT_DOCUMENT),
                ("Upgrade-Insecure-Requests", "1"),
                ("Sec-Fetch-Dest", "document"),
                ("Sec-Fetch-Mode", "navigate"),
                ("Sec-Fetch-Site", "none"),
                ("Sec-Fetch-User", "?1"),
            ],
            RequestProfile::Navigation => [
                ("Accept", ACCEPT_DOCUMENT),
                ("Upgrade-Insecure-Requests", "1"),
                ("Sec-Fetch-Dest", "document"),
                ("Sec-Fetch-Mode", "navigate"),
                ("Sec-Fetch-Site", "same-origin"),
                ("Sec-Fetch-User", "?1"),
            ],
            RequestProfile::Asset => [
                ("Accept", "*/*"),
                ("Cache-Control", "no-cache"),
                ("Sec-Fetch-Dest", "empty"),
                ("Sec-Fetch-Mode", "no-cors"),
                ("Sec-Fetch-Site", "cross-site"),
                ("Pragma", "no-cache"),
            ],
        }
    }

    fn is_document(self) -> bool {
        !matches!(self, RequestProfile::Asset)
    }
}

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub profile: RequestProfile,
    /// Extra `Cookie` header merged after the jar's cookies.
    pub cookie: Option<String>,
    pub referer: Option<String>,
}

impl FetchOptions {
    pub fn document() -> Self {
        Self { profile: RequestProfile::Document, ..Default::default() }
    }

    pub fn asset() -> Self {
        Self::default()
    }

    pub fn with_cookie(mut self, cookie: Option<String>) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }
}

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 20MB)
    pub max_bytes: usize,

    /// Timeout for root documents and warm-up requests (default: 20s)
    pub document_timeout: Duration,

    /// Timeout for stylesheets, fonts and images (default: 15s)
    pub asset_timeout: Duration,

    /// Maximum number of redirects to follow (default: 10)
    pub max_redirects: usize,

    /// Directory of per-host cookie jars; `None` disables cookie persistence.
    pub cookie_dir: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let app = AppConfig::default();
        Self {
            user_agent: app.user_agent,
            max_bytes: app.max_bytes,
            document_timeout: Duration::from_millis(app.document_timeout_ms),
            asset_timeout: Duration::from_millis(app.asset_timeout_ms),
            max_redirects: 10,
            cookie_dir: None,
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(app: &AppConfig) -> Self {
        Self {
            user_agent: app.user_agent.clone(),
            max_bytes: app.max_bytes,
            document_timeout: app.document_timeout(),
            asset_timeout: app.asset_timeout(),
            max_redirects: 10,
            cookie_dir: Some(app.cookie_dir.clone()),
        }
    }
}

/// Response from a fetch operation.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// The URL requested
    pub url: String,
    /// The final URL after redirects
    pub final_url: String,
    /// HTTP status code
    pub status: u16,
    /// Content-Type header
    pub content_type: Option<String>,
    /// Response body bytes
    pub bytes: Bytes,
    /// Time taken to fetch in milliseconds
    pub fetch_ms: u64,
}

/// Network access seam. The inliner and session emulator only see this trait.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url`. Statuses >= 400 and transport failures are errors.
    async fn fetch(&self, url: &str, opts: &FetchOptions) -> Result<FetchResponse, Error>;
}

struct HostClient {
    http: Client,
    jar: Option<Arc<PersistentJar>>,
}

/// reqwest-backed [`Fetcher`] with one client (and cookie jar) per host.
pub struct HttpFetcher {
    config: FetchConfig,
    clients: Mutex<HashMap<String, Arc<HostClient>>>,
}

impl HttpFetcher {
    /// Create a new fetcher, creating the cookie directory if configured.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        if let Some(dir) = &config.cookie_dir {
            std::fs::create_dir_all(dir).map_err(|e| Error::cache_io(dir, e))?;
        }
        Ok(Self { config, clients: Mutex::new(HashMap::new()) })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn build_client(&self, jar: Option<Arc<PersistentJar>>) -> Result<Client, Error> {
        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(header::ACCEPT_LANGUAGE, header::HeaderValue::from_static(ACCEPT_LANGUAGE));

        let mut builder = Client::builder()
            .user_agent(&self.config.user_agent)
            .default_headers(default_headers)
            .redirect(reqwest::redirect::Policy::limited(self.config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true);
        if let Some(jar) = jar {
            builder = builder.cookie_provider(jar);
        }
        builder
            .build()
            .map_err(|e| Error::FetchFailed(format!("failed to build HTTP client: {e}")))
    }

    fn client_for(&self, host: &str) -> Result<Arc<HostClient>, Error> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| Error::FetchFailed("client registry poisoned".into()))?;
        if let Some(client) = clients.get(host) {
            return Ok(client.clone());
        }

        let jar = self
            .config
            .cookie_dir
            .as_deref()
            .map(|dir| Arc::new(PersistentJar::load(dir, host)));
        let client = Arc::new(HostClient { http: self.build_client(jar.clone())?, jar });
        clients.insert(host.to_string(), client.clone());
        Ok(client)
    }

    /// The cookie jar used for `host`, if cookie persistence is enabled.
    pub fn jar(&self, host: &str) -> Result<Option<Arc<PersistentJar>>, Error> {
        Ok(self.client_for(&host.to_ascii_lowercase())?.jar.clone())
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url_str: &str, opts: &FetchOptions) -> Result<FetchResponse, Error> {
        let start = Instant::now();
        let url = canonicalize(url_str).map_err(|e| Error::InvalidUrl(format!("{url_str}: {e}")))?;
        let host = url.host_str().unwrap_or_default().to_string();
        let client = self.client_for(&host)?;

        let timeout =
            if opts.profile.is_document() { self.config.document_timeout } else { self.config.asset_timeout };
        let mut request = client.http.get(url.as_str()).timeout(timeout);
        for (name, value) in opts.profile.headers() {
            request = request.header(name, value);
        }
        if let Some(referer) = &opts.referer {
            request = request.header(header::REFERER, referer);
        }
        if let Some(extra) = opts.cookie.as_deref().filter(|c| !c.trim().is_empty()) {
            let from_jar = client.jar.as_ref().and_then(|jar| jar.header_for(&url));
            let merged = match from_jar {
                Some(jar_cookies) => format!("{jar_cookies}; {extra}"),
                None => extra.to_string(),
            };
            request = request.header(header::COOKIE, merged);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::FetchFailed(format!("timeout after {}ms: {url}", timeout.as_millis()))
            } else {
                Error::FetchFailed(format!("network error: {url}: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::FetchFailed(format!("status {} for {url}", status.as_u16())));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(Error::FetchFailed(format!("{len} bytes exceeds {} for {url}", self.config.max_bytes)));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::FetchFailed(format!("failed to read response: {url}: {e}")))?;

        if bytes.len() > self.config.max_bytes {
            return Err(Error::FetchFailed(format!(
                "{} bytes exceeds {} for {url}",
                bytes.len(),
                self.config.max_bytes
            )));
        }

        let fetch_ms = start.elapsed().as_millis() as u64;

        tracing::debug!("fetched {} -> {} in {}ms ({} bytes)", url, final_url, fetch_ms, bytes.len());

        Ok(FetchResponse {
            url: url.to_string(),
            final_url,
            status: status.as_u16(),
            content_type,
            bytes,
            fetch_ms,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process [`Fetcher`] used by tests across the crate.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct FakeFetcher {
        routes: Mutex<HashMap<String, (String, Vec<u8>)>>,
        hits: Mutex<Vec<(String, RequestProfile)>>,
        calls: AtomicUsize,
    }

    impl FakeFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(self, url: &str, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
            self.routes.lock().unwrap().insert(url.to_string(), (content_type.to_string(), body.into()));
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn hits(&self) -> Vec<(String, RequestProfile)> {
            self.hits.lock().unwrap().clone()
        }

        pub fn hits_for(&self, url: &str) -> usize {
            self.hits.lock().unwrap().iter().filter(|(u, _)| u == url).count()
        }
    }

    #[async_trait::async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, url: &str, opts: &FetchOptions) -> Result<FetchResponse, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.hits.lock().unwrap().push((url.to_string(), opts.profile));
            let routes = self.routes.lock().unwrap();
            let Some((content_type, body)) = routes.get(url) else {
                return Err(Error::FetchFailed(format!("status 404 for {url}")));
            };
            Ok(FetchResponse {
                url: url.to_string(),
                final_url: url.to_string(),
                status: 200,
                content_type: Some(content_type.clone()),
                bytes: Bytes::from(body.clone()),
                fetch_ms: 0,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_config_from_app_config() {
        let app = AppConfig { max_bytes: 1024, asset_timeout_ms: 1_500, ..Default::default() };
        let config = FetchConfig::from(&app);
        assert_eq!(config.max_bytes, 1024);
        assert_eq!(config.asset_timeout, Duration::from_millis(1_500));
        assert_eq!(config.cookie_dir.as_deref(), Some(app.cookie_dir.as_path()));
    }

    #[test]
    fn test_profiles_differ_in_fetch_metadata() {
        let site = |p: RequestProfile| p.headers().iter().find(|(k, _)| *k == "Sec-Fetch-Site").map(|(_, v)| *v);
        assert_eq!(site(RequestProfile::Document), Some("none"));
        assert_eq!(site(RequestProfile::Navigation), Some("same-origin"));
        assert_eq!(site(RequestProfile::Asset), Some("cross-site"));
        assert!(RequestProfile::Navigation.is_document());
        assert!(!RequestProfile::Asset.is_document());
    }

    #[tokio::test]
    async fn test_http_fetcher_jar_per_host() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher =
            HttpFetcher::new(FetchConfig { cookie_dir: Some(dir.path().to_path_buf()), ..Default::default() }).unwrap();

        let a = fetcher.jar("a.example").unwrap().unwrap();
        let a_again = fetcher.jar("A.example").unwrap().unwrap();
        let b = fetcher.jar("b.example").unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_ne!(a.path(), b.path());
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_non_http_scheme() {
        let fetcher = HttpFetcher::new(FetchConfig::default()).unwrap();
        let result = fetcher.fetch("file:///etc/passwd", &FetchOptions::asset()).await;
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[tokio::test]
    #[ignore = "requires network"]
    async fn test_http_fetcher_example_dot_com() {
        let fetcher = HttpFetcher::new(FetchConfig::default()).unwrap();
        let response = fetcher.fetch("https://example.com", &FetchOptions::document()).await.unwrap();
        assert_eq!(response.status, 200);
        assert!(response.content_type.unwrap().starts_with("text/html"));
    }
}
