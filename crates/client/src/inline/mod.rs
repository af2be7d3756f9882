//! Asset inlining: turn a live page into one self-contained HTML document.
//!
//! Every stylesheet, `@import`, font, background and image is fetched
//! through the [`FetchCache`] and embedded (`<style>` blocks and `data:`
//! URIs); scripts and other active content are removed. References that
//! cannot be fetched are dropped rather than left pointing at the network.

pub mod css;
pub mod html;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::future::join_all;
use serde::Serialize;

use pageshot_core::{Error, FetchResult};

use crate::fetch::{FetchCache, FetchOptions, SessionEmulator, canonicalize};

/// Mime used when neither the response nor the URL names one.
const FALLBACK_ASSET_MIME: &str = "image/webp";

/// Guess a mime type from the extension of a URL path.
pub fn guess_mime(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next()?;
    let (_, ext) = path.rsplit('/').next()?.rsplit_once('.')?;
    let mime = match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "bmp" => "image/bmp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",
        "css" => "text/css",
        _ => return None,
    };
    Some(mime)
}

/// Mime for an embedded asset: the response type unless it is missing or generic.
pub fn asset_mime(result: &FetchResult, url: &str) -> String {
    let essence = result.essence();
    if essence.is_empty() || essence == "application/octet-stream" || essence == "binary/octet-stream" {
        return guess_mime(url).unwrap_or(FALLBACK_ASSET_MIME).to_string();
    }
    essence
}

/// `data:<mime>;base64,<payload>` for a fetched asset.
pub fn data_uri(result: &FetchResult, url: &str) -> String {
    format!("data:{};base64,{}", asset_mime(result, url), STANDARD.encode(&result.bytes))
}

/// Decode a text body as UTF-8, replacing invalid sequences and dropping a BOM.
pub fn decode_text(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_prefix('\u{feff}').unwrap_or(&text).to_string()
}

/// Counters for one inlined document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineStats {
    pub stylesheets: usize,
    pub assets_inlined: usize,
    pub assets_dropped: usize,
}

/// Fetches assets for one document, each URL at most once.
pub struct AssetLoader {
    cache: FetchCache,
    memo: Mutex<HashMap<String, Option<String>>>,
    inlined: AtomicUsize,
    dropped: AtomicUsize,
}

impl AssetLoader {
    pub fn new(cache: FetchCache) -> Self {
        Self { cache, memo: Mutex::new(HashMap::new()), inlined: AtomicUsize::new(0), dropped: AtomicUsize::new(0) }
    }

    fn memoized(&self, url: &str) -> Option<Option<String>> {
        self.memo.lock().ok().and_then(|memo| memo.get(url).cloned())
    }

    /// Data URI for `url`, or `None` when it could not be fetched.
    pub async fn data_uri(&self, url: &str) -> Result<Option<String>, Error> {
        if let Some(hit) = self.memoized(url) {
            return Ok(hit);
        }

        let data = self.cache.fetch_cached(url, &FetchOptions::asset()).await?.map(|r| data_uri(&r, url));
        match data {
            Some(_) => self.inlined.fetch_add(1, Ordering::Relaxed),
            None => self.dropped.fetch_add(1, Ordering::Relaxed),
        };

        if let Ok(mut memo) = self.memo.lock() {
            memo.insert(url.to_string(), data.clone());
        }
        Ok(data)
    }

    /// Body of `url` as text, or `None` when it could not be fetched.
    pub async fn text(&self, url: &str) -> Result<Option<String>, Error> {
        Ok(self.cache.fetch_cached(url, &FetchOptions::asset()).await?.map(|r| decode_text(&r.bytes)))
    }

    fn stats(&self, stylesheets: usize) -> InlineStats {
        InlineStats {
            stylesheets,
            assets_inlined: self.inlined.load(Ordering::Relaxed),
            assets_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// A page with every external reference embedded or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlinedDocument {
    pub url: String,
    pub html: String,
    pub stats: InlineStats,
}

/// Builds [`InlinedDocument`]s from live pages.
#[derive(Clone)]
pub struct Inliner {
    cache: FetchCache,
    session: Option<Arc<SessionEmulator>>,
}

impl Inliner {
    pub fn new(cache: FetchCache) -> Self {
        Self { cache, session: None }
    }

    /// Warm up each host through `session` before its first uncached root document.
    pub fn with_session(mut self, session: Arc<SessionEmulator>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn cache(&self) -> &FetchCache {
        &self.cache
    }

    /// Fetch `url` and inline everything it references.
    ///
    /// `cookie` is forwarded only on the root document request.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] if `url` cannot be canonicalized
    /// - [`Error::FetchFailed`] if the root document cannot be fetched
    /// - [`Error::CacheIo`] if the cache directory is unusable
    pub async fn inline(&self, url: &str, cookie: Option<&str>) -> Result<InlinedDocument, Error> {
        let page = canonicalize(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?.to_string();

        if let Some(session) = &self.session
            && !self.cache.is_cached(&page).await
        {
            session.warm_up(&page).await;
        }

        let opts = FetchOptions::document().with_cookie(cookie.map(str::to_string));
        let root = self
            .cache
            .fetch_cached(&page, &opts)
            .await?
            .ok_or_else(|| Error::FetchFailed(format!("root document unavailable: {page}")))?;

        self.inline_html(&decode_text(&root.bytes), &page).await
    }

    /// Inline an already fetched document served from `page_url`.
    pub async fn inline_html(&self, source: &str, page_url: &str) -> Result<InlinedDocument, Error> {
        let plan = html::plan(source, page_url);
        let loader = AssetLoader::new(self.cache.clone());

        let sheets = join_all(plan.stylesheets.iter().map(|url| {
            let loader = &loader;
            async move {
                let Some(text) = loader.text(url).await? else {
                    tracing::debug!(url = %url, "dropping stylesheet that failed to load");
                    return Ok::<_, Error>((url.clone(), None));
                };
                let chain = HashSet::from([url.clone()]);
                let css = css::inline_stylesheet(loader, text, url.clone(), 0, chain).await?;
                Ok((url.clone(), Some(css)))
            }
        }))
        .await;

        let blocks = join_all(plan.style_blocks.iter().map(|text| {
            let (loader, base) = (&loader, &plan.base);
            async move {
                let css = css::inline_stylesheet(loader, text.clone(), base.clone(), 0, HashSet::new()).await?;
                Ok::<_, Error>((text.clone(), css))
            }
        }))
        .await;

        let assets = join_all(plan.assets.iter().map(|url| {
            let loader = &loader;
            async move { Ok::<_, Error>((url.clone(), loader.data_uri(url).await?)) }
        }))
        .await;

        let mut resolved = html::Resolved::default();
        for sheet in sheets {
            let (url, css) = sheet?;
            resolved.stylesheets.insert(url, css);
        }
        for block in blocks {
            let (text, css) = block?;
            resolved.style_blocks.insert(text, css);
        }
        for asset in assets {
            let (url, data) = asset?;
            resolved.assets.insert(url, data);
        }

        let stylesheets = resolved.stylesheets.values().filter(|css| css.is_some()).count();
        let html = html::render(&plan, &resolved);
        let stats = loader.stats(stylesheets);
        tracing::info!(
            url = page_url,
            stylesheets = stats.stylesheets,
            inlined = stats.assets_inlined,
            dropped = stats.assets_dropped,
            bytes = html.len(),
            "document inlined"
        );

        Ok(InlinedDocument { url: page_url.to_string(), html, stats })
    }
}
