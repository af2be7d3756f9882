//! Stylesheet inlining: `@import` flattening and `url(...)` embedding.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use futures_util::future::{BoxFuture, FutureExt, join_all};
use regex::{Captures, Regex};

use pageshot_core::Error;

use super::AssetLoader;
use crate::fetch::resolve;

/// Maximum `@import` nesting followed from a top-level stylesheet.
pub const MAX_IMPORT_DEPTH: usize = 8;

/// Replacement for a `url()` whose target could not be fetched.
pub const EMPTY_URL: &str = r#"url("data:,")"#;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)"#).expect("invalid url() pattern")
});

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)@import\s+(?:url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)|"([^"]*)"|'([^']*)')\s*([^;]*);"#,
    )
    .expect("invalid @import pattern")
});

fn first_group<'t>(caps: &Captures<'t>, groups: &[usize]) -> &'t str {
    groups.iter().find_map(|i| caps.get(*i)).map(|m| m.as_str()).unwrap_or_default()
}

/// References that are already self-contained or point inside the document.
pub fn is_embedded(reference: &str) -> bool {
    let r = reference.trim();
    let lower = r.get(..6).unwrap_or(r).to_ascii_lowercase();
    r.is_empty() || r.starts_with('#') || lower.starts_with("data:") || lower.starts_with("about:") || lower.starts_with("blob:")
}

/// Absolute URLs of every `url(...)` in `css` that needs fetching, in order, without duplicates.
pub fn url_references(css: &str, base: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    URL_RE
        .captures_iter(css)
        .map(|caps| first_group(&caps, &[1, 2, 3]).trim().to_string())
        .filter(|raw| !is_embedded(raw))
        .filter_map(|raw| resolve(base, &raw))
        .filter(|abs| seen.insert(abs.clone()))
        .collect()
}

/// Rewrite every `url(...)` in `css` using `assets` (absolute URL to data URI).
///
/// A target mapped to `None` failed and becomes an empty data URI; targets
/// absent from the map are left untouched.
pub fn rewrite_urls(css: &str, base: &str, assets: &HashMap<String, Option<String>>) -> String {
    URL_RE
        .replace_all(css, |caps: &Captures| {
            let raw = first_group(caps, &[1, 2, 3]).trim();
            if is_embedded(raw) {
                return caps[0].to_string();
            }
            match resolve(base, raw).and_then(|abs| assets.get(&abs)) {
                Some(Some(data)) => format!("url(\"{data}\")"),
                Some(None) => EMPTY_URL.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Flatten `@import`s and embed every `url()` of a stylesheet served from `base`.
///
/// Imports are followed sequentially, depth-first, up to [`MAX_IMPORT_DEPTH`];
/// a URL already on the current import chain is dropped to break cycles.
pub fn inline_stylesheet<'a>(
    loader: &'a AssetLoader, css: String, base: String, depth: usize, chain: HashSet<String>,
) -> BoxFuture<'a, Result<String, Error>> {
    async move {
        let css = inline_imports(loader, &css, &base, depth, &chain).await?;

        let targets = url_references(&css, &base);
        let fetched = join_all(targets.iter().map(|url| loader.data_uri(url))).await;
        let mut assets = HashMap::with_capacity(targets.len());
        for (url, data) in targets.into_iter().zip(fetched) {
            assets.insert(url, data?);
        }

        Ok(rewrite_urls(&css, &base, &assets))
    }
    .boxed()
}

async fn inline_imports(
    loader: &AssetLoader, css: &str, base: &str, depth: usize, chain: &HashSet<String>,
) -> Result<String, Error> {
    let imports: Vec<(usize, usize, String, String)> = IMPORT_RE
        .captures_iter(css)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let raw = first_group(&caps, &[1, 2, 3, 4, 5]).to_string();
            let media = caps.get(6).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
            Some((whole.start(), whole.end(), raw, media))
        })
        .collect();

    let mut out = String::with_capacity(css.len());
    let mut last = 0;

    for (start, end, raw, media) in imports {
        out.push_str(&css[last..start]);
        last = end;

        let Some(target) = resolve(base, &raw) else {
            continue;
        };

        if depth >= MAX_IMPORT_DEPTH || chain.contains(&target) {
            tracing::debug!(url = %target, depth, "dropping @import (depth limit or cycle)");
            continue;
        }

        let Some(text) = loader.text(&target).await? else {
            tracing::debug!(url = %target, "dropping @import that failed to load");
            continue;
        };

        let mut next_chain = chain.clone();
        next_chain.insert(target.clone());
        let inner = inline_stylesheet(loader, text, target, depth + 1, next_chain).await?;

        if media.is_empty() {
            out.push_str(&inner);
        } else {
            out.push_str(&format!("@media {media} {{\n{inner}\n}}"));
        }
    }

    out.push_str(&css[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchCache;
    use crate::fetch::testing::FakeFetcher;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use pageshot_core::DiskCache;
    use std::sync::Arc;

    async fn loader(fetcher: FakeFetcher) -> (tempfile::TempDir, Arc<FakeFetcher>, AssetLoader) {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(fetcher);
        let cache = FetchCache::new(DiskCache::open(dir.path()).await.unwrap(), fetcher.clone());
        (dir, fetcher, AssetLoader::new(cache))
    }

    async fn inline(loader: &AssetLoader, css: &str, base: &str) -> String {
        inline_stylesheet(loader, css.to_string(), base.to_string(), 0, HashSet::new()).await.unwrap()
    }

    #[test]
    fn test_url_references_resolved_and_deduped() {
        let css = r#"a{background:url(img/a.png)} b{background:url("img/a.png")} c{src:url('../f.woff2')}
                     d{background:url(data:image/png;base64,AAA)} e{fill:url(#grad)}"#;
        assert_eq!(url_references(css, "https://a.test/css/site.css"), vec![
            "https://a.test/css/img/a.png",
            "https://a.test/f.woff2"
        ]);
    }

    #[test]
    fn test_rewrite_urls_failed_and_unknown() {
        let mut assets = HashMap::new();
        assets.insert("https://a.test/ok.png".to_string(), Some("data:image/png;base64,QQ==".to_string()));
        assets.insert("https://a.test/gone.png".to_string(), None);

        let css = "x{background:url(ok.png)} y{background:url( 'gone.png' )} z{background:url(other.png)}";
        let out = rewrite_urls(css, "https://a.test/", &assets);
        assert_eq!(
            out,
            r#"x{background:url("data:image/png;base64,QQ==")} y{background:url("data:,")} z{background:url(other.png)}"#
        );
    }

    #[tokio::test]
    async fn test_url_becomes_exact_data_uri() {
        let png = vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3];
        let (_dir, _fetcher, loader) = loader(FakeFetcher::new().route("https://a.test/foo.png", "image/png", png.clone())).await;

        let out = inline(&loader, "body{background:url(foo.png)}", "https://a.test/style.css").await;

        let prefix = r#"body{background:url("data:image/png;base64,"#;
        assert!(out.starts_with(prefix));
        let encoded = out[prefix.len()..].trim_end_matches(r#"")}"#);
        assert_eq!(STANDARD.decode(encoded).unwrap(), png);
    }

    #[tokio::test]
    async fn test_import_with_media_is_wrapped() {
        let (_dir, _fetcher, loader) =
            loader(FakeFetcher::new().route("https://a.test/a.css", "text/css", "p{color:red}")).await;

        let out = inline(&loader, r#"@import url("a.css") screen;"#, "https://a.test/main.css").await;
        assert_eq!(out, "@media screen {\np{color:red}\n}");
    }

    #[tokio::test]
    async fn test_import_without_media_inlined_in_place() {
        let (_dir, _fetcher, loader) =
            loader(FakeFetcher::new().route("https://a.test/base.css", "text/css", "h1{margin:0}")).await;

        let out = inline(&loader, "@import 'base.css';\nh2{margin:1px}", "https://a.test/main.css").await;
        assert_eq!(out, "h1{margin:0}\nh2{margin:1px}");
    }

    #[tokio::test]
    async fn test_imported_urls_resolve_against_imported_sheet() {
        let fetcher = FakeFetcher::new()
            .route("https://cdn.test/theme/t.css", "text/css", "i{background:url(bg.gif)}")
            .route("https://cdn.test/theme/bg.gif", "image/gif", b"GIF89a".to_vec());
        let (_dir, _fetcher, loader) = loader(fetcher).await;

        let out = inline(&loader, "@import url(//cdn.test/theme/t.css);", "https://a.test/main.css").await;
        assert!(out.contains("data:image/gif;base64,"));
        assert!(!out.contains("bg.gif"));
    }

    #[tokio::test]
    async fn test_import_cycle_terminates() {
        let fetcher = FakeFetcher::new()
            .route("https://a.test/a.css", "text/css", "@import 'b.css'; .a{}")
            .route("https://a.test/b.css", "text/css", "@import 'a.css'; .b{}");
        let (_dir, fetcher, loader) = loader(fetcher).await;

        let chain = HashSet::from(["https://a.test/a.css".to_string()]);
        let out = inline_stylesheet(&loader, "@import 'b.css'; .a{}".into(), "https://a.test/a.css".into(), 0, chain)
            .await
            .unwrap();

        assert_eq!(out.matches(".b{}").count(), 1);
        assert_eq!(out.matches(".a{}").count(), 1);
        assert_eq!(fetcher.hits_for("https://a.test/a.css"), 0);
    }

    #[tokio::test]
    async fn test_failed_import_dropped() {
        let (_dir, _fetcher, loader) = loader(FakeFetcher::new()).await;
        let out = inline(&loader, "@import 'missing.css'; p{}", "https://a.test/main.css").await;
        assert_eq!(out.trim(), "p{}");
    }

    #[tokio::test]
    async fn test_failed_url_replaced_with_empty_data_uri() {
        let (_dir, _fetcher, loader) = loader(FakeFetcher::new()).await;
        let out = inline(&loader, "p{background:url(/nope.png)}", "https://a.test/main.css").await;
        assert_eq!(out, r#"p{background:url("data:,")}"#);
    }
}
