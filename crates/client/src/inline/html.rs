//! Document planning and serialization.
//!
//! Inlining runs in two passes over one parsed tree. [`plan`] parses the
//! source and lists every external reference; once those are fetched,
//! [`render`] walks the same tree and writes a new document with each
//! reference replaced. Neither pass mutates the tree or performs I/O.

use std::collections::{HashMap, HashSet};

use scraper::node::Element;
use scraper::{ElementRef, Html, Node, Selector};

use super::css::{is_embedded, rewrite_urls, url_references};
use crate::fetch::resolve;

/// Appended to `<head>` so pages that fade in via script still render.
pub const VISIBILITY_STYLE: &str = "body{visibility:visible!important;opacity:1!important;}";

const IMAGE_SRC_ATTRS: [&str; 4] = ["data-src", "data-lazy", "data-original", "src"];
const IMAGE_SRCSET_ATTRS: [&str; 2] = ["data-srcset", "srcset"];
const DROPPED_LINK_RELS: [&str; 6] = ["preload", "modulepreload", "prefetch", "prerender", "dns-prefetch", "preconnect"];
const VOID_ELEMENTS: [&str; 14] =
    ["area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source", "track", "wbr"];
const RAW_TEXT_ELEMENTS: [&str; 7] = ["style", "script", "xmp", "iframe", "noembed", "noframes", "plaintext"];

/// A parsed document and its external references, all absolute.
#[derive(Debug, Clone)]
pub struct DocumentPlan {
    document: Html,
    /// Resolution base: the page URL, or its `<base href>` when present.
    pub base: String,
    pub stylesheets: Vec<String>,
    /// Text of each inline `<style>` element, unique.
    pub style_blocks: Vec<String>,
    /// Images, posters and `url()`s of `style` attributes.
    pub assets: Vec<String>,
}

/// Fetched material for [`render`]. `None` marks a reference that failed.
#[derive(Debug, Clone, Default)]
pub struct Resolved {
    /// Stylesheet URL to fully inlined CSS text.
    pub stylesheets: HashMap<String, Option<String>>,
    /// Original `<style>` text to inlined CSS text.
    pub style_blocks: HashMap<String, String>,
    /// Asset URL to data URI.
    pub assets: HashMap<String, Option<String>>,
}

fn rel_tokens(el: &Element) -> Vec<String> {
    el.attr("rel")
        .map(|rel| rel.split_ascii_whitespace().map(str::to_ascii_lowercase).collect())
        .unwrap_or_default()
}

/// Absolute href of a `<link>` that applies a stylesheet.
fn stylesheet_href(el: &Element, base: &str) -> Option<String> {
    if el.name() != "link" {
        return None;
    }
    let rel = rel_tokens(el);
    let is_sheet = rel.iter().any(|r| r == "stylesheet") && !rel.iter().any(|r| r == "alternate");
    let is_style_preload =
        rel.iter().any(|r| r == "preload") && el.attr("as").is_some_and(|a| a.trim().eq_ignore_ascii_case("style"));
    if !(is_sheet || is_style_preload) {
        return None;
    }
    el.attr("href").filter(|h| !is_embedded(h)).and_then(|h| resolve(base, h))
}

/// Hints and alternates always go; any other link goes when it points at the network.
fn is_dropped_link(el: &Element) -> bool {
    let rel = rel_tokens(el);
    if rel.iter().any(|r| DROPPED_LINK_RELS.contains(&r.as_str()) || r == "alternate") {
        return true;
    }
    el.attr("href").is_some_and(|href| !is_embedded(href.trim()))
}

fn is_dropped_meta(el: &Element) -> bool {
    el.attr("http-equiv").is_some_and(|v| {
        let v = v.trim().to_ascii_lowercase();
        v == "refresh" || v.starts_with("content-security-policy")
    })
}

fn is_media_parent(parent: &str) -> bool {
    matches!(parent, "video" | "audio")
}

/// Parse a `srcset` value into `(url, descriptor)` candidates.
pub fn parse_srcset(value: &str) -> Vec<(String, String)> {
    let mut candidates = Vec::new();
    let mut rest = value;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }

        let url_end = rest.find(|c: char| c.is_ascii_whitespace()).unwrap_or(rest.len());
        let mut url = &rest[..url_end];
        rest = &rest[url_end..];

        let mut descriptor = String::new();
        if url.ends_with(',') {
            url = url.trim_end_matches(',');
        } else {
            let mut depth = 0usize;
            let mut end = rest.len();
            for (i, c) in rest.char_indices() {
                match c {
                    '(' => depth += 1,
                    ')' => depth = depth.saturating_sub(1),
                    ',' if depth == 0 => {
                        end = i;
                        break;
                    }
                    _ => {}
                }
            }
            descriptor = rest[..end].trim().to_string();
            rest = &rest[end..];
        }

        if !url.is_empty() {
            candidates.push((url.to_string(), descriptor));
        }
    }

    candidates
}

fn image_references(el: &Element, base: &str) -> Vec<String> {
    let mut refs = Vec::new();
    for attr in IMAGE_SRC_ATTRS {
        if let Some(value) = el.attr(attr).filter(|v| !is_embedded(v))
            && let Some(abs) = resolve(base, value)
        {
            refs.push(abs);
        }
    }
    for attr in IMAGE_SRCSET_ATTRS {
        if let Some(value) = el.attr(attr) {
            refs.extend(
                parse_srcset(value)
                    .into_iter()
                    .filter(|(url, _)| !is_embedded(url))
                    .filter_map(|(url, _)| resolve(base, &url)),
            );
        }
    }
    refs
}

fn parent_name<'a>(el: &ElementRef<'a>) -> &'a str {
    el.parent().and_then(ElementRef::wrap).map(|p| p.value().name()).unwrap_or_default()
}

fn document_base(document: &Html, page_url: &str) -> String {
    let selector = Selector::parse("base[href]").expect("invalid selector");
    document
        .select(&selector)
        .next()
        .and_then(|b| b.value().attr("href"))
        .and_then(|href| resolve(page_url, href))
        .unwrap_or_else(|| page_url.to_string())
}

/// List every external reference of `source`, resolved against its base.
pub fn plan(source: &str, page_url: &str) -> DocumentPlan {
    let document = Html::parse_document(source);
    let base = document_base(&document, page_url);

    let mut stylesheets = Vec::new();
    let mut style_blocks = Vec::new();
    let mut assets = Vec::new();
    let mut seen = HashSet::new();

    for node in document.tree.root().descendants() {
        let Some(el_ref) = ElementRef::wrap(node) else {
            continue;
        };
        let el = el_ref.value();
        match el.name() {
            "script" => continue,
            "link" => {
                if let Some(href) = stylesheet_href(el, &base)
                    && seen.insert(href.clone())
                {
                    stylesheets.push(href);
                }
            }
            "style" => {
                let text: String = el_ref.text().collect();
                if !style_blocks.contains(&text) {
                    style_blocks.push(text);
                }
            }
            "img" => assets.extend(image_references(el, &base)),
            "source" if !is_media_parent(parent_name(&el_ref)) => assets.extend(image_references(el, &base)),
            "video" => {
                if let Some(poster) = el.attr("poster").filter(|p| !is_embedded(p)).and_then(|p| resolve(&base, p)) {
                    assets.push(poster);
                }
            }
            _ => {}
        }
        if let Some(style) = el.attr("style") {
            assets.extend(url_references(style, &base));
        }
    }

    let mut unique = HashSet::new();
    assets.retain(|a| unique.insert(a.clone()));

    DocumentPlan { document, base, stylesheets, style_blocks, assets }
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}

/// Serialized attribute name, keeping foreign prefixes such as `xlink:`.
fn attr_name(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}:{local}"),
        None => local.to_string(),
    }
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    escape_attr(value, out);
    out.push('"');
}

fn is_event_handler(name: &str) -> bool {
    name.len() > 2 && name[..2].eq_ignore_ascii_case("on")
}

struct ImageAttrs {
    src: Option<String>,
    srcset: Option<String>,
    /// At least one remote reference was present.
    remote: bool,
}

struct Serializer<'a> {
    base: &'a str,
    resolved: &'a Resolved,
    out: String,
}

impl Serializer<'_> {
    fn asset(&self, reference: &str) -> Option<&str> {
        resolve(self.base, reference)
            .and_then(|abs| self.resolved.assets.get(&abs))
            .and_then(|data| data.as_deref())
    }

    fn image_attrs(&self, el: &Element) -> ImageAttrs {
        let mut remote = false;

        let mut src = None;
        for attr in IMAGE_SRC_ATTRS {
            let Some(value) = el.attr(attr).map(str::trim).filter(|v| !v.is_empty()) else {
                continue;
            };
            if is_embedded(value) {
                src = Some(value.to_string());
                break;
            }
            remote = true;
            if let Some(data) = self.asset(value) {
                src = Some(data.to_string());
                break;
            }
        }

        let mut srcset = None;
        for attr in IMAGE_SRCSET_ATTRS {
            let Some(value) = el.attr(attr) else {
                continue;
            };
            let mut kept = Vec::new();
            for (url, descriptor) in parse_srcset(value) {
                let inlined = if is_embedded(&url) {
                    Some(url)
                } else {
                    remote = true;
                    self.asset(&url).map(str::to_string)
                };
                if let Some(url) = inlined {
                    kept.push(if descriptor.is_empty() { url } else { format!("{url} {descriptor}") });
                }
            }
            if !kept.is_empty() {
                srcset = Some(kept.join(", "));
                break;
            }
        }

        ImageAttrs { src, srcset, remote }
    }

    fn start_tag(&mut self, el: &Element, skip: &[&str]) {
        self.out.push('<');
        self.out.push_str(el.name());
        for (qual, value) in el.attrs.iter() {
            let name = attr_name(qual.prefix.as_deref(), &qual.local);
            if is_event_handler(&name) || skip.contains(&name.as_str()) {
                continue;
            }
            if name == "style" {
                let rewritten = rewrite_urls(value, self.base, &self.resolved.assets);
                push_attr(&mut self.out, &name, &rewritten);
            } else {
                push_attr(&mut self.out, &name, value);
            }
        }
    }

    fn children(&mut self, el_ref: ElementRef<'_>) {
        let name = el_ref.value().name();
        for child in el_ref.children() {
            if let Some(child_el) = ElementRef::wrap(child) {
                self.element(child_el, name);
                continue;
            }
            match child.value() {
                Node::Text(text) if RAW_TEXT_ELEMENTS.contains(&name) => self.out.push_str(text),
                Node::Text(text) => escape_text(text, &mut self.out),
                Node::Comment(comment) => {
                    self.out.push_str("<!--");
                    self.out.push_str(comment);
                    self.out.push_str("-->");
                }
                _ => {}
            }
        }
    }

    fn end_tag(&mut self, name: &str) {
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
    }

    fn element(&mut self, el_ref: ElementRef<'_>, parent: &str) {
        let el = el_ref.value();
        let name = el.name();

        match name {
            "script" | "noscript" | "base" | "embed" | "object" => return,
            "meta" if is_dropped_meta(el) => return,
            "meta" if el.attr("charset").is_some() => {
                self.out.push_str("<meta charset=\"utf-8\">");
                return;
            }
            "link" => {
                if let Some(href) = stylesheet_href(el, self.base) {
                    if let Some(Some(css)) = self.resolved.stylesheets.get(&href) {
                        self.out.push_str("<style");
                        if let Some(media) = el.attr("media") {
                            push_attr(&mut self.out, "media", media);
                        }
                        self.out.push('>');
                        self.out.push_str(css);
                        self.out.push_str("</style>");
                    }
                    return;
                }
                if is_dropped_link(el) {
                    return;
                }
            }
            "style" => {
                let text: String = el_ref.text().collect();
                let css = self.resolved.style_blocks.get(&text).unwrap_or(&text).clone();
                self.start_tag(el, &[]);
                self.out.push('>');
                self.out.push_str(&css);
                self.end_tag(name);
                return;
            }
            "source" if is_media_parent(parent) => return,
            "track" if el.attr("src").is_some_and(|src| !is_embedded(src.trim())) => return,
            "img" | "source" => {
                let attrs = self.image_attrs(el);
                if attrs.remote && attrs.src.is_none() && attrs.srcset.is_none() {
                    return;
                }
                self.start_tag(el, &["src", "srcset", "data-src", "data-lazy", "data-original", "data-srcset", "loading"]);
                if let Some(src) = &attrs.src {
                    push_attr(&mut self.out, "src", src);
                }
                if let Some(srcset) = &attrs.srcset {
                    push_attr(&mut self.out, "srcset", srcset);
                }
                self.out.push('>');
                return;
            }
            "video" | "audio" => {
                self.start_tag(el, &["src", "poster"]);
                if let Some(poster) = el.attr("poster") {
                    let inlined =
                        if is_embedded(poster) { Some(poster.to_string()) } else { self.asset(poster).map(str::to_string) };
                    if let Some(poster) = inlined {
                        push_attr(&mut self.out, "poster", &poster);
                    }
                }
                self.out.push('>');
                self.children(el_ref);
                self.end_tag(name);
                return;
            }
            "iframe" | "frame" => {
                self.start_tag(el, &["src"]);
                push_attr(&mut self.out, "src", "about:blank");
                self.out.push('>');
                self.children(el_ref);
                self.end_tag(name);
                return;
            }
            _ => {}
        }

        self.start_tag(el, &[]);
        self.out.push('>');
        if VOID_ELEMENTS.contains(&name) {
            return;
        }
        self.children(el_ref);
        if name == "head" {
            self.out.push_str("<style>");
            self.out.push_str(VISIBILITY_STYLE);
            self.out.push_str("</style>");
        }
        self.end_tag(name);
    }
}

/// Serialize the planned document with every reference replaced from `resolved`.
pub fn render(plan: &DocumentPlan, resolved: &Resolved) -> String {
    let mut serializer = Serializer { base: &plan.base, resolved, out: String::new() };

    for child in plan.document.tree.root().children() {
        if let Some(el) = ElementRef::wrap(child) {
            serializer.element(el, "");
            continue;
        }
        match child.value() {
            Node::Doctype(doctype) => {
                serializer.out.push_str("<!DOCTYPE ");
                serializer.out.push_str(doctype.name());
                serializer.out.push('>');
            }
            Node::Comment(comment) => {
                serializer.out.push_str("<!--");
                serializer.out.push_str(comment);
                serializer.out.push_str("-->");
            }
            _ => {}
        }
    }

    serializer.out
}
