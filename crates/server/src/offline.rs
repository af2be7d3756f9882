//! Offline gallery export.
//!
//! The current session rendered as one HTML file: a card per image with the
//! host, the viewport mode, a link to the captured page and the image itself
//! as a `data:` URI, so the file opens without the server.

use std::fmt::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::store::StoredImage;

const GALLERY_CSS: &str = "body{margin:0;font-family:system-ui,sans-serif;background:#f4f5f7;color:#1d2330}\
main{max-width:1200px;margin:0 auto;padding:24px}\
.grid{display:grid;grid-template-columns:repeat(auto-fill,minmax(280px,1fr));gap:16px}\
.card{background:#fff;border-radius:8px;box-shadow:0 1px 3px rgba(0,0,0,.12);overflow:hidden}\
.card header{display:flex;justify-content:space-between;align-items:center;padding:8px 12px}\
.card img{display:block;width:100%;height:auto}\
.card nav{display:flex;gap:12px;padding:8px 12px}\
.badge{font-size:12px;padding:2px 8px;border-radius:999px;background:#e3e8f2}";

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn mode_label(mode: &str) -> String {
    let mut chars = mode.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn card(out: &mut String, image: &StoredImage, bytes: &[u8]) {
    let data = format!("data:{};base64,{}", image.meta.mime, STANDARD.encode(bytes));
    let title = image.meta.page_title.as_deref().unwrap_or("Captured page");
    let url = escape(&image.meta.page_url);

    let _ = write!(
        out,
        "<article class=\"card\"><header><strong>{host}</strong><span class=\"badge\">{mode}</span></header>\
         <img src=\"{data}\" alt=\"{title}\" width=\"{width}\" height=\"{height}\">\
         <nav><a href=\"{url}\" target=\"_blank\" rel=\"noopener\">View page</a>\
         <a href=\"{data}\" download=\"{id}\">Download image</a></nav></article>",
        host = escape(&image.host),
        mode = mode_label(image.meta.mode.as_str()),
        title = escape(title),
        width = image.meta.dimensions.width,
        height = image.meta.dimensions.height,
        id = escape(&image.image_id),
    );
}

/// Build the gallery document for `session` from images and their bytes.
pub fn build_gallery(session: &str, images: &[(StoredImage, Vec<u8>)]) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>pageshot session {session}</title><style>{GALLERY_CSS}</style></head>\
         <body><main><header><h1>pageshot offline gallery</h1><p>Session {session} &middot; {count} images</p></header>\
         <section class=\"grid\">",
        session = escape(session),
        count = images.len(),
    );
    for (image, bytes) in images {
        card(&mut out, image, bytes);
    }
    out.push_str("</section></main></body></html>");
    out
}
