//! Embedded landing page and static files

use rust_embed::RustEmbed;
use std::borrow::Cow;

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Assets;

const INDEX_PAGE: &str = "index.html";
const VERSION_MARKER: &str = "{{ version }}";

/// An embedded file with its MIME type
#[derive(Debug, Clone)]
pub struct Asset {
    pub mime: String,
    pub data: Cow<'static, [u8]>,
}

/// Landing page HTML with the version filled in
pub fn index_page() -> Option<String> {
    let file = Assets::get(INDEX_PAGE)?;
    let html = String::from_utf8_lossy(&file.data);
    Some(html.replace(VERSION_MARKER, env!("CARGO_PKG_VERSION")))
}

/// File below `static/`
pub fn static_asset(path: &str) -> Option<Asset> {
    let file = Assets::get(&format!("static/{}", path.trim_start_matches('/')))?;
    Some(Asset {
        mime: file.metadata.mimetype().to_string(),
        data: file.data,
    })
}
