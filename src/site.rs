use std::sync::LazyLock;

use url::form_urlencoded;
use url::Url;

pub const ORIGIN: &str = "https://in.indeed.com";
const SEARCH_PATH: &str = "/jobs";

static ORIGIN_URL: LazyLock<Url> = LazyLock::new(|| Url::parse(ORIGIN).unwrap());

/// Search URL for a query and location. Spaces become `+`, anything else unsafe is percent-encoded.
pub fn search_url(query: &str, location: &str) -> String {
    format!(
        "{}{}?q={}&l={}",
        ORIGIN,
        SEARCH_PATH,
        encode(query.trim()),
        encode(location.trim())
    )
}

fn encode(term: &str) -> String {
    form_urlencoded::byte_serialize(term.as_bytes()).collect()
}

/// Resolve an href against the site origin. Blank or unparseable hrefs give `None`.
pub fn absolute_url(href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    ORIGIN_URL.join(href).ok().map(String::from)
}
