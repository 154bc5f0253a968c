pub mod fields;

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use crate::site;

/// Both listing layouts: legacy anchor cards and current container cards.
pub const CARD_CSS: &str = "a.tapItem, div.job_seen_beacon";
pub const NEXT_PAGE_CSS: &str = r#"a[data-testid="pagination-page-next"]"#;

static CARD_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse(CARD_CSS).unwrap());
static NEXT_PAGE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(NEXT_PAGE_CSS).unwrap());

/// Outer markup of one listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardFragment(pub String);

#[derive(Debug, Default)]
pub struct ParsedPage {
    pub cards: Vec<CardFragment>,
    pub next_page: Option<String>,
}

/// Split a rendered results page into card fragments and the next-page URL.
pub fn parse_page(markup: &str) -> ParsedPage {
    let doc = Html::parse_document(markup);

    // A card inside another card (one layout wrapping the other) is the same listing.
    let cards = doc
        .select(&CARD_SELECTOR)
        .filter(|el| !inside_card(el))
        .map(|el| CardFragment(el.html()))
        .collect();

    let next_page = doc
        .select(&NEXT_PAGE_SELECTOR)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(site::absolute_url);

    ParsedPage { cards, next_page }
}

fn inside_card(el: &ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| CARD_SELECTOR.matches(&a))
}
