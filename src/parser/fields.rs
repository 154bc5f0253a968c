use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::error::CardError;
use crate::model::{JobRecord, NOT_MENTIONED};
use crate::site;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Company,
    Location,
    PostedAt,
    Summary,
    Salary,
}

pub type ExtractFn = fn(ElementRef<'_>) -> Option<String>;

/// One way of finding a field: a CSS selector plus how to read the matched element.
#[derive(Clone, Copy)]
pub struct Locator {
    pub css: &'static str,
    pub read: ExtractFn,
}

const fn text(css: &'static str) -> Locator {
    Locator { css, read: trimmed_text }
}

const fn collapsed(css: &'static str) -> Locator {
    Locator { css, read: collapsed_text }
}

/// Locators per field, in priority order. Current layout first, legacy after.
pub const FIELD_RULES: &[(Field, &[Locator])] = &[
    (Field::Title, &[text("h2.jobTitle")]),
    (Field::Company, &[text(r#"[data-testid="company-name"]"#)]),
    (Field::Location, &[text(r#"[data-testid="text-location"]"#)]),
    (Field::PostedAt, &[text(r#"[data-testid="myJobsStateDate"]"#)]),
    (
        Field::Summary,
        &[
            collapsed("div.job-snippet"),
            collapsed(r#"div[data-testid="job-snippet"]"#),
        ],
    ),
    (
        Field::Salary,
        &[
            text(r#"div[data-testid="attribute_snippet_testid-salary"]"#),
            text("div.salary-snippet"),
        ],
    ),
];

static COMPILED: LazyLock<Vec<(Field, Vec<(Selector, ExtractFn)>)>> = LazyLock::new(|| {
    FIELD_RULES
        .iter()
        .map(|(field, locators)| {
            let compiled = locators
                .iter()
                .map(|l| (Selector::parse(l.css).unwrap(), l.read))
                .collect();
            (*field, compiled)
        })
        .collect()
});

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

fn trimmed_text(el: ElementRef<'_>) -> Option<String> {
    let t = el.text().collect::<String>();
    let t = t.trim();
    (!t.is_empty()).then(|| t.to_string())
}

fn collapsed_text(el: ElementRef<'_>) -> Option<String> {
    trimmed_text(el).map(|t| normalize_whitespace(&t))
}

/// Collapse every whitespace run (newlines included) into one space.
pub fn normalize_whitespace(s: &str) -> String {
    WHITESPACE_RE.replace_all(s.trim(), " ").into_owned()
}

/// Run a field's locators in order and return the first non-empty value.
pub fn locate(field: Field, card: ElementRef<'_>) -> Option<String> {
    let (_, locators) = COMPILED.iter().find(|(f, _)| *f == field)?;
    locators.iter().find_map(|(selector, read)| {
        card.select(selector).find_map(|el| read(el))
    })
}

/// Parse one card fragment into a record. Missing fields become `NOT_MENTIONED`;
/// only a fragment with no element, or with nothing recognisable, is an error.
pub fn extract(fragment: &str, extracted_at: NaiveDate) -> Result<JobRecord, CardError> {
    let doc = Html::parse_fragment(fragment);
    let card = doc
        .root_element()
        .children()
        .find_map(ElementRef::wrap)
        .ok_or(CardError::EmptyFragment)?;

    let title = locate(Field::Title, card);
    let company = locate(Field::Company, card);
    let location = locate(Field::Location, card);
    let posted_at = locate(Field::PostedAt, card);
    let summary = locate(Field::Summary, card);
    let salary = locate(Field::Salary, card);
    let source_url = card.value().attr("href").and_then(site::absolute_url);

    let found = [&title, &company, &location, &posted_at, &summary, &salary, &source_url];
    if found.iter().all(|f| f.is_none()) {
        return Err(CardError::NoFields);
    }

    let or_sentinel = |v: Option<String>| v.unwrap_or_else(|| NOT_MENTIONED.to_string());
    Ok(JobRecord {
        title: or_sentinel(title),
        company: or_sentinel(company),
        location: or_sentinel(location),
        posted_at: or_sentinel(posted_at),
        extracted_at,
        summary: or_sentinel(summary),
        salary: or_sentinel(salary),
        source_url: or_sentinel(source_url),
    })
}
