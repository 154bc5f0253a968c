use thiserror::Error;

/// Why a single card produced no record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardError {
    #[error("card fragment contains no element")]
    EmptyFragment,
    #[error("no field locator matched the card")]
    NoFields,
}

/// Failure reported by a renderer implementation.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("navigation to {url} failed: {reason}")]
    Navigate { url: String, reason: String },
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("could not read page markup: {0}")]
    Markup(String),
    #[error("failed to close browser: {0}")]
    Close(String),
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Launch(RenderError),
    #[error("page {page}: {source}")]
    Navigation {
        page: usize,
        #[source]
        source: RenderError,
    },
    #[error("page {page}: {source}")]
    Render {
        page: usize,
        #[source]
        source: RenderError,
    },
}

/// The commit batch was rolled back; nothing from it was persisted.
#[derive(Debug, Error)]
#[error("storage commit failed, batch rolled back: {0}")]
pub struct StorageError(#[from] pub rusqlite::Error);
