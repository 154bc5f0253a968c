pub mod chrome;

use async_trait::async_trait;

use crate::error::RenderError;

/// A browser session that renders client-side pages.
///
/// One session drives one page at a time; the crawler never shares it.
#[async_trait]
pub trait Renderer: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), RenderError>;

    /// Scroll to a fraction of the document height (0.0 top, 1.0 bottom).
    async fn scroll_to(&mut self, fraction: f64) -> Result<(), RenderError>;

    async fn current_markup(&mut self) -> Result<String, RenderError>;

    /// Terminate the session. Called exactly once, after the last page.
    async fn close(&mut self) -> Result<(), RenderError>;
}

/// Opens renderer sessions. The crawler acquires one per crawl and closes it on every path.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn Renderer>, RenderError>;
}
