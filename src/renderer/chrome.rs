use std::path::PathBuf;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{Launcher, Renderer};
use crate::error::RenderError;

/// Fixed browser profile: headless, no automation flag, no GPU.
const CHROME_ARGS: &[&str] = &["--disable-blink-features=AutomationControlled", "--disable-gpu"];

/// Launches headless Chrome sessions.
pub struct ChromeLauncher {
    executable: Option<PathBuf>,
}

impl ChromeLauncher {
    pub fn new(executable: Option<PathBuf>) -> Self {
        Self { executable }
    }
}

#[async_trait]
impl Launcher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn Renderer>, RenderError> {
        let mut builder = BrowserConfig::builder().no_sandbox().args(CHROME_ARGS.iter().copied());
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(RenderError::Launch)?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;

        // The CDP connection only makes progress while its handler is polled.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler stopped: {}", e);
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                if let Some(Err(kill)) = browser.kill().await {
                    debug!("Could not kill browser after failed launch: {}", kill);
                }
                return Err(RenderError::Launch(e.to_string()));
            }
        };

        info!("Launched headless Chrome");
        Ok(Box::new(ChromeRenderer {
            browser,
            page,
            handler,
        }))
    }
}

struct ChromeRenderer {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

#[async_trait]
impl Renderer for ChromeRenderer {
    async fn navigate(&mut self, url: &str) -> Result<(), RenderError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| RenderError::Navigate {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn scroll_to(&mut self, fraction: f64) -> Result<(), RenderError> {
        let script = format!(
            "window.scrollTo(0, document.body.scrollHeight * {});",
            fraction.clamp(0.0, 1.0)
        );
        self.page
            .evaluate(script.as_str())
            .await
            .map_err(|e| RenderError::Script(e.to_string()))?;
        Ok(())
    }

    async fn current_markup(&mut self) -> Result<String, RenderError> {
        self.page
            .content()
            .await
            .map_err(|e| RenderError::Markup(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        let closed = self.browser.close().await;
        // The handler goes before any early return.
        self.handler.abort();
        closed.map_err(|e| RenderError::Close(e.to_string()))?;
        self.browser
            .wait()
            .await
            .map_err(|e| RenderError::Close(e.to_string()))?;
        Ok(())
    }
}
