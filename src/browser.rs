//! Opening URLs in the user's browser

use tracing::debug;

use crate::{Error, Result};

/// Capability to show a URL to the user
pub trait UrlOpener: Send + Sync {
    /// Open `url` externally
    fn open(&self, url: &str) -> Result<()>;
}

/// Opens URLs with the platform's default handler
/// (`open` on macOS, `xdg-open` and friends on Linux, `start` on Windows)
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl UrlOpener for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        debug!("Launching system browser");
        open::that_detached(url).map_err(|e| Error::Internal(format!("Failed to open browser: {e}")))
    }
}
