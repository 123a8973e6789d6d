pub trait Browser: Send + Sync {
    fn open(&self, url: &str);
}

/// Opens URLs with the OS default handler.
pub struct SystemBrowser;

impl Browser for SystemBrowser {
    fn open(&self, url: &str) {
        match open::that_detached(url) {
            Ok(()) => tracing::debug!(url, "opened browser tab"),
            Err(err) => tracing::warn!(url, error = %err, "failed to open browser"),
        }
    }
}
