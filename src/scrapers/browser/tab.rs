//! Tab lifetime: a render's tab is closed even when the render is abandoned.

use async_trait::async_trait;
use tracing::debug;

/// A browser-side resource released by an async call.
#[async_trait]
pub(crate) trait Closable: Send + 'static {
    async fn close(self);
}

#[cfg(feature = "browser")]
#[async_trait]
impl Closable for chromiumoxide::Page {
    async fn close(self) {
        if let Err(e) = chromiumoxide::Page::close(self).await {
            debug!("Failed to close tab: {}", e);
        }
    }
}

/// Owns a tab for the length of one render.
///
/// [`TabGuard::close`] closes it in place. If the guard is dropped first, for
/// instance because the attempt deadline cancelled the render, the close is
/// spawned onto the current runtime instead.
pub(crate) struct TabGuard<T: Closable> {
    tab: Option<T>,
}

impl<T: Closable> TabGuard<T> {
    pub fn new(tab: T) -> Self {
        Self { tab: Some(tab) }
    }

    pub async fn close(mut self) {
        if let Some(tab) = self.tab.take() {
            tab.close().await;
        }
    }
}

impl<T: Closable> Drop for TabGuard<T> {
    fn drop(&mut self) {
        let Some(tab) = self.tab.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Render abandoned; closing its tab in the background");
                handle.spawn(tab.close());
            }
            Err(_) => debug!("No runtime left to close an abandoned tab"),
        }
    }
}
