use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::libs::backend::backend_traits::{Backend, BackendError, ChangeFilter};
use crate::libs::feed::{FeedError, FeedRepository};

/// Refreshes the feed whenever any post is inserted. The payload is not read;
/// every insert triggers a full fetch.
pub struct RealtimeBridge {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RealtimeBridge {
    /// Subscribes before returning, so inserts made after `start` resolves are seen.
    pub async fn start(
        backend: Arc<dyn Backend>,
        feed: Arc<FeedRepository>,
        parent: &CancellationToken,
    ) -> Result<Self, BackendError> {
        let mut subscription = backend.subscribe(ChangeFilter::inserts("posts")).await?;
        let cancel = parent.child_token();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = subscription.next() => event,
                };
                let Some(event) = event else {
                    warn!("post change feed closed");
                    break;
                };

                debug!(table = %event.table, "post inserted, refreshing feed");
                match feed.fetch_posts().await {
                    Ok(_) => {}
                    Err(FeedError::Cancelled) => break,
                    Err(e) => debug!(error = %e, "realtime refresh failed"),
                }
            }
            subscription.unsubscribe();
            debug!("post listener stopped");
        });

        info!("listening for new posts");
        Ok(Self { cancel, task })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for RealtimeBridge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
