//! Periodic batch uploader, alive only while a session is Active.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::session::RecorderInner;

/// Cancellation handle for one uploader incarnation. The timer is tied 1:1 to
/// an Active span: pause/clear shut it down, resume spawns a fresh one.
pub(crate) struct UploaderHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl UploaderHandle {
    /// Cancel the timer and abort the task so no further tick fires.
    pub(crate) fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.handle.abort();
    }
}

pub(crate) fn spawn(inner: Arc<RecorderInner>, period: Duration) -> UploaderHandle {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(upload_loop(inner, period, shutdown_rx));
    UploaderHandle { shutdown, handle }
}

async fn upload_loop(
    inner: Arc<RecorderInner>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    // The immediate first tick would flush a buffer that is empty by
    // construction; consume it so flushes land on interval boundaries.
    ticker.tick().await;

    let mut flushed = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        match inner.flush_once() {
            Ok(true) => {
                flushed += 1;
                debug!("[uploader] batch {} persisted", flushed);
            }
            Ok(false) => {
                // Empty buffer or no longer active; nothing to write.
            }
            Err(err) => {
                // Accepted data loss: the drained samples are not re-queued.
                warn!("[uploader] batch upload failed, samples dropped: {err}");
            }
        }
    }
    debug!("[uploader] stopped after {} batches", flushed);
}
