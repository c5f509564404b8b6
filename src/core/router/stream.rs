//! Stream wrapper owning per-deployment stat updates
//!
//! The router cannot observe how a streaming response ends, so the wrapper
//! does: natural termination records a success with measured latency, an
//! error records a failure, and dropping the wrapper before the terminal
//! chunk (client disconnect) also records a failure. Dropping the inner
//! stream closes the upstream connection, which propagates the
//! cancellation.

use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use uuid::Uuid;

use crate::core::providers::ChunkStream;
use crate::core::router::cooldown::{CooldownTracker, DeploymentStats};
use crate::core::types::StreamChunk;
use crate::utils::error::GatewayError;

/// Stat bookkeeping for one in-flight stream.
///
/// Exactly one of `success`/`failure` runs; if neither did by drop time the
/// stream was cancelled and counts as a failure.
struct StreamTracker {
    deployment_id: Uuid,
    stats: Arc<DeploymentStats>,
    cooldown: Arc<CooldownTracker>,
    started: Instant,
    completed: bool,
}

impl StreamTracker {
    fn success(mut self) {
        self.completed = true;
        self.stats.end_request();
        self.stats.record_latency(self.started.elapsed());
        self.cooldown.record_success(self.deployment_id);
    }

    fn failure(mut self) {
        self.completed = true;
        self.stats.end_request();
        self.stats.record_failure();
        self.cooldown.record_failure(self.deployment_id);
    }
}

impl Drop for StreamTracker {
    fn drop(&mut self) {
        if !self.completed {
            self.stats.end_request();
            self.stats.record_failure();
            self.cooldown.record_failure(self.deployment_id);
        }
    }
}

pin_project! {
    /// Chunk stream returned by the router for streaming completions.
    ///
    /// Forwards every chunk verbatim; stat updates fire exactly once, on
    /// the terminal event of whichever kind occurs first.
    pub struct RouterStream {
        #[pin]
        inner: ChunkStream,
        tracker: Option<StreamTracker>,
    }
}

impl std::fmt::Debug for RouterStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterStream").finish_non_exhaustive()
    }
}

impl RouterStream {
    pub(crate) fn new(
        inner: ChunkStream,
        deployment_id: Uuid,
        stats: Arc<DeploymentStats>,
        cooldown: Arc<CooldownTracker>,
        started: Instant,
    ) -> Self {
        Self {
            inner,
            tracker: Some(StreamTracker {
                deployment_id,
                stats,
                cooldown,
                started,
                completed: false,
            }),
        }
    }
}

impl Stream for RouterStream {
    type Item = Result<StreamChunk, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(error))) => {
                if let Some(tracker) = this.tracker.take() {
                    tracker.failure();
                }
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                if let Some(tracker) = this.tracker.take() {
                    tracker.success();
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
