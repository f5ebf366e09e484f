//! Quote stream subscriptions
//!
//! A provider answers a quote request with a [`RouteStream`]: a cancellable
//! subscription that yields discrete batches of routes in arrival order.
//! Request/response providers produce a stream with at most one batch, streaming
//! providers feed it from a background task through a [`RouteSink`].

#[cfg(feature = "ws-stream")]
pub mod websocket_stream;

use tokio::sync::mpsc;
use tracing::debug;

use crate::providers::{ProviderError, QuoteRoute};

/// One delivery from a provider: a batch of routes, or the error that ended it
pub type RouteBatch = Result<Vec<QuoteRoute>, ProviderError>;

/// Default buffer between a streaming provider's task and the consumer
pub const DEFAULT_STREAM_CAPACITY: usize = 16;

/// Consumer side of a provider subscription
///
/// Dropping the stream closes it. `close()` may be called any number of times,
/// before or after the producer has finished, and never fails.
#[derive(Debug)]
pub struct RouteStream {
    provider: String,
    batches: mpsc::Receiver<RouteBatch>,
    delivered: usize,
    closed: bool,
}

/// Producer side of a provider subscription
#[derive(Debug, Clone)]
pub struct RouteSink {
    tx: mpsc::Sender<RouteBatch>,
}

impl RouteStream {
    /// Create a connected sink/stream pair
    pub fn channel(provider: impl Into<String>, capacity: usize) -> (RouteSink, RouteStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            RouteSink { tx },
            RouteStream {
                provider: provider.into(),
                batches: rx,
                delivered: 0,
                closed: false,
            },
        )
    }

    /// A finished stream carrying exactly one batch
    pub fn once(provider: impl Into<String>, routes: Vec<QuoteRoute>) -> Self {
        Self::finished_with(provider, Ok(routes))
    }

    /// A finished stream carrying one error
    pub fn failed(provider: impl Into<String>, error: ProviderError) -> Self {
        Self::finished_with(provider, Err(error))
    }

    /// A finished stream carrying nothing
    pub fn empty(provider: impl Into<String>) -> Self {
        let (_sink, stream) = Self::channel(provider, 1);
        stream
    }

    fn finished_with(provider: impl Into<String>, batch: RouteBatch) -> Self {
        let (sink, stream) = Self::channel(provider, 1);
        // capacity is one and the receiver is alive, so this cannot fail
        let _ = sink.tx.try_send(batch);
        stream
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Number of batches handed to the consumer so far
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Wait for the next batch; `None` once the stream is finished or closed
    pub async fn next_batch(&mut self) -> Option<RouteBatch> {
        if self.closed {
            return None;
        }
        let batch = self.batches.recv().await;
        match &batch {
            Some(Ok(_)) => self.delivered += 1,
            Some(Err(_)) | None => {}
        }
        batch
    }

    /// Stop the subscription
    ///
    /// The producer observes the closure through [`RouteSink::closed`] and
    /// performs its own protocol shutdown.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.batches.close();
        debug!(provider = %self.provider, delivered = self.delivered, "route stream closed");
    }
}

impl Drop for RouteStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl RouteSink {
    /// Deliver a batch; returns false when the consumer is gone
    pub async fn send(&self, batch: RouteBatch) -> bool {
        self.tx.send(batch).await.is_ok()
    }

    /// Resolves once the consumer closed or dropped the stream
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}
