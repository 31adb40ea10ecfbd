//! Progress events and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use super::grid::{GridResult, Recommendation};
use crate::ChunkConfig;

/// One message of a grid-search progress stream.
///
/// Serialized with a `type` tag:
///
/// ```json
/// {"type":"config","current":1,"total":4,"config":{"targetTokens":100,"overlapTokens":0,"strategy":"sentence"}}
/// {"type":"progress","message":"100t / 0o / sentence: 42 chunks created"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GridEvent {
    /// Free-form status line.
    Progress {
        /// Human-readable message.
        message: String,
    },
    /// A configuration is starting.
    #[serde(rename = "config")]
    ConfigStarted {
        /// 1-based position in the grid.
        current: usize,
        /// Number of configurations in the grid.
        total: usize,
        /// The configuration.
        config: ChunkConfig,
    },
    /// A configuration finished evaluating.
    Result(GridResult),
    /// Every configuration finished.
    Complete {
        /// All results, in grid order.
        results: Vec<GridResult>,
        /// The best configuration, if any ran.
        recommendation: Option<Recommendation>,
    },
    /// The run aborted.
    Error {
        /// What went wrong.
        message: String,
    },
}

/// Shared cancellation flag.
///
/// Clones observe the same flag. Long-running operations check it between
/// units of work and stop early; work already persisted stays persisted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Where pipeline steps report progress.
///
/// A closed receiver cancels the token: nobody is listening any more.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<GridEvent>>,
    cancel: CancelToken,
    label: Option<String>,
}

impl EventSink {
    /// Report to `tx`, cancelling `cancel` if the receiver goes away.
    #[must_use]
    pub fn new(tx: mpsc::Sender<GridEvent>, cancel: CancelToken) -> Self {
        Self {
            tx: Some(tx),
            cancel,
            label: None,
        }
    }

    /// Discard events; never cancelled unless `cancel` is.
    #[must_use]
    pub fn silent(cancel: CancelToken) -> Self {
        Self {
            tx: None,
            cancel,
            label: None,
        }
    }

    /// A sink whose progress messages are prefixed with `label`.
    #[must_use]
    pub fn labelled(&self, label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..self.clone()
        }
    }

    /// Send an event.
    pub async fn send(&self, event: GridEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(event).await.is_err() {
            debug!("event receiver closed, cancelling");
            self.cancel.cancel();
        }
    }

    /// Send a [`GridEvent::Progress`] message.
    pub async fn progress(&self, message: impl AsRef<str>) {
        let message = match &self.label {
            Some(label) => format!("{label}: {}", message.as_ref()),
            None => message.as_ref().to_string(),
        };
        self.send(GridEvent::Progress { message }).await;
    }

    /// Whether work should stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The token this sink cancels.
    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}
