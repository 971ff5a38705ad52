//! Streaming completion relay.
//!
//! A spawned task drains the upstream [`FragmentStream`] into a bounded
//! channel; the caller-facing stream reads that channel and owns a drop
//! guard on the query's [`CancellationToken`]. When the caller goes away the
//! guard fires, the task stops reading and the upstream response is dropped.
//!
//! ```text
//! Idle ──start──▶ Streaming ──upstream end──▶ Completed
//!                     └──── error / cancel ──▶ Failed
//! ```

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, warn};

use crate::llm::FragmentStream;

const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Streaming,
    Completed,
    Failed,
}

impl RelayState {
    /// Checked transition; `None` when `next` is not reachable from `self`.
    pub fn advance(self, next: RelayState) -> Option<RelayState> {
        use RelayState::*;
        match (self, next) {
            (Idle, Streaming) | (Streaming, Completed) | (Streaming, Failed) => Some(next),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RelayState::Completed | RelayState::Failed)
    }
}

/// Why a relay ended in [`RelayState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailReason {
    Upstream(String),
    CallerGone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub state: RelayState,
    pub fragments: usize,
    pub failure: Option<FailReason>,
}

struct Relay {
    state: RelayState,
    fragments: usize,
    failure: Option<FailReason>,
}

impl Relay {
    fn new() -> Self {
        Self { state: RelayState::Idle, fragments: 0, failure: None }
    }

    fn to(&mut self, next: RelayState) {
        match self.state.advance(next) {
            Some(s) => self.state = s,
            None => warn!(from = ?self.state, to = ?next, "ignored invalid relay transition"),
        }
    }

    fn fail(&mut self, reason: FailReason) {
        self.failure = Some(reason);
        self.to(RelayState::Failed);
    }

    fn report(self) -> RelayReport {
        RelayReport { state: self.state, fragments: self.fragments, failure: self.failure }
    }
}

/// Forward `upstream` into `tx` until it ends, fails or `cancel` fires.
pub async fn run(
    mut upstream: FragmentStream,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) -> RelayReport {
    let mut relay = Relay::new();
    relay.to(RelayState::Streaming);

    while !relay.state.is_terminal() {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                relay.fail(FailReason::CallerGone);
                break;
            }
            item = upstream.next() => item,
        };

        match next {
            Some(Ok(fragment)) => {
                if tx.send(fragment).await.is_err() {
                    relay.fail(FailReason::CallerGone);
                } else {
                    relay.fragments += 1;
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "upstream failed mid-stream; closing");
                relay.fail(FailReason::Upstream(e.to_string()));
            }
            None => relay.to(RelayState::Completed),
        }
    }

    // Release the upstream connection before reporting.
    drop(upstream);
    let report = relay.report();
    match report.state {
        RelayState::Completed => info!(fragments = report.fragments, "answer stream completed"),
        _ => debug!(fragments = report.fragments, failure = ?report.failure, "answer stream ended early"),
    }
    report
}

/// Caller-facing half of a relay.
pub struct RelayHandle {
    pub fragments: BoxStream<'static, String>,
    pub task: JoinHandle<RelayReport>,
}

/// Spawn the relay task inside `span` and return the stream the caller
/// reads.
///
/// Dropping `fragments` cancels `cancel`.
pub fn spawn(upstream: FragmentStream, cancel: CancellationToken, span: Span) -> RelayHandle {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let guard = cancel.clone().drop_guard();
    let task = tokio::spawn(run(upstream, tx, cancel).instrument(span));

    let fragments = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv().await.map(|fragment| (fragment, (rx, guard)))
    })
    .boxed();

    RelayHandle { fragments, task }
}
