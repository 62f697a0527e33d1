//! Engine progress reporting.
//!
//! Engines report progress by sending [`ProgressEvent`]s to a [`ProgressSink`].
//! A background task owned by [`ProgressReporter`] folds those events into a
//! single [`ProgressState`], which anyone can sample or subscribe to. Resets,
//! completion and flushes travel through the same channel as engine events,
//! so the background task is the only thing that ever writes the state, and
//! everything is applied in the order it was sent.

use futures::{
    StreamExt as _,
    channel::{mpsc, oneshot},
};
use tokio::sync::watch;

use crate::{async_utils::JoinWorker, prelude::*};

/// Label shown before the first run.
pub const IDLE_LABEL: &str = "idle";

/// Label shown at the start of each run.
pub const STARTING_LABEL: &str = "starting";

/// Label shown once progress reaches 1.
pub const DONE_LABEL: &str = "Done";

/// A raw progress notification from an engine.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgressEvent {
    /// How far along the current engine operation is, from 0 to 1.
    pub progress: Option<f64>,

    /// What the engine is doing.
    pub status: Option<String>,
}

impl ProgressEvent {
    /// An event carrying both progress and a status.
    pub fn new(progress: f64, status: impl Into<String>) -> Self {
        Self {
            progress: Some(progress),
            status: Some(status.into()),
        }
    }

    /// An event with a status but no progress value. These do not change the
    /// reported state.
    #[cfg(test)]
    pub fn status_only(status: impl Into<String>) -> Self {
        Self {
            progress: None,
            status: Some(status.into()),
        }
    }
}

/// The normalized progress of the current run.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressState {
    /// Between 0 and 1.
    pub fraction: f64,

    /// Human-readable description of the current step.
    pub label: String,
}

impl ProgressState {
    fn with_label(fraction: f64, label: &str) -> Self {
        Self {
            fraction,
            label: label.to_owned(),
        }
    }

    /// Fold an engine event into this state. Returns `true` if anything
    /// changed.
    fn apply_event(&mut self, event: ProgressEvent) -> bool {
        let Some(progress) = event.progress.filter(|p| !p.is_nan()) else {
            return false;
        };
        let fraction = progress.clamp(0.0, 1.0);
        let label = if fraction == 1.0 {
            DONE_LABEL.to_owned()
        } else {
            event.status.unwrap_or_default()
        };
        let next = Self { fraction, label };
        if *self == next {
            false
        } else {
            *self = next;
            true
        }
    }
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::with_label(0.0, IDLE_LABEL)
    }
}

/// Messages understood by the reporter task.
enum ProgressMessage {
    Event(ProgressEvent),
    Reset,
    Complete,
    Flush(oneshot::Sender<()>),
}

/// Where engines send their progress events. Cheap to clone.
#[derive(Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<ProgressMessage>,
}

impl ProgressSink {
    /// Report an event. Events sent after the reporter has shut down are
    /// dropped.
    pub fn emit(&self, event: ProgressEvent) {
        self.send(ProgressMessage::Event(event));
    }

    fn send(&self, msg: ProgressMessage) {
        if self.tx.unbounded_send(msg).is_err() {
            trace!("progress reporter has shut down, dropping message");
        }
    }
}

/// Owner of the current [`ProgressState`].
pub struct ProgressReporter {
    sink: ProgressSink,
    state_rx: watch::Receiver<ProgressState>,
}

impl ProgressReporter {
    /// Start a reporter task. The returned worker finishes once the reporter
    /// and every [`ProgressSink`] have been dropped.
    pub fn start() -> (Self, JoinWorker) {
        let (tx, mut rx) = mpsc::unbounded::<ProgressMessage>();
        let (state_tx, state_rx) = watch::channel(ProgressState::default());
        let worker = tokio::spawn(async move {
            while let Some(msg) = rx.next().await {
                match msg {
                    ProgressMessage::Event(event) => {
                        state_tx.send_if_modified(|state| state.apply_event(event));
                    }
                    ProgressMessage::Reset => {
                        state_tx.send_replace(ProgressState::with_label(
                            0.0,
                            STARTING_LABEL,
                        ));
                    }
                    ProgressMessage::Complete => {
                        state_tx.send_replace(ProgressState::with_label(1.0, DONE_LABEL));
                    }
                    ProgressMessage::Flush(done) => {
                        // The caller may have given up waiting.
                        let _ = done.send(());
                    }
                }
            }
            Ok(())
        });
        let reporter = Self {
            sink: ProgressSink { tx },
            state_rx,
        };
        (reporter, JoinWorker::from_handle(worker))
    }

    /// A sink to hand to an engine.
    pub fn sink(&self) -> ProgressSink {
        self.sink.clone()
    }

    /// Go back to `{ 0, "starting" }`.
    pub fn reset(&self) {
        self.sink.send(ProgressMessage::Reset);
    }

    /// Jump to `{ 1, "Done" }`.
    pub fn complete(&self) {
        self.sink.send(ProgressMessage::Complete);
    }

    /// Wait until every message sent before this call has been applied.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sink.send(ProgressMessage::Flush(tx));
        rx.await.context("progress reporter shut down before flushing")
    }

    /// The most recent state.
    pub fn state(&self) -> ProgressState {
        self.state_rx.borrow().clone()
    }

    /// Watch for state changes.
    pub fn subscribe(&self) -> watch::Receiver<ProgressState> {
        self.state_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_without_progress_are_ignored() {
        let mut state = ProgressState::default();
        assert!(!state.apply_event(ProgressEvent::status_only("loading")));
        assert_eq!(state, ProgressState::default());
    }

    #[test]
    fn progress_uses_event_status_until_done() {
        let mut state = ProgressState::default();
        assert!(state.apply_event(ProgressEvent::new(0.5, "recognizing text")));
        assert_eq!(state.fraction, 0.5);
        assert_eq!(state.label, "recognizing text");

        assert!(state.apply_event(ProgressEvent::new(1.0, "recognizing text")));
        assert_eq!(state, ProgressState::with_label(1.0, DONE_LABEL));
    }

    #[test]
    fn out_of_range_progress_is_clamped() {
        let mut state = ProgressState::default();
        state.apply_event(ProgressEvent::new(-0.25, "loading"));
        assert_eq!(state.fraction, 0.0);
        state.apply_event(ProgressEvent::new(3.0, "loading"));
        assert_eq!(state.label, DONE_LABEL);
    }

    #[tokio::test]
    async fn reporter_applies_messages_in_order() -> Result<()> {
        let (reporter, worker) = ProgressReporter::start();
        assert_eq!(reporter.state().label, IDLE_LABEL);

        let sink = reporter.sink();
        reporter.reset();
        reporter.flush().await?;
        assert_eq!(reporter.state(), ProgressState::with_label(0.0, STARTING_LABEL));

        sink.emit(ProgressEvent::new(0.25, "loading language"));
        sink.emit(ProgressEvent::status_only("ignored"));
        reporter.flush().await?;
        assert_eq!(reporter.state().label, "loading language");

        reporter.complete();
        reporter.flush().await?;
        assert_eq!(reporter.state(), ProgressState::with_label(1.0, DONE_LABEL));

        drop(sink);
        drop(reporter);
        worker.join().await
    }
}
