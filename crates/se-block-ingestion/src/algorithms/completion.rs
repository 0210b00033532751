//! # Completion Detector
//!
//! Two-state machine (`Awaiting` → `Complete`) keyed on the height of settled
//! blocks, never on request order. The writer stage feeds it once a block's
//! write outcome is known, so completion can't race ahead of the last write.

use tokio::sync::oneshot;

use crate::domain::Height;

/// Detector state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionState {
    /// Target height not settled yet.
    Awaiting,
    /// Target settled; terminal.
    Complete,
}

/// Fires a one-shot signal the first time the target height is settled.
#[derive(Debug)]
pub struct CompletionDetector {
    target: Option<Height>,
    state: CompletionState,
    signal: Option<oneshot::Sender<Height>>,
}

impl CompletionDetector {
    /// Detector waiting for `target`, plus the receiver the coordinator awaits.
    pub fn new(target: Height) -> (Self, oneshot::Receiver<Height>) {
        let (tx, rx) = oneshot::channel();
        let detector = Self {
            target: Some(target),
            state: CompletionState::Awaiting,
            signal: Some(tx),
        };
        (detector, rx)
    }

    /// Detector for a run with nothing to request; already terminal.
    pub fn already_complete() -> Self {
        Self {
            target: None,
            state: CompletionState::Complete,
            signal: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> CompletionState {
        self.state
    }

    /// Height being waited for.
    pub fn target(&self) -> Option<Height> {
        self.target
    }

    /// Whether the run is complete.
    pub fn is_complete(&self) -> bool {
        self.state == CompletionState::Complete
    }

    /// Record that `height` has been settled. Returns `true` only on the
    /// transition to `Complete`.
    pub fn observe(&mut self, height: Height) -> bool {
        if self.state == CompletionState::Complete || self.target != Some(height) {
            return false;
        }

        self.state = CompletionState::Complete;
        if let Some(signal) = self.signal.take() {
            // Receiver may already be gone if the coordinator is unwinding.
            let _ = signal.send(height);
        }
        true
    }
}
