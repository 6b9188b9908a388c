//! Single-slot "watering requested" signal between the trigger producers and
//! the watering loop.
//!
//! The slot holds at most one pending request.  Raising while a request is
//! already pending coalesces into it and keeps the first cause.  The watering
//! loop clears the slot when a session ends, so raises that land during a
//! session are absorbed by it rather than queued behind it.

use std::cell::Cell;

use serde::Serialize;
use tokio::sync::Notify;
use tracing::debug;

/// Why a watering session was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WateringCause {
    /// Monitor loop saw dry soil.
    Scheduled,
    /// Monitor loop acted on the override flag.
    ManualOverride,
    /// Remote watering command.
    Remote,
}

#[derive(Debug, Default)]
pub struct RequestSlot {
    pending: Cell<Option<WateringCause>>,
    wake: Notify,
}

impl RequestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a request pending.  Returns `false` when it coalesced into one
    /// that was already waiting.
    pub fn raise(&self, cause: WateringCause) -> bool {
        if let Some(existing) = self.pending.get() {
            debug!(?cause, ?existing, "watering request coalesced");
            return false;
        }
        self.pending.set(Some(cause));
        self.wake.notify_one();
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending.get().is_some()
    }

    /// Drop any pending request.
    pub fn clear(&self) -> Option<WateringCause> {
        self.pending.take()
    }

    /// Wait for a request and consume it.
    pub async fn wait(&self) -> WateringCause {
        loop {
            if let Some(cause) = self.pending.take() {
                return cause;
            }
            // A stale permit from a raise that was later cleared just loops.
            self.wake.notified().await;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn raise_then_wait_returns_cause() {
        let slot = RequestSlot::new();
        assert!(slot.raise(WateringCause::Remote));
        assert_eq!(slot.wait().await, WateringCause::Remote);
        assert!(!slot.is_pending());
    }

    #[tokio::test]
    async fn second_raise_coalesces_and_keeps_first_cause() {
        let slot = RequestSlot::new();
        assert!(slot.raise(WateringCause::Scheduled));
        assert!(!slot.raise(WateringCause::Remote));
        assert_eq!(slot.wait().await, WateringCause::Scheduled);
        assert!(!slot.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_wakes_on_later_raise() {
        let slot = RequestSlot::new();
        let (cause, ()) = tokio::join!(slot.wait(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            slot.raise(WateringCause::ManualOverride);
        });
        assert_eq!(cause, WateringCause::ManualOverride);
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_request_is_not_delivered() {
        let slot = RequestSlot::new();
        slot.raise(WateringCause::Remote);
        assert_eq!(slot.clear(), Some(WateringCause::Remote));

        let waited = tokio::time::timeout(Duration::from_secs(1), slot.wait()).await;
        assert!(waited.is_err(), "cleared request must not wake the waiter");
    }
}
