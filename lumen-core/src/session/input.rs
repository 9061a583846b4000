//! Input collaborator boundary and the poll worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::MissedTickBehavior;

/// Default cadence of the input-poll worker.
pub const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Gamepad and pointer input forwarding, specified only at its edges.
pub trait InputSource: Send + Sync {
    /// Start delivering input; the stream has focus of the pointer.
    fn capture(&self);

    /// Sample attached controllers and forward changes.
    fn poll(&self);

    /// Stop delivering input and release pointer lock.
    fn release(&self);
}

/// Poll `input` every `interval` until `running` clears.
pub async fn poll_input(input: Arc<dyn InputSource>, running: Arc<AtomicBool>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !running.load(Ordering::SeqCst) {
            break;
        }
        input.poll();
    }
    tracing::debug!("input poll worker exiting");
}

/// Input source that ignores everything.
#[derive(Debug, Default)]
pub struct NullInput;

impl InputSource for NullInput {
    fn capture(&self) {}
    fn poll(&self) {}
    fn release(&self) {}
}
