//! Send-side rate limiter
//!
//! Each logical channel ("audio", "text", ...) gets a FIFO of send slots at
//! least `min_interval` apart. Slots are reserved when `send` is called, not
//! when its future is first polled, so queue order is call order even when
//! the futures are spawned onto different tasks.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Default)]
struct ChannelState {
    last_slot: Option<Instant>,
    pending: Arc<AtomicUsize>,
}

/// Decrements the channel's pending count when the send leaves the queue,
/// including when its future is dropped before firing.
struct QueuedSend(Arc<AtomicUsize>);

impl Drop for QueuedSend {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    channels: Mutex<HashMap<String, ChannelState>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Queue `message` on `channel` and invoke `send_fn` when its slot comes.
    ///
    /// The first send on an idle channel fires immediately; later ones fire
    /// exactly `min_interval` after the previous slot. Nothing is dropped.
    /// The future resolves to whatever `send_fn` returns, so a failed send
    /// only affects its own caller.
    pub fn send<M, F, Fut, T>(
        &self,
        channel: &str,
        message: M,
        send_fn: F,
    ) -> impl Future<Output = T>
    where
        F: FnOnce(M) -> Fut,
        Fut: Future<Output = T>,
    {
        let now = Instant::now();
        let (slot, queued) = {
            let mut channels = self.channels.lock();
            let state = channels.entry(channel.to_string()).or_default();
            let slot = match state.last_slot {
                Some(last) => (last + self.min_interval).max(now),
                None => now,
            };
            state.last_slot = Some(slot);
            state.pending.fetch_add(1, Ordering::AcqRel);
            (slot, QueuedSend(Arc::clone(&state.pending)))
        };

        if slot > now {
            debug!(
                "Rate limiting {}: send delayed {:?}",
                channel,
                slot.duration_since(now)
            );
        }

        async move {
            if slot > Instant::now() {
                tokio::time::sleep_until(slot).await;
            }
            drop(queued);
            send_fn(message).await
        }
    }

    /// Sends waiting for their slot on `channel`
    pub fn pending(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map(|state| state.pending.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Time of the most recently reserved slot on `channel`
    pub fn last_slot(&self, channel: &str) -> Option<Instant> {
        self.channels.lock().get(channel).and_then(|s| s.last_slot)
    }
}
