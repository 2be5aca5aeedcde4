//! Interrupt/async distribution (spec §4.11, §4.12, §5), ground-truthed
//! against `examples/original_source/backends/SharedDummy/include/SharedDummyBackend.h`'s
//! `findSems`/interrupt-count dispatch and
//! `examples/original_source/backends/xdma/src/EventFile.cc`'s blocking
//! read-then-distribute loop (the two real no-payload "something changed,
//! go re-read it" notify sources in this pack): a `Domain` is a
//! fan-out notifier, not a value channel -- every source that can signal
//! "something changed" (an XDMA event file, a `SharedDummy` interrupt, a
//! VARIABLE write) holds one `Domain` and calls [`Domain::distribute`];
//! every subscriber (a [`crate::accessor::push::PushAccessorDecorator`])
//! blocks on its own receiver and re-reads the actual new value from
//! wherever it lives once woken, the same two-step "wake, then poll"
//! split the original's `cppext::future_queue` subscribers use.
//!
//! Channel-based fan-out grounds on `bin/chainofcommand`'s
//! `tokio::sync::mpsc` relay pattern, generalised to `std::sync::mpsc`
//! since this crate's distribution path runs on plain OS threads (spec §5:
//! "parallel threads, not cooperative"), not an async runtime.

use std::sync::mpsc;
use std::sync::Mutex;

use crate::error::RuntimeError;

/// One notification posted to a subscriber's queue.
#[derive(Debug, Clone)]
pub enum DistributeEvent {
    /// New data is available upstream; a subscriber should re-read.
    NewData,
    /// The source entered exception state; subscribers should surface it
    /// on their next read instead of blocking forever.
    Exception(RuntimeError),
    /// [`Domain::interrupt`] was called: unblock with no new data, as if
    /// the read had been cancelled (spec §5's `interrupt()`).
    Interrupted,
}

/// Fan-out notifier shared by every push-capable accessor built on one
/// source (one VARIABLE, one XDMA event file, one SharedDummy interrupt
/// number). Dead subscribers (their receiver dropped) are pruned lazily on
/// the next [`Domain::distribute`].
#[derive(Default)]
pub struct Domain {
    subscribers: Mutex<Vec<mpsc::Sender<DistributeEvent>>>,
}

impl Domain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber, returning the receiving half of its
    /// notification queue.
    pub fn subscribe(&self) -> mpsc::Receiver<DistributeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Notify every live subscriber that new data is available. Surplus
    /// events between two subscriber wake-ups are intentionally coalesced
    /// by the channel itself (each `recv()` drains exactly one), matching
    /// XDMA's "surplus interrupts are intentionally coalesced" (spec
    /// §4.12) -- distribution does not carry a counter, only a wake-up.
    pub fn distribute(&self) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(DistributeEvent::NewData).is_ok());
    }

    /// Propagate an exception to every subscriber (spec §4.8's
    /// `setException`: "publish an exception onto every push-queue").
    pub fn distribute_exception(&self, error: RuntimeError) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(DistributeEvent::Exception(error.clone())).is_ok());
    }

    /// Unblock every live subscriber without signalling new data (spec
    /// §5's `interrupt()`).
    pub fn interrupt(&self) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(DistributeEvent::Interrupted).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribute_wakes_every_live_subscriber() {
        let domain = Domain::new();
        let a = domain.subscribe();
        let b = domain.subscribe();
        domain.distribute();
        assert!(matches!(a.recv().unwrap(), DistributeEvent::NewData));
        assert!(matches!(b.recv().unwrap(), DistributeEvent::NewData));
    }

    #[test]
    fn dropped_subscribers_are_pruned_on_next_distribute() {
        let domain = Domain::new();
        {
            let _dropped = domain.subscribe();
        }
        assert_eq!(domain.subscribers.lock().unwrap().len(), 1);
        domain.distribute();
        assert_eq!(domain.subscribers.lock().unwrap().len(), 0);
    }

    #[test]
    fn interrupt_delivers_without_new_data() {
        let domain = Domain::new();
        let rx = domain.subscribe();
        domain.interrupt();
        assert!(matches!(rx.recv().unwrap(), DistributeEvent::Interrupted));
    }
}
