//! Deterministic capabilities for tests.

use crate::{types::Address, types::Height, Authority, Clock, Reporter};
use commonware_cryptography::{Hasher, Sha256};
use futures::channel::mpsc;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Produce the signature [Verifier] accepts for `message` under `public_key`.
pub fn sign(public_key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(public_key);
    hasher.update(message);
    hasher.finalize().to_vec()
}

/// Accepts signatures produced by [sign].
#[derive(Clone, Copy, Debug, Default)]
pub struct Verifier;

impl crate::Verifier for Verifier {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        sign(public_key, message) == signature
    }
}

/// A clock that only moves when told to.
#[derive(Clone, Debug, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn set(&self, now: Height) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Height {
        self.0.load(Ordering::SeqCst)
    }
}

/// A single owner.
#[derive(Clone, Copy, Debug)]
pub struct Owner(pub Address);

impl Authority for Owner {
    fn is_owner(&self, caller: &Address) -> bool {
        self.0 == *caller
    }
}

/// Forwards every reported activity to a channel.
#[derive(Debug)]
pub struct Collector<T> {
    sender: mpsc::UnboundedSender<T>,
}

// Derive would require `T: Clone`
impl<T> Clone for Collector<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> Collector<T> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<T>) {
        let (sender, receiver) = mpsc::unbounded();
        (Self { sender }, receiver)
    }
}

impl<T: Send + 'static> Reporter for Collector<T> {
    type Activity = T;

    async fn report(&mut self, activity: T) {
        let _ = self.sender.unbounded_send(activity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};

    /// An activity that cannot be cloned.
    #[derive(Debug, PartialEq, Eq)]
    struct Opaque(u8);

    #[test_traced]
    fn test_collector_clones_without_cloneable_activity() {
        let (collector, mut activities) = Collector::new();
        let mut reporter = collector.clone();
        deterministic::Runner::default().start(|_| async move {
            reporter.report(Opaque(1)).await;
        });
        drop(collector);
        assert_eq!(activities.try_recv().ok(), Some(Opaque(1)));
    }
}
