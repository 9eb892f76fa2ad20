//! Buffer outgoing cross-subnet messages and cut them into bounded batches.

use crate::{
    checkpoint::IpcEnvelope,
    types::{Error, Height},
};
use std::collections::VecDeque;
use tracing::debug;

/// The first nonce assigned to an envelope.
const INITIAL_NONCE: u64 = 1;

/// Buffers bottom-up envelopes, assigning consecutive nonces, until they are
/// cut into a batch or drained into a checkpoint.
///
/// Envelopes are buffered as groups. A group enqueued atomically is never
/// split between two cuts.
#[derive(Clone, Debug)]
pub struct CrossMessageBatcher {
    batch_period: Height,
    max_msgs_per_batch: usize,

    next_nonce: u64,
    last_cut: Height,
    groups: VecDeque<Vec<IpcEnvelope>>,
    buffered: usize,
}

impl CrossMessageBatcher {
    pub fn new(batch_period: Height, max_msgs_per_batch: usize, now: Height) -> Self {
        Self {
            batch_period,
            max_msgs_per_batch,
            next_nonce: INITIAL_NONCE,
            last_cut: now,
            groups: VecDeque::new(),
            buffered: 0,
        }
    }

    pub fn batch_period(&self) -> Height {
        self.batch_period
    }

    pub fn set_batch_period(&mut self, batch_period: Height) {
        self.batch_period = batch_period;
    }

    pub fn max_msgs_per_batch(&self) -> usize {
        self.max_msgs_per_batch
    }

    /// Change the batch size limit. Fails if a buffered atomic group would no
    /// longer fit in a single batch.
    pub fn set_max_msgs_per_batch(&mut self, max_msgs_per_batch: usize) -> Result<(), Error> {
        if max_msgs_per_batch == 0 {
            return Err(Error::InvalidParameter("max_msgs_per_batch", "must be positive"));
        }
        if let Some(largest) = self.groups.iter().map(Vec::len).max() {
            if largest > max_msgs_per_batch {
                return Err(Error::AtomicGroupTooLarge(largest, max_msgs_per_batch));
            }
        }
        self.max_msgs_per_batch = max_msgs_per_batch;
        Ok(())
    }

    /// The nonce the next envelope will receive.
    pub fn next_nonce(&self) -> u64 {
        self.next_nonce
    }

    /// The height of the last cut.
    pub fn last_cut(&self) -> Height {
        self.last_cut
    }

    /// Number of buffered envelopes.
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Iterate over buffered envelopes in nonce order.
    pub fn iter(&self) -> impl Iterator<Item = &IpcEnvelope> {
        self.groups.iter().flatten()
    }

    fn stamp(&mut self, envelope: &mut IpcEnvelope) -> u64 {
        let nonce = self.next_nonce;
        self.next_nonce += 1;
        envelope.nonce = nonce;
        nonce
    }

    /// Buffer `envelope` and return the nonce assigned to it.
    pub fn enqueue(&mut self, mut envelope: IpcEnvelope) -> u64 {
        let nonce = self.stamp(&mut envelope);
        debug!(nonce, to = %envelope.to, value = envelope.value, "enqueued envelope");
        self.groups.push_back(vec![envelope]);
        self.buffered += 1;
        nonce
    }

    /// Buffer `envelopes` as a group that is never split by a cut. Returns the
    /// nonces assigned to the first and last envelope.
    pub fn enqueue_atomic(&mut self, mut envelopes: Vec<IpcEnvelope>) -> Result<(u64, u64), Error> {
        if envelopes.is_empty() {
            return Err(Error::InvalidEnvelope("empty atomic group"));
        }
        if envelopes.len() > self.max_msgs_per_batch {
            return Err(Error::AtomicGroupTooLarge(
                envelopes.len(),
                self.max_msgs_per_batch,
            ));
        }
        let first = self.next_nonce;
        for envelope in envelopes.iter_mut() {
            self.stamp(envelope);
        }
        let last = self.next_nonce - 1;
        debug!(first, last, "enqueued atomic group");
        self.buffered += envelopes.len();
        self.groups.push_back(envelopes);
        Ok((first, last))
    }

    /// Returns true if a cut at `now` would succeed.
    pub fn is_ready(&self, now: Height) -> bool {
        self.buffered > 0
            && (self.buffered >= self.max_msgs_per_batch
                || now.saturating_sub(self.last_cut) >= self.batch_period)
    }

    /// Take whole groups from the front of the buffer, up to the batch limit.
    fn take(&mut self) -> Vec<IpcEnvelope> {
        let mut msgs = Vec::new();
        while let Some(group) = self.groups.front() {
            if msgs.len() + group.len() > self.max_msgs_per_batch {
                break;
            }
            if let Some(group) = self.groups.pop_front() {
                msgs.extend(group);
            }
        }
        self.buffered -= msgs.len();
        msgs
    }

    /// Cut a batch if the batch period has elapsed since the last cut or the
    /// buffer is full.
    pub fn cut(&mut self, now: Height) -> Result<Vec<IpcEnvelope>, Error> {
        if self.buffered == 0 {
            return Err(Error::NothingToCut);
        }
        if !self.is_ready(now) {
            return Err(Error::BatchNotReady(
                now.saturating_sub(self.last_cut),
                self.batch_period,
            ));
        }
        let msgs = self.take();
        self.last_cut = now;
        debug!(now, msgs = msgs.len(), remaining = self.buffered, "cut batch");
        Ok(msgs)
    }

    /// Take the next batch-sized prefix for inclusion into a checkpoint,
    /// regardless of the batch period.
    pub fn drain(&mut self) -> Vec<IpcEnvelope> {
        self.take()
    }
}
