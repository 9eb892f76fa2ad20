use crate::{Authority, Subnet, Verifier};
use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family, gauge::Gauge},
};

/// Outcome of a request.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Status {
    Accepted,
    Rejected,
}

/// Metric label that identifies a request and its outcome.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Label {
    /// The name of the request.
    request: String,
    status: Status,
}

impl Label {
    pub fn new(request: &str, accepted: bool) -> Self {
        Self {
            request: request.to_string(),
            status: if accepted {
                Status::Accepted
            } else {
                Status::Rejected
            },
        }
    }
}

/// Metrics for the [super::Actor].
pub struct Metrics {
    /// Number of mutating requests processed by request and status
    pub requests: Family<Label, Counter>,
    /// Number of staking changes recorded
    pub changes_enqueued: Counter,
    /// Number of staking changes confirmed
    pub changes_confirmed: Counter,
    /// Number of signatures accepted
    pub signatures: Counter,
    /// Number of checkpoints and batches certified
    pub quorums: Counter,
    /// Number of batches cut
    pub batches: Counter,
    /// Number of active validators
    pub active: Gauge,
    /// Number of waiting validators
    pub waiting: Gauge,
    /// Number of staking changes awaiting confirmation
    pub pending_changes: Gauge,
    /// Number of heights with signatures but no quorum
    pub incomplete_quorums: Gauge,
    /// Number of buffered outgoing messages
    pub buffered_envelopes: Gauge,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: &E) -> Self {
        let requests = Family::<Label, Counter>::default();
        context.register(
            "requests",
            "Number of mutating requests processed by request and status",
            requests.clone(),
        );
        let changes_enqueued = Counter::default();
        context.register(
            "changes_enqueued",
            "Number of staking changes recorded",
            changes_enqueued.clone(),
        );
        let changes_confirmed = Counter::default();
        context.register(
            "changes_confirmed",
            "Number of staking changes confirmed",
            changes_confirmed.clone(),
        );
        let signatures = Counter::default();
        context.register(
            "signatures",
            "Number of signatures accepted",
            signatures.clone(),
        );
        let quorums = Counter::default();
        context.register(
            "quorums",
            "Number of checkpoints and batches certified",
            quorums.clone(),
        );
        let batches = Counter::default();
        context.register("batches", "Number of batches cut", batches.clone());
        let active = Gauge::default();
        context.register("active", "Number of active validators", active.clone());
        let waiting = Gauge::default();
        context.register("waiting", "Number of waiting validators", waiting.clone());
        let pending_changes = Gauge::default();
        context.register(
            "pending_changes",
            "Number of staking changes awaiting confirmation",
            pending_changes.clone(),
        );
        let incomplete_quorums = Gauge::default();
        context.register(
            "incomplete_quorums",
            "Number of heights with signatures but no quorum",
            incomplete_quorums.clone(),
        );
        let buffered_envelopes = Gauge::default();
        context.register(
            "buffered_envelopes",
            "Number of buffered outgoing messages",
            buffered_envelopes.clone(),
        );

        Self {
            requests,
            changes_enqueued,
            changes_confirmed,
            signatures,
            quorums,
            batches,
            active,
            waiting,
            pending_changes,
            incomplete_quorums,
            buffered_envelopes,
        }
    }

    /// Refresh gauges from the current state of `subnet`.
    pub fn observe<V: Verifier, A: Authority>(&self, subnet: &Subnet<V, A>) {
        self.active.set(subnet.active_validators().len() as i64);
        self.waiting.set(subnet.waiting_validators().len() as i64);
        self.pending_changes.set(subnet.pending_changes() as i64);
        self.incomplete_quorums
            .set(subnet.incomplete_quorums() as i64);
        self.buffered_envelopes
            .set(subnet.buffered_envelopes() as i64);
    }
}
