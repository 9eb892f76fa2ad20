//! Serialize all requests to a [Subnet](crate::Subnet) through a single writer.
//!
//! The [Actor] owns the subnet state. Callers interact with it through a cloneable [Mailbox]: each
//! request is queued, processed to completion and answered over a oneshot channel before the next
//! request is taken. Queries travel through the same queue, so a caller never observes a partially
//! applied request.
//!
//! When a checkpoint or batch reaches quorum, a configuration is confirmed or the subnet bootstraps,
//! the actor reports an [Activity] to the configured [Reporter](crate::Reporter).

use crate::{
    checkpoint::{BottomUpCheckpoint, BottomUpMsgBatch},
    quorum::QuorumCertificate,
    types::ConfigurationNumber,
    validators::{PowerTable, PowerUpdates},
};

mod writer;
pub use writer::Actor;
mod ingress;
pub use ingress::{Mailbox, Message, Parameter, Responder};
mod metrics;

/// Configuration for the [Actor].
pub struct Config<V, C, A, R> {
    /// Subnet parameters.
    pub subnet: crate::Config,

    /// Verifies validator signatures.
    pub verifier: V,

    /// Supplies the current height.
    pub clock: C,

    /// Decides who may perform privileged operations.
    pub authority: A,

    /// Receives [Activity] produced by the actor.
    pub reporter: R,

    /// Maximum number of requests to buffer before blocking senders.
    pub mailbox_size: usize,
}

/// Activity observed by the [Actor].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Activity {
    /// The subnet gathered enough validators to start. Carries the genesis power table.
    Bootstrapped(PowerTable),
    /// Staking changes up to `configuration_number` took effect.
    ConfigurationConfirmed {
        configuration_number: ConfigurationNumber,
        updates: PowerUpdates,
    },
    /// A checkpoint reached quorum.
    CheckpointCertified {
        checkpoint: BottomUpCheckpoint,
        certificate: QuorumCertificate,
    },
    /// A message batch reached quorum.
    BatchCertified {
        batch: BottomUpMsgBatch,
        certificate: QuorumCertificate,
    },
}
