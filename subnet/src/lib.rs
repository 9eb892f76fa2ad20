//! Track the validator set of a subnet and certify its checkpoints with weighted quorums.
//!
//! # Status
//!
//! `commonware-subnet` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.
//!
//! # Overview
//!
//! A subnet is a child ledger anchored to a parent ledger. Its validators stake collateral (or are
//! assigned power by the owner) and periodically sign checkpoints that summarize the subnet and carry
//! its outgoing cross-subnet messages to the parent. This crate implements the bookkeeping state
//! machine behind that process:
//!
//! * [roster::PriorityRoster] ranks validators into an active set of bounded size and a waiting set.
//! * [staking::StakingChangeLog] orders staking requests and applies them only once confirmed.
//! * [staking::StakingReleaseQueue] holds withdrawn collateral until its locking period elapses.
//! * [validators::ValidatorSet] tracks pending and confirmed collateral and enforces the
//!   [types::PermissionMode] of the subnet.
//! * [quorum::QuorumMap] aggregates weighted signatures over checkpoints and message batches.
//! * [batcher::CrossMessageBatcher] buffers outgoing messages and cuts them into bounded batches.
//!
//! [Subnet] composes all of the above. Every operation either applies fully or fails with an [Error]
//! and leaves the state untouched. [actor::Actor] owns a [Subnet] and serializes all requests sent
//! through its [actor::Mailbox], so callers only ever observe state between two requests.
//!
//! # Capabilities
//!
//! The engine never verifies signatures, tracks time or decides who owns the subnet itself. These
//! are supplied by the host through [Verifier], [Clock] and [Authority]. Certified checkpoints,
//! certified batches and confirmed configurations are handed to a [Reporter].

use std::future::Future;

pub mod actor;
pub mod batcher;
pub mod checkpoint;
pub mod config;
pub use config::Config;
pub mod quorum;
pub mod roster;
pub mod staking;
mod subnet;
pub use subnet::Subnet;
pub mod types;
pub use types::{Error, ErrorKind};
pub mod validators;

#[cfg(test)]
pub mod mocks;

use types::{Address, Height};

/// Verifies signatures produced by validators.
pub trait Verifier: Clone + Send + 'static {
    /// Returns true if `signature` is a valid signature of `message` by `public_key`.
    ///
    /// `public_key` is the metadata the validator registered with.
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;
}

/// Source of the current height of the host chain.
pub trait Clock: Clone + Send + 'static {
    /// Returns the current height. Never decreases.
    fn now(&self) -> Height;
}

/// Decides who may perform privileged operations.
pub trait Authority: Clone + Send + 'static {
    /// Returns true if `caller` owns the subnet.
    fn is_owner(&self, caller: &Address) -> bool;
}

/// Reporter is the interface responsible for reporting activity to some external actor.
pub trait Reporter: Clone + Send + 'static {
    /// Activity is specified by the underlying engine and can be interpreted if desired.
    type Activity;

    /// Report some activity observed by the engine.
    fn report(&mut self, activity: Self::Activity) -> impl Future<Output = ()> + Send;
}
