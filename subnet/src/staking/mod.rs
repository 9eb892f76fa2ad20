//! Staking changes and the queues that order and delay them.
//!
//! Staking is two-phase: a change is recorded in the [StakingChangeLog] when
//! requested and only takes effect on the validator set once the owner
//! confirms its configuration number. Withdrawn collateral then waits in the
//! [StakingReleaseQueue] until its locking period elapses.

use crate::types::{Address, Amount, ConfigurationNumber};

mod log;
pub use log::StakingChangeLog;
mod release;
pub use release::{StakingRelease, StakingReleaseQueue};

/// The operation a [StakingChange] performs, with its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StakingOperation {
    /// Add collateral.
    Deposit(Amount),
    /// Remove collateral (released after the locking period).
    Withdraw(Amount),
    /// Replace the validator metadata.
    SetMetadata(Vec<u8>),
    /// Assign power to a validator of a federated subnet.
    SetFederatedPower { metadata: Vec<u8>, power: Amount },
}

impl StakingOperation {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            StakingOperation::Deposit(_) => "deposit",
            StakingOperation::Withdraw(_) => "withdraw",
            StakingOperation::SetMetadata(_) => "set_metadata",
            StakingOperation::SetFederatedPower { .. } => "set_federated_power",
        }
    }
}

/// A change to the stake of a validator. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakingChange {
    pub validator: Address,
    pub op: StakingOperation,
}

/// A [StakingChange] with the configuration number assigned when it was recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakingChangeRequest {
    pub configuration_number: ConfigurationNumber,
    pub change: StakingChange,
}
