use super::{StakingChange, StakingChangeRequest};
use crate::types::{ConfigurationNumber, Error};
use std::collections::BTreeMap;
use tracing::debug;

/// The first configuration number handed out (`0` means "no change").
const INITIAL_CONFIGURATION_NUMBER: ConfigurationNumber = 1;

/// Ordered log of staking changes awaiting confirmation.
///
/// Every number in `[start, next)` is either still in the log or has been
/// applied and pruned. Changes are applied in ascending order and never
/// skipped.
#[derive(Clone, Debug)]
pub struct StakingChangeLog {
    next: ConfigurationNumber,
    start: ConfigurationNumber,
    changes: BTreeMap<ConfigurationNumber, StakingChange>,
}

impl Default for StakingChangeLog {
    fn default() -> Self {
        Self::new()
    }
}

impl StakingChangeLog {
    pub fn new() -> Self {
        Self {
            next: INITIAL_CONFIGURATION_NUMBER,
            start: INITIAL_CONFIGURATION_NUMBER,
            changes: BTreeMap::new(),
        }
    }

    /// The number the next recorded change will receive.
    pub fn next_configuration_number(&self) -> ConfigurationNumber {
        self.next
    }

    /// The lowest number that has not been applied yet.
    pub fn start_configuration_number(&self) -> ConfigurationNumber {
        self.start
    }

    /// The highest applied configuration number (`0` if none).
    pub fn current_configuration_number(&self) -> ConfigurationNumber {
        self.start - 1
    }

    /// Number of changes awaiting confirmation.
    pub fn pending(&self) -> usize {
        self.changes.len()
    }

    /// Returns the pending change with the given number.
    pub fn get(&self, configuration_number: ConfigurationNumber) -> Option<&StakingChange> {
        self.changes.get(&configuration_number)
    }

    /// Iterate over pending changes in application order.
    pub fn iter(&self) -> impl Iterator<Item = (ConfigurationNumber, &StakingChange)> {
        self.changes.iter().map(|(n, c)| (*n, c))
    }

    /// Record a change and return its configuration number.
    pub fn enqueue(&mut self, change: StakingChange) -> ConfigurationNumber {
        let configuration_number = self.next;
        self.next += 1;
        debug!(
            configuration_number,
            validator = %change.validator,
            op = change.op.name(),
            "recorded staking change"
        );
        self.changes.insert(configuration_number, change);
        configuration_number
    }

    /// Apply every change numbered in `[start, configuration_number]` in
    /// ascending order, returning how many were applied.
    ///
    /// Re-confirming the last applied number is a no-op. Nothing is removed
    /// from the log if the number is rejected.
    pub fn apply_up_to<F>(
        &mut self,
        configuration_number: ConfigurationNumber,
        mut apply: F,
    ) -> Result<usize, Error>
    where
        F: FnMut(StakingChangeRequest),
    {
        if configuration_number >= self.next {
            return Err(Error::CannotConfirmFutureChanges(
                configuration_number,
                self.next,
            ));
        }
        if configuration_number + 1 < self.start {
            return Err(Error::OldConfigurationNumber(
                configuration_number,
                self.start,
            ));
        }
        let mut applied = 0;
        for number in self.start..=configuration_number {
            let Some(change) = self.changes.remove(&number) else {
                continue;
            };
            apply(StakingChangeRequest {
                configuration_number: number,
                change,
            });
            applied += 1;
        }
        self.start = self.start.max(configuration_number + 1);
        Ok(applied)
    }
}
