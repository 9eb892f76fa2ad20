//! Validator records, power ranking and permission policies.
//!
//! Validator records live in a flat arena indexed by the same ids the
//! [PriorityRoster] ranks, so the roster never holds references into the set.
//!
//! Staking requests (`join`, `stake`, `unstake`, `leave`, `set_federated_power`)
//! validate their input, adjust the pending `total_collateral` and record changes
//! in the [StakingChangeLog] they are handed. Confirmed changes flow back through
//! [ValidatorSet::apply], which is the only place confirmed collateral (and hence
//! the roster) changes.
//!
//! Deposits and federated power are bounded when they are requested: the sum of
//! every pending collateral (and of every requested federated power) must fit in
//! an [Amount]. Confirmed totals are sums over a prefix of the same requests, so
//! they never exceed those bounds and applying a change cannot overflow.

use crate::{
    roster::{Membership, PriorityRoster},
    staking::{StakingChange, StakingChangeLog, StakingChangeRequest, StakingOperation},
    types::{Address, Amount, ConfigurationNumber, Error, PermissionMode},
};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Stake of a validator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatorInfo {
    /// Power assigned by the owner (federated subnets only).
    pub federated_power: Amount,
    /// Collateral reflected in the active/waiting sets.
    pub confirmed_collateral: Amount,
    /// Confirmed collateral plus pending deposits minus pending withdrawals.
    pub total_collateral: Amount,
    /// Opaque validator metadata (the public key signatures are checked against).
    pub metadata: Vec<u8>,
}

/// A validator and the weight it signs with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validator {
    pub address: Address,
    pub weight: Amount,
    pub metadata: Vec<u8>,
}

/// Snapshot of the active validators.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PowerTable(pub Vec<Validator>);

impl PowerTable {
    /// Sum of all weights. Saturates at [Amount::MAX].
    pub fn total_weight(&self) -> Amount {
        self.0
            .iter()
            .fold(0, |sum: Amount, v| sum.saturating_add(v.weight))
    }
}

/// Changes between two [PowerTable]s. Removed validators are reported with zero weight.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PowerUpdates(pub Vec<Validator>);

/// Compute the updates that turn `current` into `next`.
pub fn power_diff(current: &PowerTable, next: &PowerTable) -> PowerUpdates {
    let current: BTreeMap<_, _> = current.0.iter().map(|v| (v.address, v)).collect();
    let next: BTreeMap<_, _> = next.0.iter().map(|v| (v.address, v)).collect();

    let mut diff = Vec::new();
    for (address, v) in &current {
        if !next.contains_key(address) {
            diff.push(Validator {
                address: *address,
                weight: 0,
                metadata: v.metadata.clone(),
            });
        }
    }
    for (address, v) in &next {
        if current.get(address) != Some(v) {
            diff.push((*v).clone());
        }
    }
    diff.sort_by(|a, b| a.address.cmp(&b.address));
    PowerUpdates(diff)
}

/// The set of validators of a subnet.
#[derive(Clone, Debug)]
pub struct ValidatorSet {
    mode: PermissionMode,
    min_validator_stake: Amount,
    static_allows_leave: bool,

    roster: PriorityRoster,
    records: Vec<Option<(Address, ValidatorInfo)>>,
    ids: BTreeMap<Address, usize>,
    free: Vec<usize>,
    total_confirmed_collateral: Amount,
    total_pending_collateral: Amount,
    requested_power: BTreeMap<Address, Amount>,
    total_requested_power: Amount,

    bootstrapped: bool,
    genesis: PowerTable,

    reward_pool: Amount,
    rewards: BTreeMap<Address, Amount>,
}

impl ValidatorSet {
    pub fn new(
        mode: PermissionMode,
        active_limit: u16,
        min_validator_stake: Amount,
        static_allows_leave: bool,
    ) -> Self {
        Self {
            mode,
            min_validator_stake,
            static_allows_leave,
            roster: PriorityRoster::new(active_limit as usize),
            records: Vec::new(),
            ids: BTreeMap::new(),
            free: Vec::new(),
            total_confirmed_collateral: 0,
            total_pending_collateral: 0,
            requested_power: BTreeMap::new(),
            total_requested_power: 0,
            bootstrapped: false,
            genesis: PowerTable::default(),
            reward_pool: 0,
            rewards: BTreeMap::new(),
        }
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    pub fn active_limit(&self) -> u16 {
        self.roster.limit() as u16
    }

    /// Change the number of active seats, promoting or demoting validators.
    pub fn set_active_limit(&mut self, limit: u16) {
        self.roster.set_limit(limit as usize);
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    /// Freeze the current active set as the genesis power table.
    pub fn bootstrap(&mut self) {
        if self.bootstrapped {
            return;
        }
        self.bootstrapped = true;
        self.genesis = self.power_table();
        info!(
            validators = self.genesis.0.len(),
            weight = self.genesis.total_weight(),
            "subnet bootstrapped"
        );
    }

    /// The active validators at bootstrap.
    pub fn genesis(&self) -> &PowerTable {
        &self.genesis
    }

    pub fn get(&self, validator: &Address) -> Option<&ValidatorInfo> {
        let id = self.ids.get(validator)?;
        self.records[*id].as_ref().map(|(_, info)| info)
    }

    /// Number of known validators (confirmed or pending).
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of validators with confirmed power.
    pub fn confirmed_len(&self) -> usize {
        self.roster.active_len() + self.roster.waiting_len()
    }

    pub fn total_confirmed_collateral(&self) -> Amount {
        self.total_confirmed_collateral
    }

    /// Confirmed power of `validator` (zero if unknown).
    pub fn power(&self, validator: &Address) -> Amount {
        self.ids
            .get(validator)
            .map(|id| self.roster.power(*id))
            .unwrap_or_default()
    }

    pub fn is_active(&self, validator: &Address) -> bool {
        self.membership(validator) == Membership::Active
    }

    pub fn is_waiting(&self, validator: &Address) -> bool {
        self.membership(validator) == Membership::Waiting
    }

    fn membership(&self, validator: &Address) -> Membership {
        self.ids
            .get(validator)
            .map(|id| self.roster.membership(*id))
            .unwrap_or(Membership::Inactive)
    }

    fn collect(&self, ids: impl Iterator<Item = usize>) -> Vec<Validator> {
        let mut validators: Vec<_> = ids
            .filter_map(|id| {
                let (address, info) = self.records[id].as_ref()?;
                Some(Validator {
                    address: *address,
                    weight: self.roster.power(id),
                    metadata: info.metadata.clone(),
                })
            })
            .collect();
        validators.sort_by(|a, b| b.weight.cmp(&a.weight).then(a.address.cmp(&b.address)));
        validators
    }

    /// Active validators, strongest first.
    pub fn active_validators(&self) -> Vec<Validator> {
        self.collect(self.roster.active())
    }

    /// Waiting validators, strongest first.
    pub fn waiting_validators(&self) -> Vec<Validator> {
        self.collect(self.roster.waiting())
    }

    /// The active validators as a [PowerTable].
    pub fn power_table(&self) -> PowerTable {
        PowerTable(self.active_validators())
    }

    /// Total power of the active validators.
    pub fn active_weight(&self) -> Amount {
        self.roster
            .active()
            .fold(0, |sum: Amount, id| sum.saturating_add(self.roster.power(id)))
    }

    /// Lowest active power and highest waiting power.
    pub fn boundary(&self) -> (Option<Amount>, Option<Amount>) {
        (self.roster.min_active_power(), self.roster.max_waiting_power())
    }

    fn ensure_mode(&self, method: &'static str, allowed: bool) -> Result<(), Error> {
        if allowed {
            Ok(())
        } else {
            Err(Error::MethodNotAllowed(method, self.mode))
        }
    }

    /// Collateral-based staking is open in `Collateral` mode and in `Static`
    /// mode until bootstrap.
    fn staking_allowed(&self) -> bool {
        match self.mode {
            PermissionMode::Collateral => true,
            PermissionMode::Static => !self.bootstrapped,
            PermissionMode::Federated => false,
        }
    }

    /// Returns the pending collateral total after depositing `amount`.
    fn check_deposit(&self, amount: Amount) -> Result<Amount, Error> {
        self.total_pending_collateral
            .checked_add(amount)
            .ok_or(Error::AmountOverflow(amount, "collateral"))
    }

    fn total_collateral(&self, validator: &Address) -> Amount {
        self.get(validator)
            .map(|info| info.total_collateral)
            .unwrap_or_default()
    }

    fn record_mut(&mut self, validator: Address) -> &mut ValidatorInfo {
        let id = match self.ids.get(&validator) {
            Some(id) => *id,
            None => {
                let id = match self.free.pop() {
                    Some(id) => {
                        self.records[id] = Some((validator, ValidatorInfo::default()));
                        id
                    }
                    None => {
                        self.records
                            .push(Some((validator, ValidatorInfo::default())));
                        self.records.len() - 1
                    }
                };
                self.ids.insert(validator, id);
                id
            }
        };
        let (_, info) = self.records[id].get_or_insert_with(|| (validator, ValidatorInfo::default()));
        info
    }

    /// Become a validator by depositing `amount` of collateral.
    ///
    /// Records the metadata and the deposit as two consecutive changes and
    /// returns the configuration number of the deposit.
    pub fn join(
        &mut self,
        log: &mut StakingChangeLog,
        validator: Address,
        metadata: Vec<u8>,
        amount: Amount,
    ) -> Result<ConfigurationNumber, Error> {
        self.ensure_mode("join", self.staking_allowed())?;
        if validator.is_zero() {
            return Err(Error::ZeroAddress);
        }
        if amount == 0 {
            return Err(Error::CollateralIsZero);
        }
        if amount < self.min_validator_stake {
            return Err(Error::NotEnoughCollateral);
        }
        if self.total_collateral(&validator) > 0 {
            return Err(Error::AlreadyValidator(validator));
        }
        if self.mode == PermissionMode::Static && self.confirmed_len() >= self.roster.limit() {
            return Err(Error::ActiveLimitExceeded(self.active_limit()));
        }
        let pending = self.check_deposit(amount)?;

        self.total_pending_collateral = pending;
        self.record_mut(validator).total_collateral = amount;
        log.enqueue(StakingChange {
            validator,
            op: StakingOperation::SetMetadata(metadata),
        });
        Ok(log.enqueue(StakingChange {
            validator,
            op: StakingOperation::Deposit(amount),
        }))
    }

    /// Add `amount` to the collateral of an existing validator.
    pub fn stake(
        &mut self,
        log: &mut StakingChangeLog,
        validator: Address,
        amount: Amount,
    ) -> Result<ConfigurationNumber, Error> {
        self.ensure_mode("stake", self.staking_allowed())?;
        if amount == 0 {
            return Err(Error::CollateralIsZero);
        }
        if self.total_collateral(&validator) == 0 {
            return Err(Error::NotValidator(validator));
        }
        let pending = self.check_deposit(amount)?;

        self.total_pending_collateral = pending;
        self.record_mut(validator).total_collateral += amount;
        Ok(log.enqueue(StakingChange {
            validator,
            op: StakingOperation::Deposit(amount),
        }))
    }

    /// Withdraw part of the collateral. Use [ValidatorSet::leave] to withdraw all of it.
    pub fn unstake(
        &mut self,
        log: &mut StakingChangeLog,
        validator: Address,
        amount: Amount,
    ) -> Result<ConfigurationNumber, Error> {
        self.ensure_mode("unstake", self.staking_allowed())?;
        if amount == 0 {
            return Err(Error::CollateralIsZero);
        }
        let total = self.total_collateral(&validator);
        if total == 0 {
            return Err(Error::NotValidator(validator));
        }
        if amount >= total {
            return Err(Error::NotEnoughCollateral);
        }

        self.total_pending_collateral -= amount;
        self.record_mut(validator).total_collateral -= amount;
        Ok(log.enqueue(StakingChange {
            validator,
            op: StakingOperation::Withdraw(amount),
        }))
    }

    /// Withdraw all collateral.
    pub fn leave(
        &mut self,
        log: &mut StakingChangeLog,
        validator: Address,
    ) -> Result<ConfigurationNumber, Error> {
        let allowed = match self.mode {
            PermissionMode::Collateral => true,
            PermissionMode::Static => !self.bootstrapped || self.static_allows_leave,
            PermissionMode::Federated => false,
        };
        self.ensure_mode("leave", allowed)?;
        let total = self.total_collateral(&validator);
        if total == 0 {
            return Err(Error::NotValidator(validator));
        }

        self.total_pending_collateral -= total;
        self.record_mut(validator).total_collateral = 0;
        Ok(log.enqueue(StakingChange {
            validator,
            op: StakingOperation::Withdraw(total),
        }))
    }

    /// Assign `power` to `validator` (federated subnets only). Zero power removes it.
    pub fn set_federated_power(
        &mut self,
        log: &mut StakingChangeLog,
        validator: Address,
        metadata: Vec<u8>,
        power: Amount,
    ) -> Result<ConfigurationNumber, Error> {
        self.ensure_mode(
            "set_federated_power",
            self.mode == PermissionMode::Federated,
        )?;
        if validator.is_zero() {
            return Err(Error::ZeroAddress);
        }
        let previous = self
            .requested_power
            .get(&validator)
            .copied()
            .unwrap_or_default();
        let total = (self.total_requested_power - previous)
            .checked_add(power)
            .ok_or(Error::AmountOverflow(power, "federated power"))?;

        self.total_requested_power = total;
        if power == 0 {
            self.requested_power.remove(&validator);
        } else {
            self.requested_power.insert(validator, power);
        }
        Ok(log.enqueue(StakingChange {
            validator,
            op: StakingOperation::SetFederatedPower { metadata, power },
        }))
    }

    /// Apply a confirmed change. Returns the withdrawn amount that must be
    /// scheduled for release, if any.
    pub fn apply(&mut self, request: StakingChangeRequest) -> Option<(Address, Amount)> {
        let StakingChangeRequest {
            configuration_number,
            change: StakingChange { validator, op },
        } = request;
        debug!(configuration_number, %validator, op = op.name(), "applying staking change");

        let info = self.record_mut(validator);
        let (mut deposited, mut withdrawn) = (0, 0);
        let released = match op {
            StakingOperation::Deposit(amount) => {
                // Bounded by the pending total checked on request
                info.confirmed_collateral = info.confirmed_collateral.saturating_add(amount);
                deposited = amount;
                None
            }
            StakingOperation::Withdraw(amount) => {
                let amount = amount.min(info.confirmed_collateral);
                info.confirmed_collateral -= amount;
                withdrawn = amount;
                (amount > 0).then_some((validator, amount))
            }
            StakingOperation::SetMetadata(metadata) => {
                info.metadata = metadata;
                None
            }
            StakingOperation::SetFederatedPower { metadata, power } => {
                info.metadata = metadata;
                info.federated_power = power;
                None
            }
        };
        self.total_confirmed_collateral =
            self.total_confirmed_collateral.saturating_add(deposited) - withdrawn;
        self.refresh(validator);
        released
    }

    /// Push the effective power of `validator` into the roster and drop its
    /// record once nothing is left.
    fn refresh(&mut self, validator: Address) {
        let Some(id) = self.ids.get(&validator).copied() else {
            return;
        };
        let Some((_, info)) = self.records[id].as_ref() else {
            return;
        };
        let power = match self.mode {
            PermissionMode::Federated => info.federated_power,
            PermissionMode::Collateral | PermissionMode::Static => info.confirmed_collateral,
        };
        let empty = info.confirmed_collateral == 0
            && info.total_collateral == 0
            && info.federated_power == 0;

        let before = self.roster.membership(id);
        self.roster.update(id, power);
        let after = self.roster.membership(id);
        if before != after {
            debug!(%validator, power, ?before, ?after, "membership changed");
        }

        if empty {
            self.records[id] = None;
            self.ids.remove(&validator);
            self.free.push(id);
        }
    }

    /// Add `amount` to the reward pool.
    pub fn fund_rewards(&mut self, amount: Amount) -> Result<(), Error> {
        if amount == 0 {
            return Err(Error::InvalidParameter("amount", "must be non-zero"));
        }
        self.reward_pool = self
            .reward_pool
            .checked_add(amount)
            .ok_or(Error::AmountOverflow(amount, "reward pool"))?;
        Ok(())
    }

    pub fn reward_pool(&self) -> Amount {
        self.reward_pool
    }

    /// Move `amount` from the reward pool to `validator`.
    pub fn distribute_reward(&mut self, validator: Address, amount: Amount) -> Result<(), Error> {
        if amount == 0 {
            return Err(Error::InvalidParameter("amount", "must be non-zero"));
        }
        if !self.ids.contains_key(&validator) {
            return Err(Error::NotValidator(validator));
        }
        if amount > self.reward_pool {
            return Err(Error::NotEnoughBalanceForRewards(amount, self.reward_pool));
        }
        let accrued = self
            .reward(&validator)
            .checked_add(amount)
            .ok_or(Error::AmountOverflow(amount, "rewards"))?;

        self.reward_pool -= amount;
        self.rewards.insert(validator, accrued);
        Ok(())
    }

    /// Rewards accrued by `validator`.
    pub fn reward(&self, validator: &Address) -> Amount {
        self.rewards.get(validator).copied().unwrap_or_default()
    }

    /// Take all rewards accrued by `validator`.
    pub fn claim_rewards(&mut self, validator: &Address) -> Result<Amount, Error> {
        self.rewards
            .remove(validator)
            .ok_or(Error::NoRewardToClaim)
    }
}
