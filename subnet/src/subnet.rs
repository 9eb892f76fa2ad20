use crate::{
    batcher::CrossMessageBatcher,
    checkpoint::{BottomUpCheckpoint, BottomUpMsgBatch, IpcEnvelope, Membership, Namespaced},
    config::{Config, MIN_MAJORITY_PERCENTAGE},
    quorum::{threshold, QuorumCertificate, QuorumInfo, QuorumMap, QuorumTarget},
    staking::{StakingChangeLog, StakingRelease, StakingReleaseQueue},
    types::{
        Address, Amount, ConfigurationNumber, Digest, Error, Height, PermissionMode, QuorumObjKind,
        SubnetId,
    },
    validators::{power_diff, PowerTable, PowerUpdates, Validator, ValidatorInfo, ValidatorSet},
    Authority, Verifier,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// An object awaiting signatures, with the membership allowed to sign it.
#[derive(Clone, Debug)]
struct Pending<T> {
    object: T,
    membership: Membership,
    target: QuorumTarget,
}

/// The state of a single subnet.
///
/// Every method either applies fully or returns an [Error] without modifying
/// any state.
pub struct Subnet<V: Verifier, A: Authority> {
    subnet_id: SubnetId,
    majority_percentage: u8,
    min_validators: u64,
    min_activation_collateral: Amount,
    bottom_up_check_period: Height,

    verifier: V,
    authority: A,

    validators: ValidatorSet,
    changes: StakingChangeLog,
    releases: StakingReleaseQueue,
    batcher: CrossMessageBatcher,

    checkpoint_quorums: QuorumMap,
    batch_quorums: QuorumMap,
    checkpoints: BTreeMap<Height, Pending<BottomUpCheckpoint>>,
    batches: BTreeMap<Height, Pending<BottomUpMsgBatch>>,
    last_checkpoint_height: Height,
    last_checkpoint_configuration: ConfigurationNumber,
}

impl<V: Verifier, A: Authority> Subnet<V, A> {
    /// Create a subnet from `cfg` at height `now`.
    pub fn new(cfg: Config, verifier: V, authority: A, now: Height) -> Result<Self, Error> {
        cfg.validate()?;
        Ok(Self {
            subnet_id: cfg.subnet_id,
            majority_percentage: cfg.majority_percentage,
            min_validators: cfg.min_validators,
            min_activation_collateral: cfg.min_activation_collateral,
            bottom_up_check_period: cfg.bottom_up_check_period,

            verifier,
            authority,

            validators: ValidatorSet::new(
                cfg.permission_mode,
                cfg.active_validators_limit,
                cfg.min_validator_stake,
                cfg.static_allows_leave,
            ),
            changes: StakingChangeLog::new(),
            releases: StakingReleaseQueue::new(cfg.locking_duration),
            batcher: CrossMessageBatcher::new(cfg.batch_period, cfg.max_msgs_per_batch, now),

            checkpoint_quorums: QuorumMap::new(QuorumObjKind::Checkpoint),
            batch_quorums: QuorumMap::new(QuorumObjKind::BottomUpMsgBatch),
            checkpoints: BTreeMap::new(),
            batches: BTreeMap::new(),
            last_checkpoint_height: now,
            last_checkpoint_configuration: 0,
        })
    }

    fn ensure_owner(&self, caller: &Address) -> Result<(), Error> {
        if self.authority.is_owner(caller) {
            Ok(())
        } else {
            Err(Error::NotOwner(*caller))
        }
    }

    /// Apply every change up to `configuration_number` and schedule the
    /// release of withdrawn collateral.
    fn apply_up_to(
        &mut self,
        configuration_number: ConfigurationNumber,
        now: Height,
    ) -> Result<usize, Error> {
        let validators = &mut self.validators;
        let mut released = Vec::new();
        let applied = self.changes.apply_up_to(configuration_number, |request| {
            released.extend(validators.apply(request))
        })?;
        for (validator, amount) in released {
            self.releases.schedule(validator, amount, now)?;
        }
        Ok(applied)
    }

    /// Mark the subnet bootstrapped once enough validators (and collateral)
    /// have been confirmed.
    fn maybe_bootstrap(&mut self) {
        if self.validators.is_bootstrapped() {
            return;
        }
        let enough_validators = self.validators.confirmed_len() as u64 >= self.min_validators;
        let enough_collateral = match self.validators.mode() {
            PermissionMode::Federated => true,
            PermissionMode::Collateral | PermissionMode::Static => {
                self.validators.total_confirmed_collateral() >= self.min_activation_collateral
            }
        };
        if enough_validators && enough_collateral {
            self.validators.bootstrap();
        }
    }

    /// Record a staking request. Before bootstrap the change takes effect immediately.
    fn stage<F>(&mut self, now: Height, request: F) -> Result<ConfigurationNumber, Error>
    where
        F: FnOnce(&mut ValidatorSet, &mut StakingChangeLog) -> Result<ConfigurationNumber, Error>,
    {
        let configuration_number = request(&mut self.validators, &mut self.changes)?;
        if !self.validators.is_bootstrapped() {
            self.apply_up_to(configuration_number, now)?;
            self.maybe_bootstrap();
        }
        Ok(configuration_number)
    }

    /// Become a validator with `amount` of collateral.
    pub fn join(
        &mut self,
        validator: Address,
        metadata: Vec<u8>,
        amount: Amount,
        now: Height,
    ) -> Result<ConfigurationNumber, Error> {
        self.stage(now, |validators, log| {
            validators.join(log, validator, metadata, amount)
        })
    }

    /// Add `amount` to the collateral of `validator`.
    pub fn stake(
        &mut self,
        validator: Address,
        amount: Amount,
        now: Height,
    ) -> Result<ConfigurationNumber, Error> {
        self.stage(now, |validators, log| validators.stake(log, validator, amount))
    }

    /// Withdraw `amount` of the collateral of `validator`.
    pub fn unstake(
        &mut self,
        validator: Address,
        amount: Amount,
        now: Height,
    ) -> Result<ConfigurationNumber, Error> {
        self.stage(now, |validators, log| {
            validators.unstake(log, validator, amount)
        })
    }

    /// Withdraw all collateral of `validator`.
    pub fn leave(&mut self, validator: Address, now: Height) -> Result<ConfigurationNumber, Error> {
        self.stage(now, |validators, log| validators.leave(log, validator))
    }

    /// Assign `power` to `validator` (federated subnets only).
    pub fn set_federated_power(
        &mut self,
        caller: Address,
        validator: Address,
        metadata: Vec<u8>,
        power: Amount,
        now: Height,
    ) -> Result<ConfigurationNumber, Error> {
        self.ensure_owner(&caller)?;
        self.stage(now, |validators, log| {
            validators.set_federated_power(log, validator, metadata, power)
        })
    }

    /// Claim the collateral of `validator` whose locking period has elapsed.
    pub fn claim(&mut self, validator: Address, now: Height) -> Result<Amount, Error> {
        self.releases.claim(&validator, now)
    }

    /// Apply every staking change up to `configuration_number` and return the
    /// resulting changes to the active power table.
    pub fn confirm_changes(
        &mut self,
        caller: Address,
        configuration_number: ConfigurationNumber,
        now: Height,
    ) -> Result<PowerUpdates, Error> {
        self.ensure_owner(&caller)?;
        let before = self.validators.power_table();
        let applied = self.apply_up_to(configuration_number, now)?;
        self.maybe_bootstrap();
        let updates = power_diff(&before, &self.validators.power_table());
        if applied > 0 {
            info!(
                configuration_number,
                applied,
                updates = updates.0.len(),
                "confirmed configuration"
            );
        }
        Ok(updates)
    }

    fn membership(&self) -> Result<Membership, Error> {
        let membership = Membership::from(self.validators.power_table());
        if membership.is_empty() {
            return Err(Error::EmptyMembership);
        }
        Ok(membership)
    }

    fn target(&self, hash: Digest, membership: &Membership) -> QuorumTarget {
        QuorumTarget {
            hash,
            root_hash: membership.digest(),
            threshold: threshold(membership.total_weight(), self.majority_percentage),
        }
    }

    /// Create the checkpoint of `height`, which must be exactly one checkpoint
    /// period after the previous one.
    pub fn create_checkpoint(
        &mut self,
        caller: Address,
        height: Height,
        block_hash: Digest,
    ) -> Result<BottomUpCheckpoint, Error> {
        self.ensure_owner(&caller)?;
        let Some(expected) = self
            .last_checkpoint_height
            .checked_add(self.bottom_up_check_period)
        else {
            return Err(Error::InvalidParameter(
                "bottom_up_check_period",
                "next checkpoint height overflows",
            ));
        };
        if height != expected {
            return Err(Error::InvalidCheckpointHeight {
                expected,
                got: height,
            });
        }
        let membership = self.membership()?;

        let latest = self.changes.next_configuration_number() - 1;
        let next_configuration_number = if latest > self.last_checkpoint_configuration {
            latest
        } else {
            0
        };
        let checkpoint = BottomUpCheckpoint {
            subnet_id: self.subnet_id.clone(),
            block_height: height,
            block_hash,
            next_configuration_number,
            msgs: self.batcher.drain(),
        };
        let target = self.target(checkpoint.digest(), &membership);
        if next_configuration_number != 0 {
            self.last_checkpoint_configuration = next_configuration_number;
        }
        self.last_checkpoint_height = height;
        self.checkpoints.insert(
            height,
            Pending {
                object: checkpoint.clone(),
                membership,
                target,
            },
        );
        info!(
            height,
            hash = %target.hash,
            msgs = checkpoint.msgs.len(),
            next_configuration_number,
            "created checkpoint"
        );
        Ok(checkpoint)
    }

    /// Queue an outgoing message. Returns its nonce.
    pub fn enqueue_envelope(&mut self, envelope: IpcEnvelope) -> Result<u64, Error> {
        envelope.validate(&self.subnet_id)?;
        Ok(self.batcher.enqueue(envelope))
    }

    /// Queue outgoing messages that must be delivered in the same batch.
    /// Returns the first and last nonce assigned.
    pub fn enqueue_atomic(&mut self, envelopes: Vec<IpcEnvelope>) -> Result<(u64, u64), Error> {
        for envelope in &envelopes {
            envelope.validate(&self.subnet_id)?;
        }
        self.batcher.enqueue_atomic(envelopes)
    }

    /// Cut buffered messages into a batch at height `now`.
    pub fn cut_batch(&mut self, caller: Address, now: Height) -> Result<BottomUpMsgBatch, Error> {
        self.ensure_owner(&caller)?;
        if self.batches.contains_key(&now) {
            return Err(Error::DuplicateHeight(QuorumObjKind::BottomUpMsgBatch, now));
        }
        let retention_height = self.batch_quorums.retention_height();
        if now < retention_height {
            return Err(Error::HeightPruned(now, retention_height));
        }
        let membership = self.membership()?;
        let msgs = self.batcher.cut(now)?;
        let batch = BottomUpMsgBatch {
            subnet_id: self.subnet_id.clone(),
            block_height: now,
            msgs,
        };
        let target = self.target(batch.digest(), &membership);
        self.batches.insert(
            now,
            Pending {
                object: batch.clone(),
                membership,
                target,
            },
        );
        info!(height = now, hash = %target.hash, msgs = batch.msgs.len(), "cut batch");
        Ok(batch)
    }

    /// Check `signer` may sign `pending` and that `signature` is valid.
    fn check_signature<T>(
        &self,
        quorums: &QuorumMap,
        pending: Option<&Pending<T>>,
        height: Height,
        signer: &Address,
        signature: &[u8],
    ) -> Result<(QuorumTarget, Amount), Error> {
        let Some(pending) = pending else {
            if height < quorums.retention_height() {
                return Err(Error::HeightPruned(height, quorums.retention_height()));
            }
            return Err(Error::UnknownHeight(quorums.kind(), height));
        };
        let Some(member) = pending.membership.get(signer) else {
            return Err(Error::NotAuthorized(*signer, height));
        };
        if quorums.has_signed(height, signer) {
            return Err(Error::SignatureReplay(*signer, height));
        }
        if !self
            .verifier
            .verify(&member.metadata, pending.target.hash.as_ref(), signature)
        {
            return Err(Error::InvalidSignature(*signer, height));
        }
        Ok((pending.target, member.weight))
    }

    /// Add a signature over the checkpoint at `height`. Returns true if the
    /// checkpoint just reached quorum.
    pub fn add_checkpoint_signature(
        &mut self,
        height: Height,
        signer: Address,
        signature: Vec<u8>,
    ) -> Result<bool, Error> {
        let (target, weight) = self.check_signature(
            &self.checkpoint_quorums,
            self.checkpoints.get(&height),
            height,
            &signer,
            &signature,
        )?;
        self.checkpoint_quorums
            .add_signature(height, &target, signer, signature, weight)
    }

    /// Add a signature over the batch cut at `height`. Returns true if the
    /// batch just reached quorum.
    pub fn add_batch_signature(
        &mut self,
        height: Height,
        signer: Address,
        signature: Vec<u8>,
    ) -> Result<bool, Error> {
        let (target, weight) = self.check_signature(
            &self.batch_quorums,
            self.batches.get(&height),
            height,
            &signer,
            &signature,
        )?;
        self.batch_quorums
            .add_signature(height, &target, signer, signature, weight)
    }

    /// Prune certified checkpoints and batches below `retention_height`.
    /// Returns the number of heights pruned.
    ///
    /// The retention height may not pass the height after the last checkpoint,
    /// so every checkpoint created later can still collect signatures.
    pub fn garbage_collect(
        &mut self,
        caller: Address,
        retention_height: Height,
    ) -> Result<usize, Error> {
        self.ensure_owner(&caller)?;
        let current = self.checkpoint_quorums.retention_height();
        if retention_height < current {
            return Err(Error::InvalidRetentionHeight(retention_height, current));
        }
        if retention_height > self.last_checkpoint_height.saturating_add(1) {
            return Err(Error::RetentionPastCheckpoint(
                retention_height,
                self.last_checkpoint_height,
            ));
        }

        let checkpoint_quorums = &self.checkpoint_quorums;
        self.checkpoints.retain(|height, _| {
            *height >= retention_height || !checkpoint_quorums.is_reached(*height)
        });
        let batch_quorums = &self.batch_quorums;
        self.batches
            .retain(|height, _| *height >= retention_height || !batch_quorums.is_reached(*height));
        let pruned = self.checkpoint_quorums.garbage_collect(retention_height)?
            + self.batch_quorums.garbage_collect(retention_height)?;
        debug!(retention_height, pruned, "garbage collected");
        Ok(pruned)
    }

    /// Change the share of the active weight required for a quorum. Objects
    /// already created keep their threshold.
    pub fn set_majority_percentage(&mut self, caller: Address, percentage: u8) -> Result<(), Error> {
        self.ensure_owner(&caller)?;
        if !(MIN_MAJORITY_PERCENTAGE..=100).contains(&percentage) {
            return Err(Error::InvalidParameter(
                "majority_percentage",
                "must be between 51 and 100",
            ));
        }
        self.majority_percentage = percentage;
        Ok(())
    }

    pub fn set_active_limit(&mut self, caller: Address, limit: u16) -> Result<(), Error> {
        self.ensure_owner(&caller)?;
        if limit == 0 {
            return Err(Error::InvalidParameter(
                "active_validators_limit",
                "must be positive",
            ));
        }
        self.validators.set_active_limit(limit);
        Ok(())
    }

    pub fn set_locking_duration(&mut self, caller: Address, duration: Height) -> Result<(), Error> {
        self.ensure_owner(&caller)?;
        self.releases.set_locking_duration(duration);
        Ok(())
    }

    pub fn set_batch_period(&mut self, caller: Address, period: Height) -> Result<(), Error> {
        self.ensure_owner(&caller)?;
        self.batcher.set_batch_period(period);
        Ok(())
    }

    pub fn set_max_msgs_per_batch(&mut self, caller: Address, max: usize) -> Result<(), Error> {
        self.ensure_owner(&caller)?;
        self.batcher.set_max_msgs_per_batch(max)
    }

    pub fn set_bottom_up_check_period(
        &mut self,
        caller: Address,
        period: Height,
    ) -> Result<(), Error> {
        self.ensure_owner(&caller)?;
        if period == 0 {
            return Err(Error::InvalidParameter(
                "bottom_up_check_period",
                "must be positive",
            ));
        }
        self.bottom_up_check_period = period;
        Ok(())
    }

    pub fn fund_rewards(&mut self, caller: Address, amount: Amount) -> Result<(), Error> {
        self.ensure_owner(&caller)?;
        self.validators.fund_rewards(amount)
    }

    pub fn distribute_reward(
        &mut self,
        caller: Address,
        validator: Address,
        amount: Amount,
    ) -> Result<(), Error> {
        self.ensure_owner(&caller)?;
        self.validators.distribute_reward(validator, amount)
    }

    pub fn claim_rewards(&mut self, validator: Address) -> Result<Amount, Error> {
        self.validators.claim_rewards(&validator)
    }

    pub fn subnet_id(&self) -> &SubnetId {
        &self.subnet_id
    }

    pub fn permission_mode(&self) -> PermissionMode {
        self.validators.mode()
    }

    pub fn majority_percentage(&self) -> u8 {
        self.majority_percentage
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.validators.is_bootstrapped()
    }

    pub fn genesis(&self) -> &PowerTable {
        self.validators.genesis()
    }

    pub fn active_validators(&self) -> Vec<Validator> {
        self.validators.active_validators()
    }

    pub fn waiting_validators(&self) -> Vec<Validator> {
        self.validators.waiting_validators()
    }

    pub fn power_table(&self) -> PowerTable {
        self.validators.power_table()
    }

    /// Confirmed power of `validator`.
    pub fn validator_power(&self, validator: &Address) -> Amount {
        self.validators.power(validator)
    }

    pub fn validator(&self, validator: &Address) -> Option<&ValidatorInfo> {
        self.validators.get(validator)
    }

    pub fn total_confirmed_collateral(&self) -> Amount {
        self.validators.total_confirmed_collateral()
    }

    pub fn reward(&self, validator: &Address) -> Amount {
        self.validators.reward(validator)
    }

    fn quorums(&self, kind: QuorumObjKind) -> &QuorumMap {
        match kind {
            QuorumObjKind::Checkpoint => &self.checkpoint_quorums,
            QuorumObjKind::BottomUpMsgBatch => &self.batch_quorums,
        }
    }

    pub fn is_quorum_reached(&self, kind: QuorumObjKind, height: Height) -> bool {
        self.quorums(kind).is_reached(height)
    }

    pub fn quorum_info(&self, kind: QuorumObjKind, height: Height) -> Option<&QuorumInfo> {
        self.quorums(kind).get(height)
    }

    pub fn certificate(&self, kind: QuorumObjKind, height: Height) -> Option<QuorumCertificate> {
        self.quorums(kind).certificate(height)
    }

    /// Heights with signatures that have not reached quorum yet.
    pub fn incomplete_quorums(&self) -> usize {
        self.checkpoint_quorums.incomplete().count() + self.batch_quorums.incomplete().count()
    }

    pub fn checkpoint(&self, height: Height) -> Option<&BottomUpCheckpoint> {
        self.checkpoints.get(&height).map(|p| &p.object)
    }

    pub fn batch(&self, height: Height) -> Option<&BottomUpMsgBatch> {
        self.batches.get(&height).map(|p| &p.object)
    }

    pub fn last_checkpoint_height(&self) -> Height {
        self.last_checkpoint_height
    }

    /// Collateral of `validator` claimable at `now`.
    pub fn pending_releasable(&self, validator: &Address, now: Height) -> Amount {
        self.releases.releasable(validator, now)
    }

    pub fn pending_releases(&self, validator: &Address) -> Vec<StakingRelease> {
        self.releases.pending(validator).copied().collect()
    }

    /// The highest confirmed configuration number.
    pub fn current_configuration_number(&self) -> ConfigurationNumber {
        self.changes.current_configuration_number()
    }

    /// The next configuration number to be assigned and the lowest one not
    /// yet confirmed.
    pub fn configuration_numbers(&self) -> (ConfigurationNumber, ConfigurationNumber) {
        (
            self.changes.next_configuration_number(),
            self.changes.start_configuration_number(),
        )
    }

    pub fn pending_changes(&self) -> usize {
        self.changes.pending()
    }

    pub fn buffered_envelopes(&self) -> usize {
        self.batcher.buffered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::tests::config,
        mocks::{self, Owner},
        types::IpcAddress,
    };

    const OWNER: Address = Address::new([0xaa; Address::SIZE]);

    fn addr(b: u8) -> Address {
        Address::new([b; Address::SIZE])
    }

    fn key(b: u8) -> Vec<u8> {
        vec![b; 4]
    }

    fn subnet(mode: PermissionMode) -> Subnet<mocks::Verifier, Owner> {
        Subnet::new(config(mode), mocks::Verifier, Owner(OWNER), 0).unwrap()
    }

    /// A subnet bootstrapped with validators 1 and 2 staking 10 each.
    fn bootstrapped() -> Subnet<mocks::Verifier, Owner> {
        let mut subnet = subnet(PermissionMode::Collateral);
        subnet.join(addr(1), key(1), 10, 0).unwrap();
        assert!(!subnet.is_bootstrapped());
        subnet.join(addr(2), key(2), 10, 0).unwrap();
        assert!(subnet.is_bootstrapped());
        subnet
    }

    fn envelope(subnet: &Subnet<mocks::Verifier, Owner>, value: Amount) -> IpcEnvelope {
        let parent = subnet.subnet_id().parent().unwrap();
        IpcEnvelope::transfer(
            IpcAddress::new(subnet.subnet_id().clone(), addr(7)),
            IpcAddress::new(parent, addr(8)),
            value,
        )
    }

    fn hash(b: u8) -> Digest {
        Digest::from([b; 32])
    }

    fn sign(subnet: &Subnet<mocks::Verifier, Owner>, height: Height, b: u8) -> Vec<u8> {
        let hash = subnet.checkpoint(height).unwrap().digest();
        mocks::sign(&key(b), hash.as_ref())
    }

    #[test]
    fn test_invalid_config() {
        let mut cfg = config(PermissionMode::Collateral);
        cfg.max_msgs_per_batch = 0;
        assert!(Subnet::new(cfg, mocks::Verifier, Owner(OWNER), 0).is_err());
    }

    #[test]
    fn test_bootstrap_applies_immediately() {
        let subnet = bootstrapped();
        assert_eq!(subnet.genesis().total_weight(), 20);
        assert_eq!(subnet.active_validators().len(), 2);
        assert_eq!(subnet.current_configuration_number(), 4);
        assert_eq!(subnet.configuration_numbers(), (5, 5));
        assert_eq!(subnet.validator(&addr(1)).unwrap().metadata, key(1));
    }

    #[test]
    fn test_changes_wait_for_confirmation() {
        let mut subnet = bootstrapped();
        assert_eq!(subnet.join(addr(3), key(3), 30, 5), Ok(6));
        assert_eq!(subnet.stake(addr(1), 5, 5), Ok(7));
        assert_eq!(subnet.validator_power(&addr(3)), 0);
        assert_eq!(subnet.pending_changes(), 3);

        assert_eq!(
            subnet.confirm_changes(addr(1), 7, 5),
            Err(Error::NotOwner(addr(1)))
        );
        let updates = subnet.confirm_changes(OWNER, 6, 5).unwrap();
        assert_eq!(updates.0.len(), 1);
        assert_eq!(updates.0[0].address, addr(3));
        assert_eq!(updates.0[0].weight, 30);
        assert_eq!(subnet.validator_power(&addr(1)), 10);

        subnet.confirm_changes(OWNER, 7, 5).unwrap();
        assert_eq!(subnet.validator_power(&addr(1)), 15);

        // Confirming again is a no-op
        assert_eq!(subnet.confirm_changes(OWNER, 7, 6), Ok(PowerUpdates::default()));
        assert_eq!(
            subnet.confirm_changes(OWNER, 5, 6),
            Err(Error::OldConfigurationNumber(5, 8))
        );
        assert_eq!(
            subnet.confirm_changes(OWNER, 8, 6),
            Err(Error::CannotConfirmFutureChanges(8, 8))
        );
    }

    #[test]
    fn test_active_limit_scenario() {
        let mut cfg = config(PermissionMode::Collateral);
        cfg.min_validators = 4;
        let mut subnet = Subnet::new(cfg, mocks::Verifier, Owner(OWNER), 0).unwrap();
        for (i, stake) in [40, 30, 20, 10].into_iter().enumerate() {
            let b = i as u8 + 1;
            subnet.join(addr(b), key(b), stake, 0).unwrap();
        }
        let weights = |validators: Vec<Validator>| -> Vec<Amount> {
            validators.into_iter().map(|v| v.weight).collect()
        };
        assert_eq!(weights(subnet.active_validators()), vec![40, 30, 20]);
        assert_eq!(weights(subnet.waiting_validators()), vec![10]);

        let n = subnet.stake(addr(4), 25, 1).unwrap();
        let updates = subnet.confirm_changes(OWNER, n, 1).unwrap();
        assert_eq!(weights(subnet.active_validators()), vec![40, 35, 30]);
        assert_eq!(weights(subnet.waiting_validators()), vec![20]);
        // Validator 3 dropped out, validator 4 joined the active set
        assert_eq!(
            updates.0.iter().map(|v| (v.address, v.weight)).collect::<Vec<_>>(),
            vec![(addr(3), 0), (addr(4), 35)]
        );

        subnet.set_active_limit(OWNER, 2).unwrap();
        assert_eq!(weights(subnet.active_validators()), vec![40, 35]);
    }

    #[test]
    fn test_unstake_and_claim() {
        let mut subnet = bootstrapped();
        let n = subnet.unstake(addr(1), 4, 10).unwrap();
        assert!(subnet.pending_releases(&addr(1)).is_empty());
        subnet.confirm_changes(OWNER, n, 10).unwrap();
        assert_eq!(subnet.validator_power(&addr(1)), 6);
        assert_eq!(
            subnet.pending_releases(&addr(1)),
            vec![StakingRelease {
                release_at: 110,
                amount: 4
            }]
        );

        assert_eq!(subnet.pending_releasable(&addr(1), 109), 0);
        assert_eq!(subnet.claim(addr(1), 109), Err(Error::NoCollateralToWithdraw));
        assert_eq!(subnet.claim(addr(1), 110), Ok(4));

        let n = subnet.leave(addr(2), 20).unwrap();
        subnet.confirm_changes(OWNER, n, 20).unwrap();
        assert!(subnet.validator(&addr(2)).is_none());
        assert_eq!(subnet.claim(addr(2), 120), Ok(10));
    }

    #[test]
    fn test_checkpoint_quorum() {
        let mut subnet = subnet(PermissionMode::Collateral);
        subnet.join(addr(1), key(1), 30, 0).unwrap();
        subnet.join(addr(2), key(2), 40, 0).unwrap();
        let n = subnet.join(addr(3), key(3), 30, 0).unwrap();
        subnet.confirm_changes(OWNER, n, 0).unwrap();
        assert_eq!(
            subnet.create_checkpoint(OWNER, 5, hash(0)),
            Err(Error::InvalidCheckpointHeight {
                expected: 10,
                got: 5
            })
        );
        let checkpoint = subnet.create_checkpoint(OWNER, 10, hash(0)).unwrap();
        assert_eq!(checkpoint.next_configuration_number, 6);
        assert!(subnet.quorum_info(QuorumObjKind::Checkpoint, 10).is_none());

        let sig = sign(&subnet, 10, 1);
        assert_eq!(subnet.add_checkpoint_signature(10, addr(1), sig.clone()), Ok(false));
        let info = subnet.quorum_info(QuorumObjKind::Checkpoint, 10).unwrap();
        assert_eq!(info.threshold, 67);
        assert_eq!(info.current_weight, 30);
        assert_eq!(
            subnet.add_checkpoint_signature(10, addr(1), sig),
            Err(Error::SignatureReplay(addr(1), 10))
        );
        assert_eq!(
            subnet.add_checkpoint_signature(10, addr(2), vec![0]),
            Err(Error::InvalidSignature(addr(2), 10))
        );
        assert_eq!(
            subnet.add_checkpoint_signature(10, addr(9), vec![0]),
            Err(Error::NotAuthorized(addr(9), 10))
        );
        assert_eq!(
            subnet.add_checkpoint_signature(20, addr(1), vec![0]),
            Err(Error::UnknownHeight(QuorumObjKind::Checkpoint, 20))
        );

        let sig = sign(&subnet, 10, 2);
        assert_eq!(subnet.add_checkpoint_signature(10, addr(2), sig), Ok(true));
        assert!(subnet.is_quorum_reached(QuorumObjKind::Checkpoint, 10));
        assert_eq!(
            subnet.quorum_info(QuorumObjKind::Checkpoint, 10).unwrap().current_weight,
            70
        );
        let certificate = subnet.certificate(QuorumObjKind::Checkpoint, 10).unwrap();
        assert_eq!(certificate.hash, checkpoint.digest());
        assert_eq!(certificate.signatures.len(), 2);
    }

    #[test]
    fn test_membership_is_frozen_at_creation() {
        let mut subnet = bootstrapped();
        subnet.create_checkpoint(OWNER, 10, hash(0)).unwrap();

        // Validator 3 joins after the checkpoint was created
        let n = subnet.join(addr(3), key(3), 50, 11).unwrap();
        subnet.confirm_changes(OWNER, n, 11).unwrap();
        let sig = sign(&subnet, 10, 3);
        assert_eq!(
            subnet.add_checkpoint_signature(10, addr(3), sig),
            Err(Error::NotAuthorized(addr(3), 10))
        );

        // The next checkpoint signs off on the join
        let checkpoint = subnet.create_checkpoint(OWNER, 20, hash(0)).unwrap();
        assert_eq!(checkpoint.next_configuration_number, n);
        assert!(subnet.checkpoint(20).is_some());
    }

    #[test]
    fn test_checkpoint_carries_configuration_number() {
        let mut subnet = bootstrapped();
        let checkpoint = subnet.create_checkpoint(OWNER, 10, hash(0)).unwrap();
        assert_eq!(checkpoint.next_configuration_number, 4);

        let n = subnet.stake(addr(1), 1, 12).unwrap();
        let checkpoint = subnet.create_checkpoint(OWNER, 20, hash(0)).unwrap();
        assert_eq!(checkpoint.next_configuration_number, n);
        let checkpoint = subnet.create_checkpoint(OWNER, 30, hash(0)).unwrap();
        assert_eq!(checkpoint.next_configuration_number, 0);
    }

    #[test]
    fn test_checkpoint_requires_membership() {
        let mut subnet = subnet(PermissionMode::Collateral);
        assert_eq!(
            subnet.create_checkpoint(OWNER, 10, hash(0)),
            Err(Error::EmptyMembership)
        );
        assert_eq!(subnet.last_checkpoint_height(), 0);
    }

    #[test]
    fn test_messages() {
        let mut subnet = bootstrapped();
        for i in 0..12 {
            let envelope = envelope(&subnet, i + 1);
            assert_eq!(subnet.enqueue_envelope(envelope), Ok(i as u64 + 1));
        }
        let mut down = envelope(&subnet, 1);
        std::mem::swap(&mut down.from, &mut down.to);
        assert!(subnet.enqueue_envelope(down).is_err());
        assert_eq!(subnet.buffered_envelopes(), 12);

        assert_eq!(subnet.cut_batch(addr(1), 1), Err(Error::NotOwner(addr(1))));
        let batch = subnet.cut_batch(OWNER, 1).unwrap();
        assert_eq!(
            batch.msgs.iter().map(|m| m.nonce).collect::<Vec<_>>(),
            (1..=10).collect::<Vec<_>>()
        );
        assert_eq!(
            subnet.cut_batch(OWNER, 1),
            Err(Error::DuplicateHeight(QuorumObjKind::BottomUpMsgBatch, 1))
        );
        assert_eq!(subnet.cut_batch(OWNER, 2), Err(Error::BatchNotReady(1, 5)));

        // Batches are signed on their own
        let sig = mocks::sign(&key(1), batch.digest().as_ref());
        assert_eq!(subnet.add_batch_signature(1, addr(1), sig), Ok(false));
        let sig = mocks::sign(&key(2), batch.digest().as_ref());
        assert_eq!(subnet.add_batch_signature(1, addr(2), sig), Ok(true));
        assert!(subnet.is_quorum_reached(QuorumObjKind::BottomUpMsgBatch, 1));
        assert!(!subnet.is_quorum_reached(QuorumObjKind::Checkpoint, 1));

        // The remainder leaves with the checkpoint
        let checkpoint = subnet.create_checkpoint(OWNER, 10, hash(0)).unwrap();
        assert_eq!(checkpoint.msgs.len(), 2);
        assert_eq!(subnet.buffered_envelopes(), 0);
    }

    #[test]
    fn test_atomic_envelopes() {
        let mut subnet = bootstrapped();
        let group = (0..3).map(|i| envelope(&subnet, i + 1)).collect();
        assert_eq!(subnet.enqueue_atomic(group), Ok((1, 3)));

        let mut group: Vec<_> = (0..3).map(|i| envelope(&subnet, i + 1)).collect();
        group[1].from.subnet = SubnetId::new_root(1);
        assert!(subnet.enqueue_atomic(group).is_err());
        assert_eq!(subnet.buffered_envelopes(), 3);
    }

    #[test]
    fn test_garbage_collect() {
        let mut subnet = bootstrapped();
        subnet.create_checkpoint(OWNER, 10, hash(0)).unwrap();
        subnet.create_checkpoint(OWNER, 20, hash(0)).unwrap();
        for b in [1, 2] {
            let sig = sign(&subnet, 10, b);
            subnet.add_checkpoint_signature(10, addr(b), sig).unwrap();
        }
        let sig = sign(&subnet, 20, 1);
        subnet.add_checkpoint_signature(20, addr(1), sig).unwrap();
        assert_eq!(subnet.incomplete_quorums(), 1);

        assert_eq!(
            subnet.garbage_collect(OWNER, 22),
            Err(Error::RetentionPastCheckpoint(22, 20))
        );
        assert_eq!(subnet.garbage_collect(OWNER, 21), Ok(1));
        assert!(subnet.checkpoint(10).is_none());
        assert!(subnet.checkpoint(20).is_some());
        assert_eq!(
            subnet.add_checkpoint_signature(10, addr(1), vec![]),
            Err(Error::HeightPruned(10, 21))
        );

        // The unreached checkpoint can still be certified
        let sig = sign(&subnet, 20, 2);
        assert_eq!(subnet.add_checkpoint_signature(20, addr(2), sig), Ok(true));
        assert_eq!(
            subnet.garbage_collect(OWNER, 20),
            Err(Error::InvalidRetentionHeight(20, 21))
        );
        assert_eq!(subnet.garbage_collect(OWNER, 21), Ok(1));
        assert!(subnet.checkpoint(20).is_none());

        // Batches below the retention height cannot be cut
        subnet.enqueue_envelope(envelope(&subnet, 1)).unwrap();
        assert_eq!(subnet.cut_batch(OWNER, 15), Err(Error::HeightPruned(15, 21)));
        assert_eq!(subnet.buffered_envelopes(), 1);
    }

    #[test]
    fn test_retention_never_passes_next_checkpoint() {
        let mut subnet = bootstrapped();
        assert_eq!(
            subnet.garbage_collect(OWNER, 1000),
            Err(Error::RetentionPastCheckpoint(1000, 0))
        );
        assert_eq!(subnet.garbage_collect(OWNER, 1), Ok(0));

        // The next checkpoint is still certifiable
        subnet.create_checkpoint(OWNER, 10, hash(0)).unwrap();
        let sig = sign(&subnet, 10, 1);
        assert_eq!(subnet.add_checkpoint_signature(10, addr(1), sig), Ok(false));
        let sig = sign(&subnet, 10, 2);
        assert_eq!(subnet.add_checkpoint_signature(10, addr(2), sig), Ok(true));

        // A shorter period cannot place a checkpoint below the retention height
        assert_eq!(subnet.garbage_collect(OWNER, 11), Ok(1));
        subnet.set_bottom_up_check_period(OWNER, 1).unwrap();
        subnet.create_checkpoint(OWNER, 11, hash(0)).unwrap();
        let sig = sign(&subnet, 11, 1);
        assert_eq!(subnet.add_checkpoint_signature(11, addr(1), sig), Ok(false));
    }

    #[test]
    fn test_threshold_rounds_up() {
        let mut cfg = config(PermissionMode::Collateral);
        cfg.min_activation_collateral = 2;
        let mut subnet = Subnet::new(cfg, mocks::Verifier, Owner(OWNER), 0).unwrap();
        subnet.join(addr(1), key(1), 1, 0).unwrap();
        subnet.join(addr(2), key(2), 1, 0).unwrap();
        assert!(subnet.is_bootstrapped());

        // Half of the weight is not a 67% majority
        subnet.create_checkpoint(OWNER, 10, hash(0)).unwrap();
        let sig = sign(&subnet, 10, 1);
        assert_eq!(subnet.add_checkpoint_signature(10, addr(1), sig), Ok(false));
        let info = subnet.quorum_info(QuorumObjKind::Checkpoint, 10).unwrap();
        assert_eq!(info.threshold, 2);
        assert_eq!(info.current_weight, 1);
        let sig = sign(&subnet, 10, 2);
        assert_eq!(subnet.add_checkpoint_signature(10, addr(2), sig), Ok(true));
    }

    #[test]
    fn test_amounts_near_limit() {
        let mut subnet = subnet(PermissionMode::Collateral);
        let half = Amount::MAX / 2;
        subnet.join(addr(1), key(1), half, 0).unwrap();
        subnet.join(addr(2), key(2), half, 0).unwrap();
        assert!(subnet.is_bootstrapped());
        assert_eq!(
            subnet.join(addr(3), key(3), 2, 0),
            Err(Error::AmountOverflow(2, "collateral"))
        );
        assert_eq!(
            subnet.stake(addr(1), 2, 0),
            Err(Error::AmountOverflow(2, "collateral"))
        );

        subnet.create_checkpoint(OWNER, 10, hash(0)).unwrap();
        let sig = sign(&subnet, 10, 1);
        assert_eq!(subnet.add_checkpoint_signature(10, addr(1), sig), Ok(false));
        let info = subnet.quorum_info(QuorumObjKind::Checkpoint, 10).unwrap();
        assert_eq!(info.threshold, threshold(Amount::MAX - 1, 67));
        let sig = sign(&subnet, 10, 2);
        assert_eq!(subnet.add_checkpoint_signature(10, addr(2), sig), Ok(true));
        let info = subnet.quorum_info(QuorumObjKind::Checkpoint, 10).unwrap();
        assert_eq!(info.current_weight, Amount::MAX - 1);
    }

    #[test]
    fn test_checkpoint_period_overflow() {
        let mut subnet = bootstrapped();
        subnet.set_bottom_up_check_period(OWNER, Height::MAX).unwrap();
        subnet.create_checkpoint(OWNER, Height::MAX, hash(0)).unwrap();
        assert_eq!(
            subnet.create_checkpoint(OWNER, Height::MAX, hash(0)),
            Err(Error::InvalidParameter(
                "bottom_up_check_period",
                "next checkpoint height overflows"
            ))
        );
    }

    #[test]
    fn test_federated_subnet() {
        let mut subnet = subnet(PermissionMode::Federated);
        assert_eq!(
            subnet.join(addr(1), key(1), 10, 0),
            Err(Error::MethodNotAllowed("join", PermissionMode::Federated))
        );
        assert_eq!(
            subnet.set_federated_power(addr(1), addr(1), key(1), 10, 0),
            Err(Error::NotOwner(addr(1)))
        );
        subnet
            .set_federated_power(OWNER, addr(1), key(1), 10, 0)
            .unwrap();
        subnet
            .set_federated_power(OWNER, addr(2), key(2), 20, 0)
            .unwrap();
        assert!(subnet.is_bootstrapped());
        assert_eq!(subnet.total_confirmed_collateral(), 0);

        let n = subnet
            .set_federated_power(OWNER, addr(1), key(1), 0, 1)
            .unwrap();
        assert_eq!(subnet.validator_power(&addr(1)), 10);
        subnet.confirm_changes(OWNER, n, 1).unwrap();
        assert_eq!(subnet.validator_power(&addr(1)), 0);
        assert_eq!(subnet.power_table().total_weight(), 20);
    }

    #[test]
    fn test_static_subnet() {
        let mut cfg = config(PermissionMode::Static);
        cfg.active_validators_limit = 2;
        let mut subnet = Subnet::new(cfg, mocks::Verifier, Owner(OWNER), 0).unwrap();
        subnet.join(addr(1), key(1), 10, 0).unwrap();
        subnet.join(addr(2), key(2), 10, 0).unwrap();
        assert!(subnet.is_bootstrapped());
        assert_eq!(
            subnet.join(addr(3), key(3), 10, 0),
            Err(Error::MethodNotAllowed("join", PermissionMode::Static))
        );
        assert_eq!(
            subnet.stake(addr(1), 10, 0),
            Err(Error::MethodNotAllowed("stake", PermissionMode::Static))
        );
        assert_eq!(
            subnet.leave(addr(1), 0),
            Err(Error::MethodNotAllowed("leave", PermissionMode::Static))
        );
    }

    #[test]
    fn test_parameters() {
        let mut subnet = bootstrapped();
        assert_eq!(
            subnet.set_majority_percentage(addr(1), 80),
            Err(Error::NotOwner(addr(1)))
        );
        assert!(subnet.set_majority_percentage(OWNER, 50).is_err());
        subnet.set_majority_percentage(OWNER, 100).unwrap();
        assert_eq!(subnet.majority_percentage(), 100);
        assert!(subnet.set_active_limit(OWNER, 0).is_err());
        assert!(subnet.set_bottom_up_check_period(OWNER, 0).is_err());
        subnet.set_bottom_up_check_period(OWNER, 3).unwrap();
        subnet.create_checkpoint(OWNER, 3, hash(0)).unwrap();

        // A unanimous checkpoint needs every validator
        let sig = sign(&subnet, 3, 1);
        assert_eq!(subnet.add_checkpoint_signature(3, addr(1), sig), Ok(false));
        let sig = sign(&subnet, 3, 2);
        assert_eq!(subnet.add_checkpoint_signature(3, addr(2), sig), Ok(true));

        subnet.set_locking_duration(OWNER, 5).unwrap();
        let n = subnet.unstake(addr(1), 1, 10).unwrap();
        subnet.confirm_changes(OWNER, n, 10).unwrap();
        assert_eq!(subnet.claim(addr(1), 15), Ok(1));
    }

    #[test]
    fn test_rewards() {
        let mut subnet = bootstrapped();
        assert_eq!(subnet.fund_rewards(addr(1), 10), Err(Error::NotOwner(addr(1))));
        subnet.fund_rewards(OWNER, 10).unwrap();
        assert_eq!(
            subnet.distribute_reward(OWNER, addr(1), 11),
            Err(Error::NotEnoughBalanceForRewards(11, 10))
        );
        subnet.distribute_reward(OWNER, addr(1), 4).unwrap();
        assert_eq!(subnet.reward(&addr(1)), 4);
        assert_eq!(subnet.claim_rewards(addr(1)), Ok(4));
        assert_eq!(subnet.claim_rewards(addr(1)), Err(Error::NoRewardToClaim));
    }
}
