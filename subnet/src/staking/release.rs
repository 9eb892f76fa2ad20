use crate::types::{Address, Amount, Error, Height};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// Collateral that becomes claimable at `release_at`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StakingRelease {
    pub release_at: Height,
    pub amount: Amount,
}

/// Per-validator FIFO of time-locked withdrawals.
///
/// Releases are always scheduled at `now + locking_duration` and `now` never
/// decreases, so every FIFO is sorted by `release_at` and claiming only ever
/// drains a prefix.
#[derive(Clone, Debug)]
pub struct StakingReleaseQueue {
    locking_duration: Height,
    releases: BTreeMap<Address, VecDeque<StakingRelease>>,
}

impl StakingReleaseQueue {
    pub fn new(locking_duration: Height) -> Self {
        Self {
            locking_duration,
            releases: BTreeMap::new(),
        }
    }

    pub fn locking_duration(&self) -> Height {
        self.locking_duration
    }

    /// Change the locking duration of future releases.
    ///
    /// Releases already scheduled keep their `release_at`. A shorter duration
    /// could schedule a release before an existing one, so releases are
    /// inserted in order rather than appended.
    pub fn set_locking_duration(&mut self, locking_duration: Height) {
        self.locking_duration = locking_duration;
    }

    /// Schedule `amount` to be released to `validator` after the locking period.
    pub fn schedule(
        &mut self,
        validator: Address,
        amount: Amount,
        now: Height,
    ) -> Result<Height, Error> {
        if amount == 0 {
            return Err(Error::CannotReleaseZero);
        }
        let release_at = now.saturating_add(self.locking_duration);
        let queue = self.releases.entry(validator).or_default();
        let release = StakingRelease { release_at, amount };
        match queue.back() {
            Some(last) if last.release_at > release_at => {
                let pos = queue.partition_point(|r| r.release_at <= release_at);
                queue.insert(pos, release);
            }
            _ => queue.push_back(release),
        }
        debug!(%validator, amount, release_at, "scheduled release");
        Ok(release_at)
    }

    /// Remove and sum every release of `validator` due at `now`.
    ///
    /// Releases that would overflow the sum stay queued for the next claim.
    pub fn claim(&mut self, validator: &Address, now: Height) -> Result<Amount, Error> {
        let Some(queue) = self.releases.get_mut(validator) else {
            return Err(Error::NoCollateralToWithdraw);
        };
        let mut amount: Amount = 0;
        while let Some(release) = queue.front() {
            if release.release_at > now {
                break;
            }
            let Some(sum) = amount.checked_add(release.amount) else {
                break;
            };
            amount = sum;
            queue.pop_front();
        }
        if queue.is_empty() {
            self.releases.remove(validator);
        }
        if amount == 0 {
            return Err(Error::NoCollateralToWithdraw);
        }
        debug!(%validator, amount, now, "claimed releases");
        Ok(amount)
    }

    /// Sum of the releases of `validator` due at `now`, without claiming them.
    /// Saturates at [Amount::MAX].
    pub fn releasable(&self, validator: &Address, now: Height) -> Amount {
        self.releases
            .get(validator)
            .map(|queue| {
                queue
                    .iter()
                    .take_while(|r| r.release_at <= now)
                    .fold(0, |sum: Amount, r| sum.saturating_add(r.amount))
            })
            .unwrap_or_default()
    }

    /// All releases of `validator`, due or not.
    pub fn pending(&self, validator: &Address) -> impl Iterator<Item = &StakingRelease> {
        self.releases.get(validator).into_iter().flatten()
    }

    /// Returns true if `validator` has any release outstanding.
    pub fn has_pending(&self, validator: &Address) -> bool {
        self.releases.contains_key(validator)
    }
}
