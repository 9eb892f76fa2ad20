//! Aggregate weighted signatures over checkpoints and message batches.
//!
//! A [QuorumMap] tracks one kind of object ([QuorumObjKind]) keyed by height.
//! Each height moves monotonically through `Collecting` (first signature),
//! `Reached` (threshold crossed) and, once below the retention height,
//! `Pruned`. Unreached heights are never pruned.

use crate::types::{Address, Amount, Digest, Error, Height, QuorumObjKind};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Weight required for a quorum given the total weight of the signers and a
/// majority percentage (at most 100).
///
/// Rounds up, so a quorum always holds at least `majority_percentage` of the
/// weight.
pub fn threshold(total_weight: Amount, majority_percentage: u8) -> Amount {
    let percentage = majority_percentage.min(100) as Amount;
    total_weight / 100 * percentage + (total_weight % 100 * percentage).div_ceil(100)
}

/// The object a height is certifying and the weight required to certify it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuorumTarget {
    /// Hash of the object being signed.
    pub hash: Digest,
    /// Digest of the membership allowed to sign.
    pub root_hash: Digest,
    pub threshold: Amount,
}

/// Aggregation state of a height.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuorumInfo {
    pub hash: Digest,
    pub root_hash: Digest,
    pub threshold: Amount,
    pub current_weight: Amount,
    pub reached: bool,
}

/// An object hash together with enough signatures to certify it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumCertificate {
    pub kind: QuorumObjKind,
    pub height: Height,
    pub hash: Digest,
    pub weight: Amount,
    pub signatures: Vec<(Address, Vec<u8>)>,
}

/// Signatures collected per height for one kind of object.
#[derive(Clone, Debug)]
pub struct QuorumMap {
    kind: QuorumObjKind,
    retention_height: Height,
    info: BTreeMap<Height, QuorumInfo>,
    incomplete: BTreeSet<Height>,
    signatures: BTreeMap<Height, BTreeMap<Address, Vec<u8>>>,
}

impl QuorumMap {
    pub fn new(kind: QuorumObjKind) -> Self {
        Self {
            kind,
            retention_height: 0,
            info: BTreeMap::new(),
            incomplete: BTreeSet::new(),
            signatures: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> QuorumObjKind {
        self.kind
    }

    pub fn retention_height(&self) -> Height {
        self.retention_height
    }

    pub fn get(&self, height: Height) -> Option<&QuorumInfo> {
        self.info.get(&height)
    }

    pub fn is_reached(&self, height: Height) -> bool {
        self.info.get(&height).is_some_and(|info| info.reached)
    }

    /// Heights that have signatures but no quorum yet, lowest first.
    pub fn incomplete(&self) -> impl Iterator<Item = Height> + '_ {
        self.incomplete.iter().copied()
    }

    pub fn has_signed(&self, height: Height, signer: &Address) -> bool {
        self.signatures
            .get(&height)
            .is_some_and(|sigs| sigs.contains_key(signer))
    }

    /// Record `signature` from `signer` for `height`, adding `weight` to the
    /// height's total. Returns true if this signature made the quorum.
    ///
    /// The first signature for a height fixes its [QuorumTarget]; later
    /// signatures must target the same hash.
    pub fn add_signature(
        &mut self,
        height: Height,
        target: &QuorumTarget,
        signer: Address,
        signature: Vec<u8>,
        weight: Amount,
    ) -> Result<bool, Error> {
        let info = match self.info.get(&height) {
            Some(info) => {
                if info.hash != target.hash || info.root_hash != target.root_hash {
                    return Err(Error::QuorumHashMismatch(height));
                }
                *info
            }
            None => {
                if height < self.retention_height {
                    return Err(Error::HeightPruned(height, self.retention_height));
                }
                QuorumInfo {
                    hash: target.hash,
                    root_hash: target.root_hash,
                    threshold: target.threshold,
                    current_weight: 0,
                    reached: false,
                }
            }
        };
        if self.has_signed(height, &signer) {
            return Err(Error::SignatureReplay(signer, height));
        }
        let Some(current_weight) = info.current_weight.checked_add(weight) else {
            return Err(Error::AmountOverflow(weight, "quorum weight"));
        };

        // Validated, now mutate
        let mut info = info;
        info.current_weight = current_weight;
        let newly_reached = !info.reached && info.current_weight >= info.threshold;
        info.reached |= newly_reached;
        self.info.insert(height, info);
        self.signatures
            .entry(height)
            .or_default()
            .insert(signer, signature);
        if info.reached {
            self.incomplete.remove(&height);
        } else {
            self.incomplete.insert(height);
        }

        debug!(
            kind = %self.kind,
            height,
            %signer,
            weight,
            current = info.current_weight,
            threshold = info.threshold,
            "signature accepted"
        );
        if newly_reached {
            info!(kind = %self.kind, height, hash = %info.hash, "quorum reached");
        }
        Ok(newly_reached)
    }

    /// The certificate of `height`, if its quorum has been reached.
    pub fn certificate(&self, height: Height) -> Option<QuorumCertificate> {
        let info = self.info.get(&height).filter(|info| info.reached)?;
        let signatures = self
            .signatures
            .get(&height)
            .map(|sigs| sigs.iter().map(|(a, s)| (*a, s.clone())).collect())
            .unwrap_or_default();
        Some(QuorumCertificate {
            kind: self.kind,
            height,
            hash: info.hash,
            weight: info.current_weight,
            signatures,
        })
    }

    /// Advance the retention height and prune every reached height below it.
    /// Returns the number of heights pruned.
    pub fn garbage_collect(&mut self, retention_height: Height) -> Result<usize, Error> {
        if retention_height < self.retention_height {
            return Err(Error::InvalidRetentionHeight(
                retention_height,
                self.retention_height,
            ));
        }
        self.retention_height = retention_height;

        let pruned: Vec<Height> = self
            .info
            .range(..retention_height)
            .filter(|(_, info)| info.reached)
            .map(|(height, _)| *height)
            .collect();
        for height in &pruned {
            self.info.remove(height);
            self.signatures.remove(height);
        }
        if !pruned.is_empty() {
            debug!(kind = %self.kind, retention_height, pruned = pruned.len(), "pruned quorums");
        }
        Ok(pruned.len())
    }
}
