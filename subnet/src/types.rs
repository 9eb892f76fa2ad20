//! Types used in [commonware_subnet](crate).

use bytes::{Buf, BufMut};
use commonware_codec::{
    varint::UInt, EncodeSize, Error as CodecError, Read, ReadExt, Write,
};
use commonware_utils::{from_hex_formatted, hex};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};
use thiserror::Error as ThisError;

/// Token amounts (collateral, power, weight, value).
pub type Amount = u128;

/// Block height (or timestamp) supplied by the host chain.
pub type Height = u64;

/// A SHA-256 digest.
pub use commonware_cryptography::sha256::Digest;

/// Monotonic counter identifying a validator set version.
///
/// `0` is reserved to signal "no change".
pub type ConfigurationNumber = u64;

/// Error that may be encountered when interacting with a subnet.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    // Validation Errors
    /// The zero address cannot own collateral or sign.
    #[error("zero address")]
    ZeroAddress,
    /// Deposits must carry a non-zero amount.
    #[error("collateral is zero")]
    CollateralIsZero,
    /// Releases must carry a non-zero amount.
    #[error("cannot release zero")]
    CannotReleaseZero,
    /// The configuration number has not been assigned yet.
    #[error("cannot confirm future change {0} (next is {1})")]
    CannotConfirmFutureChanges(ConfigurationNumber, ConfigurationNumber),
    /// A parameter is outside of its accepted range.
    #[error("invalid parameter {0}: {1}")]
    InvalidParameter(&'static str, &'static str),
    /// Checkpoints must follow each other by exactly one period.
    #[error("invalid checkpoint height {got} (expected {expected})")]
    InvalidCheckpointHeight { expected: Height, got: Height },
    /// The envelope cannot be propagated by this subnet.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(&'static str),
    /// An atomic group can never fit into a single batch.
    #[error("atomic group of {0} messages exceeds batch limit {1}")]
    AtomicGroupTooLarge(usize, usize),
    /// The signature does not verify against the signer's public key.
    #[error("invalid signature from {0} at height {1}")]
    InvalidSignature(Address, Height),
    /// Accepting the amount would overflow a tracked total.
    #[error("amount {0} overflows {1}")]
    AmountOverflow(Amount, &'static str),

    // State Conflict Errors
    /// The configuration number was confirmed long ago.
    #[error("old configuration number {0} (start is {1})")]
    OldConfigurationNumber(ConfigurationNumber, ConfigurationNumber),
    /// The signer already signed at this height.
    #[error("signature replay from {0} at height {1}")]
    SignatureReplay(Address, Height),
    /// The signature targets a different object than the one tracked.
    #[error("quorum hash mismatch at height {0}")]
    QuorumHashMismatch(Height),
    /// Nothing of the given kind awaits signatures at this height.
    #[error("no {0} to sign at height {1}")]
    UnknownHeight(QuorumObjKind, Height),
    /// The height has been garbage collected.
    #[error("height {0} below retention height {1}")]
    HeightPruned(Height, Height),
    /// The retention height can only move forward.
    #[error("invalid retention height {0} (current is {1})")]
    InvalidRetentionHeight(Height, Height),
    /// The retention height cannot pass the last checkpoint created.
    #[error("retention height {0} past last checkpoint {1}")]
    RetentionPastCheckpoint(Height, Height),
    /// The signer is not part of the membership expected to sign.
    #[error("signer {0} not authorized at height {1}")]
    NotAuthorized(Address, Height),
    /// There is no active validator to sign.
    #[error("empty membership")]
    EmptyMembership,
    /// Collateral is insufficient for the requested operation.
    #[error("not enough collateral")]
    NotEnoughCollateral,
    /// The reward pool cannot cover the distribution.
    #[error("not enough balance for rewards: requested {0}, available {1}")]
    NotEnoughBalanceForRewards(Amount, Amount),
    /// The address has no collateral in the subnet.
    #[error("not a validator: {0}")]
    NotValidator(Address),
    /// The address already has collateral in the subnet.
    #[error("already a validator: {0}")]
    AlreadyValidator(Address),
    /// No release is due.
    #[error("no collateral to withdraw")]
    NoCollateralToWithdraw,
    /// No reward has accrued.
    #[error("no reward to claim")]
    NoRewardToClaim,
    /// The batch period has not elapsed and the buffer is not full.
    #[error("batch not ready: {0} of {1} elapsed")]
    BatchNotReady(Height, Height),
    /// There are no buffered envelopes.
    #[error("nothing to cut")]
    NothingToCut,
    /// An object of the same kind already exists at the height.
    #[error("{0} already exists at height {1}")]
    DuplicateHeight(QuorumObjKind, Height),

    // Policy Errors
    /// The caller is not the subnet owner.
    #[error("not owner: {0}")]
    NotOwner(Address),
    /// The operation is disallowed under the permission mode.
    #[error("{0} not allowed in {1} mode")]
    MethodNotAllowed(&'static str, PermissionMode),
    /// The static validator set is full.
    #[error("active validator limit {0} exceeded")]
    ActiveLimitExceeded(u16),

    // Unavailable Errors
    /// The writer is no longer running.
    #[error("mailbox closed")]
    MailboxClosed,
}

/// Classification of [Error]s by how a caller should react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; retry with corrected input.
    Validation,
    /// Caller is out of sync; re-read state before retrying.
    Conflict,
    /// Permanently disallowed; choose a different action.
    Policy,
    /// The engine is not running.
    Unavailable,
}

impl Error {
    /// Returns the [ErrorKind] of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ZeroAddress
            | Error::CollateralIsZero
            | Error::CannotReleaseZero
            | Error::CannotConfirmFutureChanges(..)
            | Error::InvalidParameter(..)
            | Error::InvalidCheckpointHeight { .. }
            | Error::InvalidEnvelope(_)
            | Error::AtomicGroupTooLarge(..)
            | Error::InvalidSignature(..)
            | Error::AmountOverflow(..) => ErrorKind::Validation,
            Error::NotOwner(_) | Error::MethodNotAllowed(..) | Error::ActiveLimitExceeded(_) => {
                ErrorKind::Policy
            }
            Error::MailboxClosed => ErrorKind::Unavailable,
            _ => ErrorKind::Conflict,
        }
    }
}

/// Determines how validator power is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Power is the confirmed collateral.
    Collateral,
    /// Power is assigned by the subnet owner.
    Federated,
    /// Power is the collateral at genesis and does not change afterwards.
    Static,
}

impl Display for PermissionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PermissionMode::Collateral => write!(f, "collateral"),
            PermissionMode::Federated => write!(f, "federated"),
            PermissionMode::Static => write!(f, "static"),
        }
    }
}

/// The kind of object a quorum is collected for.
///
/// Each kind is tracked by its own [crate::quorum::QuorumMap].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuorumObjKind {
    Checkpoint,
    BottomUpMsgBatch,
}

impl Display for QuorumObjKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            QuorumObjKind::Checkpoint => write!(f, "checkpoint"),
            QuorumObjKind::BottomUpMsgBatch => write!(f, "message batch"),
        }
    }
}

/// Maximum number of hops in a decoded [SubnetId] route.
pub const MAX_ROUTE_DEPTH: usize = 64;

/// A 20-byte account identity.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; Address::SIZE]);

impl Address {
    pub const SIZE: usize = 20;

    /// The zero address.
    pub const ZERO: Address = Address([0; Address::SIZE]);

    pub const fn new(bytes: [u8; Address::SIZE]) -> Self {
        Self(bytes)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl From<[u8; Address::SIZE]> for Address {
    fn from(value: [u8; Address::SIZE]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex(&self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Some(s)
            .filter(|s| s.is_ascii())
            .and_then(from_hex_formatted)
            .and_then(|bytes| <[u8; Address::SIZE]>::try_from(bytes).ok())
            .map(Self)
            .ok_or(Error::InvalidParameter("address", "expected 20 hex bytes"))
    }
}

impl Write for Address {
    fn write(&self, writer: &mut impl BufMut) {
        self.0.write(writer);
    }
}

impl Read for Address {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self(<[u8; Address::SIZE]>::read(reader)?))
    }
}

impl EncodeSize for Address {
    fn encode_size(&self) -> usize {
        Self::SIZE
    }
}

/// Identifier of a subnet in the hierarchy: a root chain id and the route of
/// subnet actor addresses leading to it.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubnetId {
    root: u64,
    route: Vec<Address>,
}

impl SubnetId {
    /// Creates the root subnet.
    pub fn new_root(root: u64) -> Self {
        Self {
            root,
            route: Vec::new(),
        }
    }

    /// Creates the child of `parent` governed by `actor`.
    pub fn new_from_parent(parent: &SubnetId, actor: Address) -> Self {
        let mut route = parent.route.clone();
        route.push(actor);
        Self {
            root: parent.root,
            route,
        }
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    pub fn route(&self) -> &[Address] {
        &self.route
    }

    pub fn is_root(&self) -> bool {
        self.route.is_empty()
    }

    /// Returns the parent subnet, if any.
    pub fn parent(&self) -> Option<SubnetId> {
        let (_, route) = self.route.split_last()?;
        Some(Self {
            root: self.root,
            route: route.to_vec(),
        })
    }

    /// Returns the length of the shared route prefix and the common ancestor
    /// of both subnets, if they share a root.
    pub fn common_parent(&self, other: &SubnetId) -> Option<(usize, SubnetId)> {
        if self.root != other.root {
            return None;
        }
        let shared = self
            .route
            .iter()
            .zip(other.route.iter())
            .take_while(|(a, b)| a == b)
            .count();
        Some((
            shared,
            Self {
                root: self.root,
                route: self.route[..shared].to_vec(),
            },
        ))
    }

    /// Returns true if a message from `self` to `to` travels up the hierarchy.
    pub fn is_bottom_up(&self, to: &SubnetId) -> bool {
        match self.common_parent(to) {
            Some((shared, _)) => self.route.len() > shared,
            None => false,
        }
    }
}

impl Display for SubnetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "/r{}", self.root)?;
        for actor in &self.route {
            write!(f, "/{actor}")?;
        }
        Ok(())
    }
}

impl FromStr for SubnetId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = Error::InvalidParameter("subnet id", "expected /r<root>/<address>...");
        let mut parts = s.split('/');
        if parts.next() != Some("") {
            return Err(invalid);
        }
        let root = parts
            .next()
            .and_then(|r| r.strip_prefix('r'))
            .and_then(|r| r.parse::<u64>().ok())
            .ok_or(invalid.clone())?;
        let route = parts
            .map(Address::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid)?;
        Ok(Self { root, route })
    }
}

impl Write for SubnetId {
    fn write(&self, writer: &mut impl BufMut) {
        UInt(self.root).write(writer);
        self.route.write(writer);
    }
}

impl Read for SubnetId {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let root = UInt::read(reader)?.into();
        let route = Vec::<Address>::read_cfg(reader, &((..=MAX_ROUTE_DEPTH).into(), ()))?;
        Ok(Self { root, route })
    }
}

impl EncodeSize for SubnetId {
    fn encode_size(&self) -> usize {
        UInt(self.root).encode_size() + self.route.encode_size()
    }
}

impl Serialize for SubnetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SubnetId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SubnetId::from_str(&s).map_err(de::Error::custom)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_str(&s).map_err(de::Error::custom)
    }
}

/// An address qualified by the subnet it lives in.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IpcAddress {
    pub subnet: SubnetId,
    pub raw: Address,
}

impl IpcAddress {
    pub fn new(subnet: SubnetId, raw: Address) -> Self {
        Self { subnet, raw }
    }
}

impl Display for IpcAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subnet, self.raw)
    }
}

impl Write for IpcAddress {
    fn write(&self, writer: &mut impl BufMut) {
        self.subnet.write(writer);
        self.raw.write(writer);
    }
}

impl Read for IpcAddress {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let subnet = SubnetId::read(reader)?;
        let raw = Address::read(reader)?;
        Ok(Self { subnet, raw })
    }
}

impl EncodeSize for IpcAddress {
    fn encode_size(&self) -> usize {
        self.subnet.encode_size() + self.raw.encode_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};

    fn addr(b: u8) -> Address {
        Address::new([b; Address::SIZE])
    }

    #[test]
    fn test_subnet_id_roundtrip() {
        let root = SubnetId::new_root(314);
        let child = SubnetId::new_from_parent(&root, addr(1));
        let grandchild = SubnetId::new_from_parent(&child, addr(2));

        let s = grandchild.to_string();
        assert!(s.starts_with("/r314/0x0101"));
        assert_eq!(SubnetId::from_str(&s).unwrap(), grandchild);
        assert_eq!(SubnetId::from_str("/r314").unwrap(), root);
        assert!(SubnetId::from_str("r314").is_err());
        assert!(SubnetId::from_str("/r314/0x01").is_err());
    }

    #[test]
    fn test_parent() {
        let root = SubnetId::new_root(1);
        let child = SubnetId::new_from_parent(&root, addr(1));
        assert_eq!(child.parent(), Some(root.clone()));
        assert_eq!(root.parent(), None);
    }

    #[test]
    fn test_is_bottom_up() {
        let root = SubnetId::new_root(123);
        let a = SubnetId::new_from_parent(&root, addr(1));
        let aa = SubnetId::new_from_parent(&a, addr(2));
        let b = SubnetId::new_from_parent(&root, addr(3));

        assert!(!a.is_bottom_up(&aa));
        assert!(a.is_bottom_up(&root));
        assert!(a.is_bottom_up(&b));
        assert!(!aa.is_bottom_up(&aa));
        assert!(aa.is_bottom_up(&a));
        assert!(!a.is_bottom_up(&SubnetId::new_root(7)));
    }

    #[test]
    fn test_subnet_id_codec() {
        let root = SubnetId::new_root(314);
        let child = SubnetId::new_from_parent(&root, addr(1));
        let encoded = child.encode();
        assert_eq!(encoded.len(), child.encode_size());
        assert_eq!(SubnetId::decode(encoded).unwrap(), child);

        // Routes deeper than the hierarchy allows are rejected
        let mut deep = root;
        for b in 0..=MAX_ROUTE_DEPTH {
            deep = SubnetId::new_from_parent(&deep, addr(b as u8));
        }
        assert!(SubnetId::decode(deep.encode()).is_err());
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(Error::CollateralIsZero.kind(), ErrorKind::Validation);
        assert_eq!(
            Error::SignatureReplay(addr(1), 10).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            Error::MethodNotAllowed("stake", PermissionMode::Federated).kind(),
            ErrorKind::Policy
        );
        assert_eq!(Error::MailboxClosed.kind(), ErrorKind::Unavailable);
        assert_eq!(
            Error::AmountOverflow(1, "collateral").kind(),
            ErrorKind::Validation
        );
    }
}
