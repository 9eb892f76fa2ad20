//! Checkpoints, message batches and the envelopes they carry.
//!
//! Every signed object is encoded with [commonware_codec] and hashed with SHA-256 under its own
//! namespace, so a signature over one kind of object can never be replayed as a signature over
//! another.

use crate::{
    types::{Address, Amount, ConfigurationNumber, Digest, Error, Height, IpcAddress, SubnetId},
    validators::{PowerTable, Validator},
};
use bytes::{Buf, BufMut};
use commonware_codec::{
    varint::UInt, Encode, EncodeSize, Error as CodecError, Read, ReadExt, Write,
};
use commonware_cryptography::{Hasher, Sha256};
use commonware_utils::union_unique;

const CHECKPOINT_NAMESPACE: &[u8] = b"_SUBNET_CHECKPOINT";
const BATCH_NAMESPACE: &[u8] = b"_SUBNET_MSG_BATCH";
const MEMBERSHIP_NAMESPACE: &[u8] = b"_SUBNET_MEMBERSHIP";

/// Objects validators sign, hashed under their own namespace.
pub trait Namespaced: Encode {
    /// Domain separator for the digest.
    const NAMESPACE: &'static [u8];

    /// SHA-256 of the encoding, prefixed by [Self::NAMESPACE].
    fn digest(&self) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(&union_unique(Self::NAMESPACE, &self.encode()));
        hasher.finalize()
    }
}

/// What a cross-subnet message does at its destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IpcMsgKind {
    /// Move value to the recipient.
    Transfer = 0,
    /// Invoke the recipient with a payload.
    Call = 1,
    /// Report the outcome of an earlier call back to its sender.
    Result = 2,
}

/// A cross-subnet message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpcEnvelope {
    pub kind: IpcMsgKind,
    pub from: IpcAddress,
    pub to: IpcAddress,
    /// Assigned by the [crate::batcher::CrossMessageBatcher] when enqueued.
    pub nonce: u64,
    pub value: Amount,
    pub message: Vec<u8>,
}

impl IpcEnvelope {
    pub fn transfer(from: IpcAddress, to: IpcAddress, value: Amount) -> Self {
        Self {
            kind: IpcMsgKind::Transfer,
            from,
            to,
            nonce: 0,
            value,
            message: Vec::new(),
        }
    }

    pub fn call(from: IpcAddress, to: IpcAddress, value: Amount, message: Vec<u8>) -> Self {
        Self {
            kind: IpcMsgKind::Call,
            from,
            to,
            nonce: 0,
            value,
            message,
        }
    }

    /// Returns true if the envelope travels up the hierarchy.
    pub fn is_bottom_up(&self) -> bool {
        self.from.subnet.is_bottom_up(&self.to.subnet)
    }

    /// Check that the envelope can leave `subnet` through a bottom-up checkpoint.
    pub fn validate(&self, subnet: &SubnetId) -> Result<(), Error> {
        if self.from.subnet != *subnet {
            return Err(Error::InvalidEnvelope("sender is not in this subnet"));
        }
        if self.from.raw.is_zero() || self.to.raw.is_zero() {
            return Err(Error::ZeroAddress);
        }
        if !self.is_bottom_up() {
            return Err(Error::InvalidEnvelope("destination is not above this subnet"));
        }
        if self.kind == IpcMsgKind::Transfer && !self.message.is_empty() {
            return Err(Error::InvalidEnvelope("transfer carries a payload"));
        }
        Ok(())
    }
}

impl Write for IpcMsgKind {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for IpcMsgKind {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        match u8::read(reader)? {
            0 => Ok(IpcMsgKind::Transfer),
            1 => Ok(IpcMsgKind::Call),
            2 => Ok(IpcMsgKind::Result),
            _ => Err(CodecError::Invalid("subnet::IpcMsgKind", "Invalid type")),
        }
    }
}

impl EncodeSize for IpcMsgKind {
    fn encode_size(&self) -> usize {
        (*self as u8).encode_size()
    }
}

impl Write for IpcEnvelope {
    fn write(&self, writer: &mut impl BufMut) {
        self.kind.write(writer);
        self.from.write(writer);
        self.to.write(writer);
        UInt(self.nonce).write(writer);
        self.value.write(writer);
        self.message.write(writer);
    }
}

impl Read for IpcEnvelope {
    /// Maximum size of the message payload.
    type Cfg = usize;

    fn read_cfg(reader: &mut impl Buf, max_payload: &usize) -> Result<Self, CodecError> {
        let kind = IpcMsgKind::read(reader)?;
        let from = IpcAddress::read(reader)?;
        let to = IpcAddress::read(reader)?;
        let nonce = UInt::read(reader)?.into();
        let value = Amount::read(reader)?;
        let message = Vec::<u8>::read_cfg(reader, &((..=*max_payload).into(), ()))?;
        Ok(Self {
            kind,
            from,
            to,
            nonce,
            value,
            message,
        })
    }
}

impl EncodeSize for IpcEnvelope {
    fn encode_size(&self) -> usize {
        self.kind.encode_size()
            + self.from.encode_size()
            + self.to.encode_size()
            + UInt(self.nonce).encode_size()
            + self.value.encode_size()
            + self.message.encode_size()
    }
}

/// Limits applied when decoding a [BottomUpCheckpoint] or [BottomUpMsgBatch].
#[derive(Clone, Copy, Debug)]
pub struct Limits {
    /// Maximum number of envelopes.
    pub max_msgs: usize,
    /// Maximum size of each envelope payload.
    pub max_payload: usize,
}

fn read_msgs(reader: &mut impl Buf, limits: &Limits) -> Result<Vec<IpcEnvelope>, CodecError> {
    Vec::<IpcEnvelope>::read_cfg(reader, &((..=limits.max_msgs).into(), limits.max_payload))
}

/// Periodic summary of a subnet submitted to its parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BottomUpCheckpoint {
    pub subnet_id: SubnetId,
    pub block_height: Height,
    pub block_hash: Digest,
    /// Latest staking change the parent should confirm (`0` for none).
    pub next_configuration_number: ConfigurationNumber,
    pub msgs: Vec<IpcEnvelope>,
}

impl Write for BottomUpCheckpoint {
    fn write(&self, writer: &mut impl BufMut) {
        self.subnet_id.write(writer);
        UInt(self.block_height).write(writer);
        self.block_hash.write(writer);
        UInt(self.next_configuration_number).write(writer);
        self.msgs.write(writer);
    }
}

impl Read for BottomUpCheckpoint {
    type Cfg = Limits;

    fn read_cfg(reader: &mut impl Buf, limits: &Limits) -> Result<Self, CodecError> {
        let subnet_id = SubnetId::read(reader)?;
        let block_height = UInt::read(reader)?.into();
        let block_hash = Digest::read(reader)?;
        let next_configuration_number = UInt::read(reader)?.into();
        let msgs = read_msgs(reader, limits)?;
        Ok(Self {
            subnet_id,
            block_height,
            block_hash,
            next_configuration_number,
            msgs,
        })
    }
}

impl EncodeSize for BottomUpCheckpoint {
    fn encode_size(&self) -> usize {
        self.subnet_id.encode_size()
            + UInt(self.block_height).encode_size()
            + self.block_hash.encode_size()
            + UInt(self.next_configuration_number).encode_size()
            + self.msgs.encode_size()
    }
}

impl Namespaced for BottomUpCheckpoint {
    const NAMESPACE: &'static [u8] = CHECKPOINT_NAMESPACE;
}

/// Messages cut between checkpoints, certified on their own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BottomUpMsgBatch {
    pub subnet_id: SubnetId,
    pub block_height: Height,
    pub msgs: Vec<IpcEnvelope>,
}

impl Write for BottomUpMsgBatch {
    fn write(&self, writer: &mut impl BufMut) {
        self.subnet_id.write(writer);
        UInt(self.block_height).write(writer);
        self.msgs.write(writer);
    }
}

impl Read for BottomUpMsgBatch {
    type Cfg = Limits;

    fn read_cfg(reader: &mut impl Buf, limits: &Limits) -> Result<Self, CodecError> {
        let subnet_id = SubnetId::read(reader)?;
        let block_height = UInt::read(reader)?.into();
        let msgs = read_msgs(reader, limits)?;
        Ok(Self {
            subnet_id,
            block_height,
            msgs,
        })
    }
}

impl EncodeSize for BottomUpMsgBatch {
    fn encode_size(&self) -> usize {
        self.subnet_id.encode_size() + UInt(self.block_height).encode_size() + self.msgs.encode_size()
    }
}

impl Namespaced for BottomUpMsgBatch {
    const NAMESPACE: &'static [u8] = BATCH_NAMESPACE;
}

/// The validators allowed to sign an object, frozen when the object is created.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Membership {
    validators: Vec<Validator>,
    total_weight: Amount,
}

impl Membership {
    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub fn total_weight(&self) -> Amount {
        self.total_weight
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn get(&self, address: &Address) -> Option<&Validator> {
        self.validators.iter().find(|v| v.address == *address)
    }
}

impl From<PowerTable> for Membership {
    fn from(table: PowerTable) -> Self {
        let total_weight = table.total_weight();
        let mut validators = table.0;
        validators.sort_by(|a, b| a.address.cmp(&b.address));
        Self {
            validators,
            total_weight,
        }
    }
}

impl Write for Validator {
    fn write(&self, writer: &mut impl BufMut) {
        self.address.write(writer);
        self.weight.write(writer);
        self.metadata.write(writer);
    }
}

impl EncodeSize for Validator {
    fn encode_size(&self) -> usize {
        self.address.encode_size() + self.weight.encode_size() + self.metadata.encode_size()
    }
}

impl Write for Membership {
    fn write(&self, writer: &mut impl BufMut) {
        self.validators.write(writer);
    }
}

impl EncodeSize for Membership {
    fn encode_size(&self) -> usize {
        self.validators.encode_size()
    }
}

impl Namespaced for Membership {
    const NAMESPACE: &'static [u8] = MEMBERSHIP_NAMESPACE;
}
