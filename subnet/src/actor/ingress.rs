use crate::{
    checkpoint::{BottomUpCheckpoint, BottomUpMsgBatch, IpcEnvelope},
    quorum::QuorumInfo,
    types::{Address, Amount, ConfigurationNumber, Digest, Error, Height, QuorumObjKind},
    validators::{PowerTable, PowerUpdates, Validator, ValidatorInfo},
};
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};

/// Replies to a request that may be rejected.
pub type Responder<T> = oneshot::Sender<Result<T, Error>>;

/// An owner-controlled parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parameter {
    MajorityPercentage(u8),
    ActiveLimit(u16),
    LockingDuration(Height),
    BatchPeriod(Height),
    MaxMsgsPerBatch(usize),
    BottomUpCheckPeriod(Height),
}

/// Messages that can be sent to a [Mailbox].
pub enum Message {
    // Staking
    Join {
        validator: Address,
        metadata: Vec<u8>,
        amount: Amount,
        responder: Responder<ConfigurationNumber>,
    },
    Stake {
        validator: Address,
        amount: Amount,
        responder: Responder<ConfigurationNumber>,
    },
    Unstake {
        validator: Address,
        amount: Amount,
        responder: Responder<ConfigurationNumber>,
    },
    Leave {
        validator: Address,
        responder: Responder<ConfigurationNumber>,
    },
    Claim {
        validator: Address,
        responder: Responder<Amount>,
    },
    SetFederatedPower {
        caller: Address,
        validator: Address,
        metadata: Vec<u8>,
        power: Amount,
        responder: Responder<ConfigurationNumber>,
    },
    ConfirmChanges {
        caller: Address,
        configuration_number: ConfigurationNumber,
        responder: Responder<PowerUpdates>,
    },

    // Checkpoints and messages
    CreateCheckpoint {
        caller: Address,
        height: Height,
        block_hash: Digest,
        responder: Responder<BottomUpCheckpoint>,
    },
    AddCheckpointSignature {
        height: Height,
        signer: Address,
        signature: Vec<u8>,
        responder: Responder<bool>,
    },
    EnqueueEnvelope {
        envelope: IpcEnvelope,
        responder: Responder<u64>,
    },
    EnqueueAtomic {
        envelopes: Vec<IpcEnvelope>,
        responder: Responder<(u64, u64)>,
    },
    CutBatch {
        caller: Address,
        responder: Responder<BottomUpMsgBatch>,
    },
    AddBatchSignature {
        height: Height,
        signer: Address,
        signature: Vec<u8>,
        responder: Responder<bool>,
    },
    GarbageCollect {
        caller: Address,
        retention_height: Height,
        responder: Responder<usize>,
    },

    // Administration
    SetParameter {
        caller: Address,
        parameter: Parameter,
        responder: Responder<()>,
    },
    FundRewards {
        caller: Address,
        amount: Amount,
        responder: Responder<()>,
    },
    DistributeReward {
        caller: Address,
        validator: Address,
        amount: Amount,
        responder: Responder<()>,
    },
    ClaimRewards {
        validator: Address,
        responder: Responder<Amount>,
    },

    // Queries
    ActiveValidators(oneshot::Sender<Vec<Validator>>),
    WaitingValidators(oneshot::Sender<Vec<Validator>>),
    PowerTable(oneshot::Sender<PowerTable>),
    ValidatorPower {
        validator: Address,
        responder: oneshot::Sender<Amount>,
    },
    Validator {
        validator: Address,
        responder: oneshot::Sender<Option<ValidatorInfo>>,
    },
    IsQuorumReached {
        kind: QuorumObjKind,
        height: Height,
        responder: oneshot::Sender<bool>,
    },
    QuorumInfo {
        kind: QuorumObjKind,
        height: Height,
        responder: oneshot::Sender<Option<QuorumInfo>>,
    },
    PendingReleasable {
        validator: Address,
        responder: oneshot::Sender<Amount>,
    },
    CurrentConfigurationNumber(oneshot::Sender<ConfigurationNumber>),
    ConfigurationNumbers(oneshot::Sender<(ConfigurationNumber, ConfigurationNumber)>),
}

impl Message {
    /// Name of the request, used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Join { .. } => "join",
            Message::Stake { .. } => "stake",
            Message::Unstake { .. } => "unstake",
            Message::Leave { .. } => "leave",
            Message::Claim { .. } => "claim",
            Message::SetFederatedPower { .. } => "set_federated_power",
            Message::ConfirmChanges { .. } => "confirm_changes",
            Message::CreateCheckpoint { .. } => "create_checkpoint",
            Message::AddCheckpointSignature { .. } => "add_checkpoint_signature",
            Message::EnqueueEnvelope { .. } => "enqueue_envelope",
            Message::EnqueueAtomic { .. } => "enqueue_atomic",
            Message::CutBatch { .. } => "cut_batch",
            Message::AddBatchSignature { .. } => "add_batch_signature",
            Message::GarbageCollect { .. } => "garbage_collect",
            Message::SetParameter { .. } => "set_parameter",
            Message::FundRewards { .. } => "fund_rewards",
            Message::DistributeReward { .. } => "distribute_reward",
            Message::ClaimRewards { .. } => "claim_rewards",
            Message::ActiveValidators(_) => "active_validators",
            Message::WaitingValidators(_) => "waiting_validators",
            Message::PowerTable(_) => "power_table",
            Message::ValidatorPower { .. } => "validator_power",
            Message::Validator { .. } => "validator",
            Message::IsQuorumReached { .. } => "is_quorum_reached",
            Message::QuorumInfo { .. } => "quorum_info",
            Message::PendingReleasable { .. } => "pending_releasable",
            Message::CurrentConfigurationNumber(_) => "current_configuration_number",
            Message::ConfigurationNumbers(_) => "configuration_numbers",
        }
    }
}

/// A mailbox that can be used to send requests to the [super::Actor].
///
/// Every method fails with [Error::MailboxClosed] if the actor has stopped.
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    /// Creates a new [Mailbox] with the given [mpsc::Sender].
    pub fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &mut self,
        message: impl FnOnce(oneshot::Sender<T>) -> Message,
    ) -> Result<T, Error> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|_| Error::MailboxClosed)?;
        rx.await.map_err(|_| Error::MailboxClosed)
    }

    pub async fn join(
        &mut self,
        validator: Address,
        metadata: Vec<u8>,
        amount: Amount,
    ) -> Result<ConfigurationNumber, Error> {
        self.request(|responder| Message::Join {
            validator,
            metadata,
            amount,
            responder,
        })
        .await?
    }

    pub async fn stake(
        &mut self,
        validator: Address,
        amount: Amount,
    ) -> Result<ConfigurationNumber, Error> {
        self.request(|responder| Message::Stake {
            validator,
            amount,
            responder,
        })
        .await?
    }

    pub async fn unstake(
        &mut self,
        validator: Address,
        amount: Amount,
    ) -> Result<ConfigurationNumber, Error> {
        self.request(|responder| Message::Unstake {
            validator,
            amount,
            responder,
        })
        .await?
    }

    pub async fn leave(&mut self, validator: Address) -> Result<ConfigurationNumber, Error> {
        self.request(|responder| Message::Leave {
            validator,
            responder,
        })
        .await?
    }

    /// Claim collateral whose locking period has elapsed.
    pub async fn claim(&mut self, validator: Address) -> Result<Amount, Error> {
        self.request(|responder| Message::Claim {
            validator,
            responder,
        })
        .await?
    }

    pub async fn set_federated_power(
        &mut self,
        caller: Address,
        validator: Address,
        metadata: Vec<u8>,
        power: Amount,
    ) -> Result<ConfigurationNumber, Error> {
        self.request(|responder| Message::SetFederatedPower {
            caller,
            validator,
            metadata,
            power,
            responder,
        })
        .await?
    }

    pub async fn confirm_changes(
        &mut self,
        caller: Address,
        configuration_number: ConfigurationNumber,
    ) -> Result<PowerUpdates, Error> {
        self.request(|responder| Message::ConfirmChanges {
            caller,
            configuration_number,
            responder,
        })
        .await?
    }

    pub async fn create_checkpoint(
        &mut self,
        caller: Address,
        height: Height,
        block_hash: Digest,
    ) -> Result<BottomUpCheckpoint, Error> {
        self.request(|responder| Message::CreateCheckpoint {
            caller,
            height,
            block_hash,
            responder,
        })
        .await?
    }

    pub async fn add_checkpoint_signature(
        &mut self,
        height: Height,
        signer: Address,
        signature: Vec<u8>,
    ) -> Result<bool, Error> {
        self.request(|responder| Message::AddCheckpointSignature {
            height,
            signer,
            signature,
            responder,
        })
        .await?
    }

    pub async fn enqueue_envelope(&mut self, envelope: IpcEnvelope) -> Result<u64, Error> {
        self.request(|responder| Message::EnqueueEnvelope {
            envelope,
            responder,
        })
        .await?
    }

    pub async fn enqueue_atomic(
        &mut self,
        envelopes: Vec<IpcEnvelope>,
    ) -> Result<(u64, u64), Error> {
        self.request(|responder| Message::EnqueueAtomic {
            envelopes,
            responder,
        })
        .await?
    }

    pub async fn cut_batch(&mut self, caller: Address) -> Result<BottomUpMsgBatch, Error> {
        self.request(|responder| Message::CutBatch { caller, responder })
            .await?
    }

    pub async fn add_batch_signature(
        &mut self,
        height: Height,
        signer: Address,
        signature: Vec<u8>,
    ) -> Result<bool, Error> {
        self.request(|responder| Message::AddBatchSignature {
            height,
            signer,
            signature,
            responder,
        })
        .await?
    }

    pub async fn garbage_collect(
        &mut self,
        caller: Address,
        retention_height: Height,
    ) -> Result<usize, Error> {
        self.request(|responder| Message::GarbageCollect {
            caller,
            retention_height,
            responder,
        })
        .await?
    }

    pub async fn set_parameter(
        &mut self,
        caller: Address,
        parameter: Parameter,
    ) -> Result<(), Error> {
        self.request(|responder| Message::SetParameter {
            caller,
            parameter,
            responder,
        })
        .await?
    }

    pub async fn fund_rewards(&mut self, caller: Address, amount: Amount) -> Result<(), Error> {
        self.request(|responder| Message::FundRewards {
            caller,
            amount,
            responder,
        })
        .await?
    }

    pub async fn distribute_reward(
        &mut self,
        caller: Address,
        validator: Address,
        amount: Amount,
    ) -> Result<(), Error> {
        self.request(|responder| Message::DistributeReward {
            caller,
            validator,
            amount,
            responder,
        })
        .await?
    }

    pub async fn claim_rewards(&mut self, validator: Address) -> Result<Amount, Error> {
        self.request(|responder| Message::ClaimRewards {
            validator,
            responder,
        })
        .await?
    }

    pub async fn active_validators(&mut self) -> Result<Vec<Validator>, Error> {
        self.request(Message::ActiveValidators).await
    }

    pub async fn waiting_validators(&mut self) -> Result<Vec<Validator>, Error> {
        self.request(Message::WaitingValidators).await
    }

    pub async fn power_table(&mut self) -> Result<PowerTable, Error> {
        self.request(Message::PowerTable).await
    }

    pub async fn validator_power(&mut self, validator: Address) -> Result<Amount, Error> {
        self.request(|responder| Message::ValidatorPower {
            validator,
            responder,
        })
        .await
    }

    pub async fn validator(&mut self, validator: Address) -> Result<Option<ValidatorInfo>, Error> {
        self.request(|responder| Message::Validator {
            validator,
            responder,
        })
        .await
    }

    pub async fn is_quorum_reached(
        &mut self,
        kind: QuorumObjKind,
        height: Height,
    ) -> Result<bool, Error> {
        self.request(|responder| Message::IsQuorumReached {
            kind,
            height,
            responder,
        })
        .await
    }

    pub async fn quorum_info(
        &mut self,
        kind: QuorumObjKind,
        height: Height,
    ) -> Result<Option<QuorumInfo>, Error> {
        self.request(|responder| Message::QuorumInfo {
            kind,
            height,
            responder,
        })
        .await
    }

    /// Collateral of `validator` claimable now.
    pub async fn pending_releasable(&mut self, validator: Address) -> Result<Amount, Error> {
        self.request(|responder| Message::PendingReleasable {
            validator,
            responder,
        })
        .await
    }

    pub async fn current_configuration_number(&mut self) -> Result<ConfigurationNumber, Error> {
        self.request(Message::CurrentConfigurationNumber).await
    }

    /// The next configuration number to be assigned and the lowest one not
    /// yet confirmed.
    pub async fn configuration_numbers(
        &mut self,
    ) -> Result<(ConfigurationNumber, ConfigurationNumber), Error> {
        self.request(Message::ConfigurationNumbers).await
    }
}
