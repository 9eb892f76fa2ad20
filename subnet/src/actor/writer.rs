use super::{
    ingress::{Mailbox, Message, Parameter, Responder},
    metrics::{Label, Metrics},
    Activity, Config,
};
use crate::{
    types::{Error, QuorumObjKind},
    Authority, Clock, Reporter, Subnet, Verifier,
};
use commonware_runtime::{Handle, Metrics as RuntimeMetrics, Spawner};
use futures::{channel::mpsc, StreamExt};
use tracing::{debug, warn};

/// Owns a [Subnet] and applies requests from its [Mailbox] one at a time.
pub struct Actor<E, V, C, A, R>
where
    E: Spawner + RuntimeMetrics,
    V: Verifier,
    C: Clock,
    A: Authority,
    R: Reporter<Activity = Activity>,
{
    context: E,
    clock: C,
    reporter: R,
    subnet: Subnet<V, A>,
    mailbox: mpsc::Receiver<Message>,
    metrics: Metrics,
}

impl<E, V, C, A, R> Actor<E, V, C, A, R>
where
    E: Spawner + RuntimeMetrics,
    V: Verifier,
    C: Clock,
    A: Authority,
    R: Reporter<Activity = Activity>,
{
    /// Creates a new actor with the given context and configuration.
    ///
    /// Returns a tuple of the actor and the mailbox for sending requests.
    pub fn new(context: E, cfg: Config<V, C, A, R>) -> Result<(Self, Mailbox), Error> {
        let subnet = Subnet::new(cfg.subnet, cfg.verifier, cfg.authority, cfg.clock.now())?;
        let (tx, rx) = mpsc::channel(cfg.mailbox_size);
        let metrics = Metrics::init(&context);
        metrics.observe(&subnet);
        Ok((
            Self {
                context,
                clock: cfg.clock,
                reporter: cfg.reporter,
                subnet,
                mailbox: rx,
                metrics,
            },
            Mailbox::new(tx),
        ))
    }

    /// Start processing requests until every [Mailbox] has been dropped.
    pub fn start(self) -> Handle<()> {
        self.context.clone().spawn(|_| self.run())
    }

    async fn run(mut self) {
        while let Some(message) = self.mailbox.next().await {
            self.handle(message).await;
        }
        debug!("mailbox closed, shutting down");
    }

    /// Record the outcome of a request and answer it.
    fn respond<T>(&self, request: &'static str, responder: Responder<T>, result: Result<T, Error>) {
        self.metrics
            .requests
            .get_or_create(&Label::new(request, result.is_ok()))
            .inc();
        if let Err(err) = &result {
            warn!(request, ?err, kind = ?err.kind(), "rejected request");
        }
        let _ = responder.send(result);
    }

    async fn handle(&mut self, message: Message) {
        let now = self.clock.now();
        let request = message.name();
        let bootstrapped = self.subnet.is_bootstrapped();
        let (next, start) = self.subnet.configuration_numbers();
        let mut activities = Vec::new();

        match message {
            Message::Join {
                validator,
                metadata,
                amount,
                responder,
            } => {
                let result = self.subnet.join(validator, metadata, amount, now);
                self.respond(request, responder, result);
            }
            Message::Stake {
                validator,
                amount,
                responder,
            } => {
                let result = self.subnet.stake(validator, amount, now);
                self.respond(request, responder, result);
            }
            Message::Unstake {
                validator,
                amount,
                responder,
            } => {
                let result = self.subnet.unstake(validator, amount, now);
                self.respond(request, responder, result);
            }
            Message::Leave {
                validator,
                responder,
            } => {
                let result = self.subnet.leave(validator, now);
                self.respond(request, responder, result);
            }
            Message::Claim {
                validator,
                responder,
            } => {
                let result = self.subnet.claim(validator, now);
                self.respond(request, responder, result);
            }
            Message::SetFederatedPower {
                caller,
                validator,
                metadata,
                power,
                responder,
            } => {
                let result = self
                    .subnet
                    .set_federated_power(caller, validator, metadata, power, now);
                self.respond(request, responder, result);
            }
            Message::ConfirmChanges {
                caller,
                configuration_number,
                responder,
            } => {
                let result = self
                    .subnet
                    .confirm_changes(caller, configuration_number, now);
                if let Ok(updates) = &result {
                    let (_, confirmed) = self.subnet.configuration_numbers();
                    if confirmed > start {
                        activities.push(Activity::ConfigurationConfirmed {
                            configuration_number: confirmed - 1,
                            updates: updates.clone(),
                        });
                    }
                }
                self.respond(request, responder, result);
            }
            Message::CreateCheckpoint {
                caller,
                height,
                block_hash,
                responder,
            } => {
                let result = self.subnet.create_checkpoint(caller, height, block_hash);
                self.respond(request, responder, result);
            }
            Message::AddCheckpointSignature {
                height,
                signer,
                signature,
                responder,
            } => {
                let result = self
                    .subnet
                    .add_checkpoint_signature(height, signer, signature);
                if result.is_ok() {
                    self.metrics.signatures.inc();
                }
                if let Ok(true) = result {
                    let checkpoint = self.subnet.checkpoint(height).cloned();
                    let certificate = self.subnet.certificate(QuorumObjKind::Checkpoint, height);
                    if let (Some(checkpoint), Some(certificate)) = (checkpoint, certificate) {
                        activities.push(Activity::CheckpointCertified {
                            checkpoint,
                            certificate,
                        });
                    }
                }
                self.respond(request, responder, result);
            }
            Message::EnqueueEnvelope {
                envelope,
                responder,
            } => {
                let result = self.subnet.enqueue_envelope(envelope);
                self.respond(request, responder, result);
            }
            Message::EnqueueAtomic {
                envelopes,
                responder,
            } => {
                let result = self.subnet.enqueue_atomic(envelopes);
                self.respond(request, responder, result);
            }
            Message::CutBatch { caller, responder } => {
                let result = self.subnet.cut_batch(caller, now);
                if result.is_ok() {
                    self.metrics.batches.inc();
                }
                self.respond(request, responder, result);
            }
            Message::AddBatchSignature {
                height,
                signer,
                signature,
                responder,
            } => {
                let result = self.subnet.add_batch_signature(height, signer, signature);
                if result.is_ok() {
                    self.metrics.signatures.inc();
                }
                if let Ok(true) = result {
                    let batch = self.subnet.batch(height).cloned();
                    let certificate = self
                        .subnet
                        .certificate(QuorumObjKind::BottomUpMsgBatch, height);
                    if let (Some(batch), Some(certificate)) = (batch, certificate) {
                        activities.push(Activity::BatchCertified { batch, certificate });
                    }
                }
                self.respond(request, responder, result);
            }
            Message::GarbageCollect {
                caller,
                retention_height,
                responder,
            } => {
                let result = self.subnet.garbage_collect(caller, retention_height);
                self.respond(request, responder, result);
            }
            Message::SetParameter {
                caller,
                parameter,
                responder,
            } => {
                let result = match parameter {
                    Parameter::MajorityPercentage(percentage) => {
                        self.subnet.set_majority_percentage(caller, percentage)
                    }
                    Parameter::ActiveLimit(limit) => self.subnet.set_active_limit(caller, limit),
                    Parameter::LockingDuration(duration) => {
                        self.subnet.set_locking_duration(caller, duration)
                    }
                    Parameter::BatchPeriod(period) => self.subnet.set_batch_period(caller, period),
                    Parameter::MaxMsgsPerBatch(max) => {
                        self.subnet.set_max_msgs_per_batch(caller, max)
                    }
                    Parameter::BottomUpCheckPeriod(period) => {
                        self.subnet.set_bottom_up_check_period(caller, period)
                    }
                };
                if result.is_ok() {
                    debug!(?parameter, "updated parameter");
                }
                self.respond(request, responder, result);
            }
            Message::FundRewards {
                caller,
                amount,
                responder,
            } => {
                let result = self.subnet.fund_rewards(caller, amount);
                self.respond(request, responder, result);
            }
            Message::DistributeReward {
                caller,
                validator,
                amount,
                responder,
            } => {
                let result = self.subnet.distribute_reward(caller, validator, amount);
                self.respond(request, responder, result);
            }
            Message::ClaimRewards {
                validator,
                responder,
            } => {
                let result = self.subnet.claim_rewards(validator);
                self.respond(request, responder, result);
            }

            // Queries don't change state
            Message::ActiveValidators(responder) => {
                let _ = responder.send(self.subnet.active_validators());
                return;
            }
            Message::WaitingValidators(responder) => {
                let _ = responder.send(self.subnet.waiting_validators());
                return;
            }
            Message::PowerTable(responder) => {
                let _ = responder.send(self.subnet.power_table());
                return;
            }
            Message::ValidatorPower {
                validator,
                responder,
            } => {
                let _ = responder.send(self.subnet.validator_power(&validator));
                return;
            }
            Message::Validator {
                validator,
                responder,
            } => {
                let _ = responder.send(self.subnet.validator(&validator).cloned());
                return;
            }
            Message::IsQuorumReached {
                kind,
                height,
                responder,
            } => {
                let _ = responder.send(self.subnet.is_quorum_reached(kind, height));
                return;
            }
            Message::QuorumInfo {
                kind,
                height,
                responder,
            } => {
                let _ = responder.send(self.subnet.quorum_info(kind, height).copied());
                return;
            }
            Message::PendingReleasable {
                validator,
                responder,
            } => {
                let _ = responder.send(self.subnet.pending_releasable(&validator, now));
                return;
            }
            Message::CurrentConfigurationNumber(responder) => {
                let _ = responder.send(self.subnet.current_configuration_number());
                return;
            }
            Message::ConfigurationNumbers(responder) => {
                let _ = responder.send(self.subnet.configuration_numbers());
                return;
            }
        }

        // Update metrics
        let (next_after, start_after) = self.subnet.configuration_numbers();
        self.metrics.changes_enqueued.inc_by(next_after - next);
        self.metrics.changes_confirmed.inc_by(start_after - start);
        let certified = activities
            .iter()
            .filter(|activity| {
                matches!(
                    activity,
                    Activity::CheckpointCertified { .. } | Activity::BatchCertified { .. }
                )
            })
            .count();
        self.metrics.quorums.inc_by(certified as u64);
        self.metrics.observe(&self.subnet);

        // Report activity
        if !bootstrapped && self.subnet.is_bootstrapped() {
            activities.insert(0, Activity::Bootstrapped(self.subnet.genesis().clone()));
        }
        for activity in activities {
            self.reporter.report(activity).await;
        }
    }
}
