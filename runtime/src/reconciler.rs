//! Applies normalized events to bookings.
//!
//! The reconciler is the only writer of state transitions. For each event it
//! resolves the target booking, runs the transition engine on a fresh load
//! and saves the result with an expected version, reloading and recomputing
//! when another writer got there first. Events whose prerequisite has not
//! arrived yet are parked durably and re-evaluated whenever the booking they
//! address moves.

use crate::config::CoordinatorConfig;
use crate::{CoordinatorError, Services, report_anomaly};
use booking_core::anomaly::{Anomaly, AnomalyKind};
use booking_core::booking::BookingState;
use booking_core::event::EventEnvelope;
use booking_core::ids::{BookingId, CorrelationKey, DirectiveKey};
use booking_core::machine::{Rejection, transition};
use booking_core::pending::ParkedEvent;
use booking_core::store::StoreError;

/// What happened to a submitted event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The event was applied.
    Applied {
        /// Affected booking.
        booking_id: BookingId,
        /// State before the event.
        from: BookingState,
        /// State after the event and any drained events.
        state: BookingState,
        /// Directives scheduled by this event and by drained events.
        directives: Vec<DirectiveKey>,
        /// Parked events applied as a consequence.
        drained: usize,
    },
    /// The idempotency key was already applied; nothing changed.
    Duplicate {
        /// Affected booking.
        booking_id: BookingId,
    },
    /// The event's effect is already present; nothing changed.
    AlreadySatisfied {
        /// Affected booking.
        booking_id: BookingId,
    },
    /// The event waits in the parked-event queue.
    Parked {
        /// Booking, when it exists.
        booking_id: Option<BookingId>,
    },
    /// The event does not apply and was reported as an anomaly.
    Rejected {
        /// Affected booking.
        booking_id: BookingId,
        /// Why.
        rejection: Rejection,
    },
}

impl SubmitOutcome {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Duplicate { .. } => "duplicate",
            Self::AlreadySatisfied { .. } => "already_satisfied",
            Self::Parked { .. } => "parked",
            Self::Rejected { .. } => "rejected",
        }
    }

    /// Booking whose directives should be dispatched, if any were scheduled.
    #[must_use]
    pub fn dispatch_target(&self) -> Option<BookingId> {
        match self {
            Self::Applied {
                booking_id,
                directives,
                ..
            } if !directives.is_empty() => Some(*booking_id),
            _ => None,
        }
    }
}

/// Result of one optimistic apply attempt sequence.
enum Applied {
    Transitioned {
        from: BookingState,
        to: BookingState,
        directives: Vec<DirectiveKey>,
    },
    Duplicate,
    Rejected(Rejection),
}

/// Event reconciler.
#[derive(Clone, Debug)]
pub struct Reconciler {
    services: Services,
    config: CoordinatorConfig,
}

impl Reconciler {
    /// Create a reconciler.
    #[must_use]
    pub const fn new(services: Services, config: CoordinatorConfig) -> Self {
        Self { services, config }
    }

    /// Apply `envelope` to its booking.
    ///
    /// Returns once the outcome is durable: the transition is saved, or the
    /// event is parked, or it was found to be a duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Store`] when persistence is unavailable
    /// and [`CoordinatorError::ConflictRetriesExhausted`] under sustained
    /// contention. The event is not parked in either case; the provider is
    /// expected to redeliver.
    #[tracing::instrument(
        skip(self, envelope),
        fields(
            idempotency_key = %envelope.idempotency_key,
            event = %envelope.kind(),
            target = %envelope.target,
        )
    )]
    pub async fn submit(&self, envelope: EventEnvelope) -> Result<SubmitOutcome, CoordinatorError> {
        let Some(booking_id) = self.resolve(&envelope.target).await? else {
            tracing::info!("Target booking unknown, parking event");
            self.park(ParkedEvent::new(envelope, self.services.clock.now()))
                .await?;
            return Ok(SubmitOutcome::Parked { booking_id: None });
        };

        match self.apply(booking_id, &envelope).await? {
            Applied::Transitioned {
                from,
                to,
                mut directives,
            } => {
                let (drained, state, drained_directives) = self.drain(booking_id).await?;
                directives.extend(drained_directives);
                Ok(SubmitOutcome::Applied {
                    booking_id,
                    from,
                    state: state.unwrap_or(to),
                    directives,
                    drained,
                })
            },
            Applied::Duplicate => {
                tracing::debug!(%booking_id, "Duplicate delivery ignored");
                Ok(SubmitOutcome::Duplicate { booking_id })
            },
            Applied::Rejected(Rejection::AwaitingPrerequisite) => {
                tracing::info!(%booking_id, "Prerequisite missing, parking event");
                self.park(ParkedEvent::new(envelope, self.services.clock.now()))
                    .await?;
                Ok(SubmitOutcome::Parked {
                    booking_id: Some(booking_id),
                })
            },
            Applied::Rejected(Rejection::AlreadySatisfied) => {
                tracing::debug!(%booking_id, "Event already satisfied, acknowledging");
                Ok(SubmitOutcome::AlreadySatisfied { booking_id })
            },
            Applied::Rejected(rejection) => {
                self.report_rejection(booking_id, &envelope, rejection).await;
                Ok(SubmitOutcome::Rejected {
                    booking_id,
                    rejection,
                })
            },
        }
    }

    /// Re-evaluate one parked event taken from the queue by the recovery job.
    ///
    /// The event is re-parked with one more attempt if it still cannot apply,
    /// or dropped and reported once its attempts are exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError`] on persistence failure; the event is
    /// released back to the queue first, and its claim lapses if even that
    /// fails.
    pub async fn retry_parked(&self, parked: ParkedEvent) -> Result<SubmitOutcome, CoordinatorError> {
        let booking_id = match self.resolve(&parked.envelope.target).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                if let Err(e) = self.requeue(parked.clone(), None).await {
                    self.restore([parked]).await;
                    return Err(e);
                }
                return Ok(SubmitOutcome::Parked { booking_id: None });
            },
            Err(e) => {
                self.restore([parked]).await;
                return Err(e);
            },
        };

        let applied = match self.apply(booking_id, &parked.envelope).await {
            Ok(applied) => applied,
            Err(e) => {
                self.restore([parked]).await;
                return Err(e);
            },
        };
        if !matches!(applied, Applied::Rejected(Rejection::AwaitingPrerequisite)) {
            self.acknowledge(&parked).await;
        }

        match applied {
            Applied::Transitioned { from, to, mut directives } => {
                metrics::counter!("booking_parked_events_drained_total").increment(1);
                let (drained, state, drained_directives) = self.drain(booking_id).await?;
                directives.extend(drained_directives);
                Ok(SubmitOutcome::Applied {
                    booking_id,
                    from,
                    state: state.unwrap_or(to),
                    directives,
                    drained: drained + 1,
                })
            },
            Applied::Duplicate => Ok(SubmitOutcome::Duplicate { booking_id }),
            Applied::Rejected(Rejection::AwaitingPrerequisite) => {
                if let Err(e) = self.requeue(parked.clone(), Some(booking_id)).await {
                    self.restore([parked]).await;
                    return Err(e);
                }
                Ok(SubmitOutcome::Parked {
                    booking_id: Some(booking_id),
                })
            },
            Applied::Rejected(Rejection::AlreadySatisfied) => {
                Ok(SubmitOutcome::AlreadySatisfied { booking_id })
            },
            Applied::Rejected(rejection) => {
                self.report_rejection(booking_id, &parked.envelope, rejection)
                    .await;
                Ok(SubmitOutcome::Rejected {
                    booking_id,
                    rejection,
                })
            },
        }
    }

    /// Find the booking a correlation key addresses.
    async fn resolve(&self, target: &CorrelationKey) -> Result<Option<BookingId>, CoordinatorError> {
        let store = &self.services.store;
        let found = match target {
            CorrelationKey::Booking(id) => match store.load(*id).await {
                Ok(_) => Some(*id),
                Err(StoreError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            },
            CorrelationKey::SchedulingRef(r) => store.find_by_scheduling_ref(r).await?,
            CorrelationKey::PaymentRef(r) => store.find_by_payment_ref(r).await?,
        };
        Ok(found)
    }

    /// Load, transition, save; reload and recompute on version conflicts.
    async fn apply(&self, booking_id: BookingId, envelope: &EventEnvelope) -> Result<Applied, CoordinatorError> {
        let max = self.config.max_conflict_retries;

        for attempt in 0..=max {
            let mut booking = self.services.store.load(booking_id).await?;

            if booking.has_applied(&envelope.idempotency_key) {
                return Ok(Applied::Duplicate);
            }

            let t = match transition(&booking, &envelope.event) {
                Ok(t) => t,
                Err(invalid) => {
                    metrics::counter!(
                        "booking_rejections_total",
                        "event" => invalid.event.as_str(),
                        "rejection" => invalid.rejection.as_str()
                    )
                    .increment(1);
                    return Ok(Applied::Rejected(invalid.rejection));
                },
            };

            let expected = booking.version;
            let directives = booking.apply(envelope, &t, self.services.clock.now());

            match self.services.store.save(&booking, expected).await {
                Ok(version) => {
                    metrics::counter!(
                        "booking_transitions_total",
                        "event" => t.event.as_str(),
                        "to" => t.to.as_str()
                    )
                    .increment(1);
                    tracing::info!(
                        %booking_id,
                        from = %t.from,
                        to = %t.to,
                        %version,
                        directives = directives.len(),
                        "Transition applied"
                    );
                    return Ok(Applied::Transitioned {
                        from: t.from,
                        to: t.to,
                        directives,
                    });
                },
                Err(e) if e.is_conflict() => {
                    metrics::counter!("booking_version_conflicts_total").increment(1);
                    tracing::debug!(%booking_id, attempt, "Version conflict, reloading");
                },
                Err(e) => return Err(e.into()),
            }
        }

        tracing::error!(%booking_id, attempts = max + 1, "Conflict retries exhausted");
        Err(CoordinatorError::ConflictRetriesExhausted {
            booking_id,
            attempts: max + 1,
        })
    }

    /// Apply parked events for `booking_id` until a pass makes no progress.
    ///
    /// Returns the number of events applied, the final state if anything
    /// applied, and the directives those events scheduled.
    async fn drain(
        &self,
        booking_id: BookingId,
    ) -> Result<(usize, Option<BookingState>, Vec<DirectiveKey>), CoordinatorError> {
        let mut applied = 0;
        let mut state = None;
        let mut directives = Vec::new();

        loop {
            let booking = self.services.store.load(booking_id).await?;
            let mut parked = self.services.pending.take(&booking.correlation_keys()).await?;
            if parked.is_empty() {
                break;
            }
            parked.sort_by(ParkedEvent::drain_order);

            let mut progressed = false;
            let mut queue = parked.into_iter();
            while let Some(event) = queue.next() {
                let outcome = match self.apply(booking_id, &event.envelope).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        // Nothing taken may be lost.
                        self.restore(std::iter::once(event).chain(queue)).await;
                        return Err(e);
                    },
                };
                if !matches!(outcome, Applied::Rejected(Rejection::AwaitingPrerequisite)) {
                    self.acknowledge(&event).await;
                }

                match outcome {
                    Applied::Transitioned {
                        to,
                        directives: scheduled,
                        ..
                    } => {
                        metrics::counter!("booking_parked_events_drained_total").increment(1);
                        tracing::info!(
                            %booking_id,
                            idempotency_key = %event.envelope.idempotency_key,
                            event = %event.envelope.kind(),
                            "Parked event applied"
                        );
                        progressed = true;
                        applied += 1;
                        state = Some(to);
                        directives.extend(scheduled);
                    },
                    Applied::Duplicate | Applied::Rejected(Rejection::AlreadySatisfied) => {
                        tracing::debug!(
                            %booking_id,
                            idempotency_key = %event.envelope.idempotency_key,
                            "Parked event no longer needed"
                        );
                    },
                    Applied::Rejected(Rejection::AwaitingPrerequisite) => {
                        if let Err(e) = self.requeue(event.clone(), Some(booking_id)).await {
                            self.restore(std::iter::once(event).chain(queue)).await;
                            return Err(e);
                        }
                    },
                    Applied::Rejected(rejection) => {
                        self.report_rejection(booking_id, &event.envelope, rejection)
                            .await;
                    },
                }
            }

            if !progressed {
                break;
            }
        }

        Ok((applied, state, directives))
    }

    /// Release events taken from the queue after a failed drain. Every event
    /// is attempted; one that still cannot be parked stays claimed until its
    /// claim lapses.
    async fn restore(&self, events: impl IntoIterator<Item = ParkedEvent>) {
        for event in events {
            let key = event.envelope.idempotency_key.clone();
            if let Err(e) = self.services.pending.park(event).await {
                tracing::error!(idempotency_key = %key, error = %e, "Taken event could not be released");
            }
        }
    }

    /// Settle a taken event that no longer needs to wait.
    async fn acknowledge(&self, event: &ParkedEvent) {
        if let Err(e) = self.services.pending.acknowledge(event.id).await {
            tracing::warn!(
                idempotency_key = %event.envelope.idempotency_key,
                error = %e,
                "Parked event not acknowledged, it returns when its claim lapses"
            );
        }
    }

    async fn park(&self, event: ParkedEvent) -> Result<(), CoordinatorError> {
        metrics::counter!("booking_parked_events_total", "event" => event.envelope.kind().as_str())
            .increment(1);
        self.services.pending.park(event).await?;
        Ok(())
    }

    /// Put an event back with one more attempt, or drop it when exhausted.
    async fn requeue(&self, mut event: ParkedEvent, booking_id: Option<BookingId>) -> Result<(), CoordinatorError> {
        event.attempts += 1;
        if event.attempts < self.config.max_parked_attempts {
            self.services.pending.park(event).await?;
            return Ok(());
        }

        metrics::counter!("booking_parked_events_dropped_total").increment(1);
        self.acknowledge(&event).await;
        let (kind, detail) = match booking_id {
            Some(_) => (
                AnomalyKind::PrerequisiteTimeout,
                format!(
                    "{} still waiting for its prerequisite after {} attempts",
                    event.envelope.kind(),
                    event.attempts
                ),
            ),
            None => (
                AnomalyKind::UnknownBooking,
                format!(
                    "no booking matches {} after {} attempts",
                    event.envelope.target, event.attempts
                ),
            ),
        };
        let mut anomaly = Anomaly::new(kind, detail, self.services.clock.now())
            .with_target(event.envelope.target.clone())
            .with_event(event.envelope.kind(), event.envelope.idempotency_key.clone());
        if let Some(id) = booking_id {
            anomaly = anomaly.with_booking(id);
        }
        report_anomaly(&self.services, anomaly).await;
        Ok(())
    }

    async fn report_rejection(&self, booking_id: BookingId, envelope: &EventEnvelope, rejection: Rejection) {
        let anomaly = Anomaly::new(
            AnomalyKind::InvalidTransition,
            format!("{} rejected: {rejection}", envelope.kind()),
            self.services.clock.now(),
        )
        .with_booking(booking_id)
        .with_target(envelope.target.clone())
        .with_event(envelope.kind(), envelope.idempotency_key.clone());
        report_anomaly(&self.services, anomaly).await;
    }
}
