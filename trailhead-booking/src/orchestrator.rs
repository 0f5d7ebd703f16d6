use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use trailhead_core::fees::ChargeBreakdown;
use trailhead_core::identity::Principal;
use trailhead_core::lifecycle::{BookingEvent, IllegalTransition, ReviewReason};
use trailhead_core::notify::Notifier;
use trailhead_core::payment::{CheckoutRequest, PaymentProvider, ProviderSession};
use trailhead_core::{
    Booking, BookingError, BookingResult, BookingStatus, BookingStore, ConfirmOutcome,
    PaymentSession, PaymentStatus, Transaction, TransactionStatus,
};
use uuid::Uuid;

use crate::resilience::ProviderGuard;

/// What the client needs to send the renter to the provider's checkout.
#[derive(Debug, Clone, Serialize)]
pub struct SessionHandle {
    pub session_id: String,
    pub booking_id: Uuid,
    pub redirect_url: Option<String>,
    pub base_amount: i64,
    pub service_fee: i64,
    pub amount_total: i64,
    pub currency: String,
    pub hold_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationResult {
    Confirmed {
        booking: Booking,
        transaction: Transaction,
    },
    /// The provider reference was reconciled before; nothing changed.
    AlreadyReconciled { transaction: Transaction },
    Pending {
        session_id: String,
        booking_id: Uuid,
    },
    /// The session failed or expired. The hold stays until its own expiry.
    Failed {
        session_id: String,
        booking_id: Uuid,
        status: PaymentStatus,
    },
    /// Paid, but the booking could not be confirmed; recorded for review.
    NeedsReview {
        booking: Booking,
        transaction: Transaction,
        reason: ReviewReason,
    },
    /// The session points at no booking we know. Acknowledged so the
    /// provider stops redelivering; logged for review.
    Unmatched {
        session_id: String,
        booking_id: Option<Uuid>,
        provider_reference: Option<String>,
    },
}

impl ReconciliationResult {
    /// Short label for logs and metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            ReconciliationResult::Confirmed { .. } => "confirmed",
            ReconciliationResult::AlreadyReconciled { .. } => "already_reconciled",
            ReconciliationResult::Pending { .. } => "pending",
            ReconciliationResult::Failed { .. } => "failed",
            ReconciliationResult::NeedsReview { .. } => "needs_review",
            ReconciliationResult::Unmatched { .. } => "unmatched",
        }
    }
}

/// Creates checkout sessions and merges provider outcomes into bookings.
pub struct PaymentOrchestrator {
    store: Arc<dyn BookingStore>,
    provider: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn Notifier>,
    guard: ProviderGuard,
    service_fee_bps: u32,
}

impl PaymentOrchestrator {
    pub fn new(
        store: Arc<dyn BookingStore>,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn Notifier>,
        guard: ProviderGuard,
        service_fee_bps: u32,
    ) -> Self {
        Self {
            store,
            provider,
            notifier,
            guard,
            service_fee_bps,
        }
    }

    pub fn guard(&self) -> &ProviderGuard {
        &self.guard
    }

    // ========================================================================
    // Session creation
    // ========================================================================

    pub async fn create_session(
        &self,
        principal: &Principal,
        booking_id: Uuid,
        now: DateTime<Utc>,
    ) -> BookingResult<SessionHandle> {
        // 1. The caller's own, still-live hold
        let booking = self.booking(booking_id).await?;
        if booking.renter_id != principal.user_id {
            return Err(BookingError::Forbidden(format!(
                "booking {} belongs to another renter",
                booking_id
            )));
        }
        if booking.status != BookingStatus::Held {
            return Err(IllegalTransition {
                from: booking.status,
                event: BookingEvent::PaymentConfirmed,
            }
            .into());
        }
        if booking.is_hold_expired(now) {
            return Err(BookingError::Validation(format!(
                "hold on booking {} has expired, place a new hold",
                booking_id
            )));
        }

        // 2. Price it
        let listing = self
            .store
            .get_listing(booking.listing_id)
            .await?
            .ok_or_else(|| BookingError::listing_not_found(booking.listing_id))?;
        let charge = ChargeBreakdown::compute(booking.base_cost, self.service_fee_bps);
        let description = format!(
            "{}, {} night(s) from {}",
            listing.title,
            booking.dates.nights(),
            booking.dates.start
        );

        // 3. One provider idempotency key per attempt, derived from the hold's key
        let previous = self.store.sessions_for_booking(booking.id).await?;
        let attempts = previous.len();
        let hold_key = booking
            .idempotency_key
            .clone()
            .unwrap_or_else(|| booking.id.simple().to_string());
        let request = CheckoutRequest::for_booking(
            &booking,
            charge.total,
            description,
            format!("{}-{}", hold_key, attempts),
        );

        // 4. Call out
        let provider_session = self
            .guard
            .call("create_session", || self.provider.create_session(&request))
            .await?;

        // 5. Record; supersedes any pending session of this booking
        let session = self
            .store
            .open_session(PaymentSession {
                id: provider_session.id.clone(),
                booking_id: booking.id,
                base_amount: charge.base,
                service_fee: charge.service_fee,
                amount_total: charge.total,
                currency: booking.currency.clone(),
                status: PaymentStatus::Pending,
                redirect_url: provider_session.url.clone(),
                idempotency_key: request.idempotency_key.clone(),
                created_at: now,
                updated_at: now,
            })
            .await?;

        info!(
            booking_id = %booking.id,
            session_id = %session.id,
            amount_total = session.amount_total,
            "payment session created"
        );

        for stale in previous
            .iter()
            .filter(|s| s.status == PaymentStatus::Pending && s.id != session.id)
        {
            self.expire_at_provider(booking.id, &stale.id).await;
        }

        Ok(SessionHandle {
            session_id: session.id,
            booking_id: booking.id,
            redirect_url: session.redirect_url,
            base_amount: session.base_amount,
            service_fee: session.service_fee,
            amount_total: session.amount_total,
            currency: session.currency,
            hold_expires_at: booking.hold_expires_at,
        })
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Client-initiated status check: ask the provider, then reconcile.
    pub async fn poll_session(
        &self,
        principal: &Principal,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> BookingResult<ReconciliationResult> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("payment session {}", session_id)))?;
        let booking = self.booking(session.booking_id).await?;
        if booking.renter_id != principal.user_id {
            return Err(BookingError::Forbidden(format!(
                "payment session {} belongs to another renter",
                session_id
            )));
        }

        let provider_session = self
            .guard
            .call("retrieve_session", || self.provider.retrieve_session(session_id))
            .await?;

        self.reconcile(provider_session, now).await
    }

    /// Merge the provider's view of a session into local state. Safe to call
    /// any number of times, concurrently, for the same provider event.
    pub async fn reconcile(
        &self,
        event: ProviderSession,
        now: DateTime<Utc>,
    ) -> BookingResult<ReconciliationResult> {
        // 1. Already reconciled under this provider reference?
        if let Some(reference) = event.payment_reference.as_deref() {
            if let Some(transaction) = self.store.find_transaction(reference).await? {
                info!(provider_reference = reference, "payment already reconciled");
                return Ok(ReconciliationResult::AlreadyReconciled { transaction });
            }
        }

        // 2. Correlate to a booking
        let local = self.store.get_session(&event.id).await?;
        let Some(booking_id) = local.as_ref().map(|s| s.booking_id).or_else(|| event.booking_id()) else {
            warn!(session_id = %event.id, "provider session carries no booking reference, needs review");
            return Ok(ReconciliationResult::Unmatched {
                session_id: event.id,
                booking_id: None,
                provider_reference: event.payment_reference,
            });
        };

        // 3. Not paid (yet)
        match event.status {
            PaymentStatus::Pending => {
                return Ok(ReconciliationResult::Pending {
                    session_id: event.id,
                    booking_id,
                })
            }
            PaymentStatus::Failed | PaymentStatus::Expired => {
                if let Some(session) = local.as_ref().filter(|s| s.status == PaymentStatus::Pending) {
                    self.store.set_session_status(&session.id, event.status, now).await?;
                }
                warn!(
                    booking_id = %booking_id,
                    session_id = %event.id,
                    status = event.status.as_str(),
                    "payment did not complete, hold left in place"
                );
                return Ok(ReconciliationResult::Failed {
                    session_id: event.id,
                    booking_id,
                    status: event.status,
                });
            }
            PaymentStatus::Paid => {}
        }

        // 4. Paid: confirm and record the transaction in one unit of work
        let reference = event.payment_reference.clone().ok_or_else(|| {
            BookingError::Validation(format!("paid session {} has no payment reference", event.id))
        })?;
        let Some(transaction) = self.transaction_for(&event, local.as_ref(), booking_id, &reference, now).await? else {
            warn!(
                booking_id = %booking_id,
                session_id = %event.id,
                provider_reference = %reference,
                amount = ?event.amount_total,
                "payment received for an unknown booking, needs review"
            );
            return Ok(ReconciliationResult::Unmatched {
                session_id: event.id,
                booking_id: Some(booking_id),
                provider_reference: Some(reference),
            });
        };
        let outcome = self.store.confirm_payment(transaction, now).await?;

        if local.is_some() {
            // The transaction is durable; a stale session row is only cosmetic.
            if let Err(e) = self.store.set_session_status(&event.id, PaymentStatus::Paid, now).await {
                error!(session_id = %event.id, error = %e, "failed to mark session paid");
            }
        }

        Ok(match outcome {
            ConfirmOutcome::Confirmed { booking, transaction } => {
                info!(
                    booking_id = %booking.id,
                    provider_reference = %transaction.provider_reference,
                    amount = transaction.amount,
                    "booking confirmed"
                );
                if let Err(e) = self.notifier.booking_confirmed(&booking, &transaction).await {
                    error!(booking_id = %booking.id, error = %e, "confirmation notification failed");
                }
                ReconciliationResult::Confirmed { booking, transaction }
            }
            ConfirmOutcome::AlreadyReconciled(transaction) => {
                ReconciliationResult::AlreadyReconciled { transaction }
            }
            ConfirmOutcome::NeedsReview {
                booking,
                transaction,
                reason,
            } => {
                warn!(
                    booking_id = %booking.id,
                    provider_reference = %transaction.provider_reference,
                    amount = transaction.amount,
                    %reason,
                    "payment received for a booking that cannot be confirmed, needs review"
                );
                ReconciliationResult::NeedsReview {
                    booking,
                    transaction,
                    reason,
                }
            }
        })
    }

    async fn transaction_for(
        &self,
        event: &ProviderSession,
        local: Option<&PaymentSession>,
        booking_id: Uuid,
        provider_reference: &str,
        now: DateTime<Utc>,
    ) -> BookingResult<Option<Transaction>> {
        let (base_amount, service_fee, amount, currency) = match local {
            Some(session) => (
                session.base_amount,
                session.service_fee,
                session.amount_total,
                session.currency.clone(),
            ),
            None => {
                let Some(booking) = self.store.get_booking(booking_id).await? else {
                    return Ok(None);
                };
                let charge = ChargeBreakdown::compute(booking.base_cost, self.service_fee_bps);
                (charge.base, charge.service_fee, charge.total, booking.currency)
            }
        };

        if let Some(charged) = event.amount_total.filter(|charged| *charged != amount) {
            warn!(
                booking_id = %booking_id,
                expected = amount,
                charged,
                "provider charged a different amount"
            );
        }

        Ok(Some(Transaction {
            id: Uuid::new_v4(),
            booking_id,
            session_id: Some(event.id.clone()),
            provider_reference: provider_reference.to_string(),
            base_amount,
            service_fee,
            amount: event.amount_total.unwrap_or(amount),
            currency,
            status: TransactionStatus::Confirmed,
            refund_reference: None,
            created_at: now,
        }))
    }

    // ========================================================================
    // Compensation
    // ========================================================================

    /// Expire every pending session of a booking, at the provider and locally.
    pub async fn close_pending_sessions(&self, booking_id: Uuid, now: DateTime<Utc>) -> BookingResult<()> {
        for session in self.store.sessions_for_booking(booking_id).await? {
            if session.status == PaymentStatus::Pending {
                self.expire_at_provider(booking_id, &session.id).await;
                self.store
                    .set_session_status(&session.id, PaymentStatus::Expired, now)
                    .await?;
            }
        }
        Ok(())
    }

    /// Refund the confirmed payments of a cancelled booking. Failures are
    /// logged and left for the periodic retry; returns how many succeeded.
    pub async fn refund_booking(&self, booking: &Booking) -> usize {
        let transactions = match self.store.transactions_for_booking(booking.id).await {
            Ok(transactions) => transactions,
            Err(e) => {
                error!(booking_id = %booking.id, error = %e, "could not load transactions for refund");
                return 0;
            }
        };

        let mut refunded = 0;
        for transaction in transactions
            .iter()
            .filter(|t| t.status == TransactionStatus::Confirmed)
        {
            match self.refund_transaction(transaction).await {
                Ok(_) => refunded += 1,
                Err(e) => error!(
                    booking_id = %booking.id,
                    transaction_id = %transaction.id,
                    error = %e,
                    "refund failed, will retry"
                ),
            }
        }
        refunded
    }

    pub async fn refund_transaction(&self, transaction: &Transaction) -> BookingResult<String> {
        let idempotency_key = format!("refund-{}", transaction.id);
        let refund_reference = self
            .guard
            .call("refund", || {
                self.provider
                    .refund(&transaction.provider_reference, transaction.amount, &idempotency_key)
            })
            .await?;

        self.store.mark_refunded(transaction.id, &refund_reference).await?;
        info!(
            booking_id = %transaction.booking_id,
            transaction_id = %transaction.id,
            refund_reference = %refund_reference,
            "payment refunded"
        );
        Ok(refund_reference)
    }

    /// Best effort. A session that still gets paid is reconciled as needing review.
    async fn expire_at_provider(&self, booking_id: Uuid, session_id: &str) {
        match self
            .guard
            .call("expire_session", || self.provider.expire_session(session_id))
            .await
        {
            Ok(()) => info!(booking_id = %booking_id, session_id, "provider session expired"),
            Err(e) => warn!(booking_id = %booking_id, session_id, error = %e, "failed to expire provider session"),
        }
    }

    async fn booking(&self, id: Uuid) -> BookingResult<Booking> {
        self.store
            .get_booking(id)
            .await?
            .ok_or_else(|| BookingError::booking_not_found(id))
    }
}
