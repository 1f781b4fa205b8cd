use furikae_core::{
    Booking, BookingStatus, Clock, CoreError, CoreResult, EventPublisher, SlotDefinition, StoreTransaction, Ticket,
    TicketStatus, TicketStore, TimeSlot,
};
use furikae_shared::{LifecycleEvent, LifecycleEventKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::publish;
use crate::retry::{retry_with_backoff, RetryPolicy};

enum ReserveOutcome {
    Created { booking: Booking, ticket: Ticket },
    /// The same reservation was already in place.
    Existing(Booking),
    /// The ticket was past due and got expired instead.
    Expired(Ticket),
}

enum CancelOutcome {
    Cancelled(Ticket),
    /// The ticket was past due and got expired instead.
    Expired(Ticket),
}

/// The only writer of slot occupancy and of ticket reservations.
pub struct BookingCoordinator {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventPublisher>,
    reserve_timeout: Duration,
    retry: RetryPolicy,
}

impl BookingCoordinator {
    pub fn new(
        store: Arc<dyn TicketStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventPublisher>,
        reserve_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self { store, clock, events, reserve_timeout, retry }
    }

    /// Exchanges the ticket for a seat in the slot.
    ///
    /// The lock and check phase of each attempt runs under `reserve_timeout`; an
    /// attempt that overruns it is abandoned (its transaction rolls back) and
    /// reported as `ReservationTimedOut`. The commit itself is never cut short,
    /// so a timed-out attempt has no side effects. Store contention is retried
    /// with backoff.
    pub async fn reserve(&self, ticket_id: Uuid, slot_id: Uuid) -> CoreResult<Booking> {
        let outcome = retry_with_backoff(&self.retry, "reserve", || async move {
            let (tx, outcome) =
                match tokio::time::timeout(self.reserve_timeout, self.prepare_reserve(ticket_id, slot_id)).await {
                    Ok(prepared) => prepared?,
                    Err(_) => {
                        warn!("Reserve of ticket {} on slot {} timed out", ticket_id, slot_id);
                        return Err(CoreError::ReservationTimedOut(self.reserve_timeout));
                    }
                };
            tx.commit().await?;
            Ok(outcome)
        })
        .await;

        match outcome {
            Ok(ReserveOutcome::Created { booking, ticket }) => {
                info!("Reserved slot {} with ticket {} (booking {})", slot_id, ticket_id, booking.id);
                publish(
                    self.events.as_ref(),
                    ticket.lifecycle_event(LifecycleEventKind::Reserved, Some(slot_id), None, booking.created_at),
                )
                .await;
                Ok(booking)
            }
            Ok(ReserveOutcome::Existing(booking)) => {
                info!("Ticket {} already holds booking {} on slot {}", ticket_id, booking.id, slot_id);
                Ok(booking)
            }
            Ok(ReserveOutcome::Expired(ticket)) => {
                publish(
                    self.events.as_ref(),
                    ticket.lifecycle_event(LifecycleEventKind::Expired, None, None, ticket.updated_at),
                )
                .await;
                warn!("Reserve rejected: ticket {} expired at {}", ticket_id, ticket.expires_at);
                Err(CoreError::not_redeemable(
                    ticket_id,
                    format!("ticket expired at {}", ticket.expires_at.to_rfc3339()),
                ))
            }
            Err(e) => {
                warn!("Reserve of ticket {} on slot {} failed: {}", ticket_id, slot_id, e);
                Err(e)
            }
        }
    }

    /// Takes the locks and stages the writes. The caller commits.
    async fn prepare_reserve(
        &self,
        ticket_id: Uuid,
        slot_id: Uuid,
    ) -> CoreResult<(Box<dyn StoreTransaction>, ReserveOutcome)> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let mut ticket = tx
            .lock_ticket(ticket_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Ticket", ticket_id))?;

        if let Some(existing) = tx.active_booking(ticket_id).await? {
            if existing.slot_id == slot_id {
                return Ok((tx, ReserveOutcome::Existing(existing)));
            }
            return Err(CoreError::not_redeemable(
                ticket_id,
                format!("ticket is already reserved for slot {}", existing.slot_id),
            ));
        }

        if ticket.is_due(now) {
            ticket.expire(now)?;
            tx.update_ticket(&ticket).await?;
            return Ok((tx, ReserveOutcome::Expired(ticket)));
        }
        ticket.check_redeemable(now)?;

        let mut slot = tx
            .lock_slot(slot_id)
            .await?
            .ok_or_else(|| CoreError::not_found("TimeSlot", slot_id))?;

        if !ticket.covers(&slot.brand_id) {
            return Err(CoreError::not_redeemable(
                ticket_id,
                format!("brand {} is outside the ticket's product scope", slot.brand_id),
            ));
        }
        if slot.has_started(now) {
            return Err(CoreError::SlotClosed(slot_id));
        }
        slot.take_seat()?;

        let booking = Booking::new(ticket_id, slot_id, now);
        ticket.reserve(booking.id, now)?;

        tx.insert_booking(&booking).await?;
        tx.update_slot(&slot).await?;
        tx.update_ticket(&ticket).await?;

        Ok((tx, ReserveOutcome::Created { booking, ticket }))
    }

    /// Consumes the ticket of an active booking. Confirming twice is a no-op.
    pub async fn confirm(&self, booking_id: Uuid) -> CoreResult<Ticket> {
        let (ticket, confirmed) =
            retry_with_backoff(&self.retry, "confirm", || async move { self.try_confirm(booking_id).await }).await?;

        if let Some(booking) = confirmed {
            info!("Booking {} confirmed, ticket {} used", booking_id, ticket.id);
            publish(
                self.events.as_ref(),
                ticket.lifecycle_event(LifecycleEventKind::Used, Some(booking.slot_id), None, ticket.updated_at),
            )
            .await;
        }
        Ok(ticket)
    }

    /// Returns the booking alongside the ticket only when this call confirmed it.
    async fn try_confirm(&self, booking_id: Uuid) -> CoreResult<(Ticket, Option<Booking>)> {
        let now = self.clock.now();
        let ticket_id = self.booking_ticket(booking_id).await?;

        let mut tx = self.store.begin().await?;
        let mut ticket = tx
            .lock_ticket(ticket_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Ticket", ticket_id))?;
        let mut booking = tx
            .lock_booking(booking_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Booking", booking_id))?;

        if booking.status == BookingStatus::Confirmed {
            return Ok((ticket, None));
        }
        booking.confirm(now)?;
        ticket.mark_used(now)?;

        tx.update_booking(&booking).await?;
        tx.update_ticket(&ticket).await?;
        tx.commit().await?;
        Ok((ticket, Some(booking)))
    }

    /// Cancels an active booking: the seat goes back to the slot and the ticket
    /// returns to `issued` with its original deadline.
    pub async fn release(&self, booking_id: Uuid, reason: &str) -> CoreResult<()> {
        let event =
            retry_with_backoff(&self.retry, "release", || async move { self.try_release(booking_id, reason).await })
                .await?;

        info!("Booking {} released ({}), ticket {} is redeemable again", booking_id, reason, event.ticket_id);
        publish(self.events.as_ref(), event).await;
        Ok(())
    }

    async fn try_release(&self, booking_id: Uuid, reason: &str) -> CoreResult<LifecycleEvent> {
        let now = self.clock.now();
        let ticket_id = self.booking_ticket(booking_id).await?;

        let mut tx = self.store.begin().await?;
        let mut ticket = tx
            .lock_ticket(ticket_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Ticket", ticket_id))?;
        let mut booking = tx
            .lock_booking(booking_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Booking", booking_id))?;
        booking.release(reason.to_string(), now)?;

        let mut slot = tx
            .lock_slot(booking.slot_id)
            .await?
            .ok_or_else(|| CoreError::not_found("TimeSlot", booking.slot_id))?;
        slot.return_seat()?;

        let event = ticket.lifecycle_event(
            LifecycleEventKind::Released,
            Some(slot.id),
            Some(reason.to_string()),
            now,
        );
        ticket.release(now)?;

        tx.update_booking(&booking).await?;
        tx.update_slot(&slot).await?;
        tx.update_ticket(&ticket).await?;
        tx.commit().await?;
        Ok(event)
    }

    /// Attendance feed for makeup lessons. Only an attended lesson consumes the ticket.
    pub async fn record_attendance(&self, booking_id: Uuid, attended: bool) -> CoreResult<Ticket> {
        if attended {
            return self.confirm(booking_id).await;
        }

        let ticket_id = self.booking_ticket(booking_id).await?;
        info!("Booking {} marked absent, reservation left in place", booking_id);
        self.store
            .get_ticket(ticket_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Ticket", ticket_id))
    }

    /// Withdraws an unredeemed ticket, e.g. when the contract ends.
    ///
    /// A ticket already past its deadline is expired instead and the cancel fails.
    pub async fn cancel_ticket(&self, ticket_id: Uuid, reason: &str) -> CoreResult<Ticket> {
        if reason.trim().is_empty() {
            return Err(CoreError::ValidationError("reason is required".into()));
        }

        let outcome =
            retry_with_backoff(&self.retry, "cancel", || async move { self.try_cancel(ticket_id, reason).await })
                .await?;

        match outcome {
            CancelOutcome::Cancelled(ticket) => {
                info!("Ticket {} cancelled: {}", ticket_id, reason);
                publish(
                    self.events.as_ref(),
                    ticket.lifecycle_event(
                        LifecycleEventKind::Cancelled,
                        None,
                        Some(reason.to_string()),
                        ticket.updated_at,
                    ),
                )
                .await;
                Ok(ticket)
            }
            CancelOutcome::Expired(ticket) => {
                publish(
                    self.events.as_ref(),
                    ticket.lifecycle_event(LifecycleEventKind::Expired, None, None, ticket.updated_at),
                )
                .await;
                warn!("Cancel rejected: ticket {} expired at {}", ticket_id, ticket.expires_at);
                Err(CoreError::InvalidTransition {
                    from: TicketStatus::Expired.to_string(),
                    to: TicketStatus::Cancelled.to_string(),
                })
            }
        }
    }

    async fn try_cancel(&self, ticket_id: Uuid, reason: &str) -> CoreResult<CancelOutcome> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut ticket = tx
            .lock_ticket(ticket_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Ticket", ticket_id))?;

        if ticket.is_due(now) {
            ticket.expire(now)?;
            tx.update_ticket(&ticket).await?;
            tx.commit().await?;
            return Ok(CancelOutcome::Expired(ticket));
        }

        ticket.cancel(reason.to_string(), now)?;
        tx.update_ticket(&ticket).await?;
        tx.commit().await?;
        Ok(CancelOutcome::Cancelled(ticket))
    }

    /// Adds a slot published by the timetable. Re-registering an id returns the stored slot.
    pub async fn register_slot(&self, definition: SlotDefinition) -> CoreResult<TimeSlot> {
        let slot = definition.into_slot()?;
        let stored = self.store.register_slot(&slot).await?;
        if stored.capacity != slot.capacity {
            warn!(
                "Slot {} already registered with capacity {}, ignoring {}",
                stored.id, stored.capacity, slot.capacity
            );
        } else {
            info!("Registered slot {} ({} {} {})", stored.id, stored.brand_id, stored.date, stored.start_time);
        }
        Ok(stored)
    }

    async fn booking_ticket(&self, booking_id: Uuid) -> CoreResult<Uuid> {
        self.store
            .get_booking(booking_id)
            .await?
            .map(|b| b.ticket_id)
            .ok_or_else(|| CoreError::not_found("Booking", booking_id))
    }
}
