use chrono::NaiveDate;
use furikae_core::{
    Clock, CoreError, CoreResult, EligibilityRules, EventPublisher, ExpiryPolicy, PolicyContext, PolicyTable,
    StoreError, Ticket, TicketDraft, TicketStore,
};
use furikae_shared::{AbsenceRegisteredEvent, LifecycleEventKind};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::publish;
use crate::retry::{retry_with_backoff, RetryPolicy};

/// An absence that should turn into a makeup ticket.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    pub student_id: String,
    pub contract_id: String,
    pub origin_lesson_id: String,
    pub brand_id: String,
    pub absence_date: NaiveDate,
    /// Date of the missed lesson. Taken to be `absence_date` when omitted.
    #[serde(default)]
    pub lesson_date: Option<NaiveDate>,
}

impl From<AbsenceRegisteredEvent> for IssueRequest {
    fn from(event: AbsenceRegisteredEvent) -> Self {
        Self {
            student_id: event.student_id,
            contract_id: event.contract_id,
            origin_lesson_id: event.origin_lesson_id,
            brand_id: event.brand_id,
            absence_date: event.absence_date,
            lesson_date: event.lesson_date,
        }
    }
}

impl IssueRequest {
    fn validate(&self) -> CoreResult<()> {
        let required = [
            ("studentId", &self.student_id),
            ("contractId", &self.contract_id),
            ("originLessonId", &self.origin_lesson_id),
            ("brandId", &self.brand_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(CoreError::ValidationError(format!("{} is required", field)));
            }
        }

        let lesson_date = self.lesson_date.unwrap_or(self.absence_date);
        if lesson_date > self.absence_date {
            return Err(CoreError::ValidationError(format!(
                "lesson {} on {} is after the absence date {}",
                self.origin_lesson_id, lesson_date, self.absence_date
            )));
        }
        Ok(())
    }
}

/// Turns registered absences into tickets, at most one per missed lesson.
pub struct TicketIssuer {
    store: Arc<dyn TicketStore>,
    policies: Arc<PolicyTable>,
    eligibility: Arc<EligibilityRules>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventPublisher>,
    retry: RetryPolicy,
}

impl TicketIssuer {
    pub fn new(
        store: Arc<dyn TicketStore>,
        policies: Arc<PolicyTable>,
        eligibility: Arc<EligibilityRules>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventPublisher>,
        retry: RetryPolicy,
    ) -> Self {
        Self { store, policies, eligibility, clock, events, retry }
    }

    /// Issues a ticket for the absence, or returns the one already issued for the same lesson.
    /// Store contention is retried with backoff.
    pub async fn issue(&self, request: IssueRequest) -> CoreResult<Ticket> {
        request.validate()?;
        let request = &request;
        retry_with_backoff(&self.retry, "issue", move || self.try_issue(request)).await
    }

    async fn try_issue(&self, request: &IssueRequest) -> CoreResult<Ticket> {
        if let Some(existing) = self.find_by_origin(&request.origin_lesson_id).await? {
            info!("Ticket {} already issued for lesson {}", existing.id, request.origin_lesson_id);
            return Ok(existing);
        }

        let now = self.clock.now();
        let ctx = PolicyContext {
            contract_id: &request.contract_id,
            brand_id: &request.brand_id,
            absence_date: request.absence_date,
            issued_at: now,
        };
        let policy = self.policies.policy_for(&request.contract_id);
        let expires_at = policy.expires_at(&ctx);
        if expires_at <= now {
            error!(
                "Expiry policy {} for contract {} yielded {} at issuance {}",
                policy.name(),
                request.contract_id,
                expires_at,
                now
            );
            return Err(CoreError::InvalidPolicyWindow(format!(
                "policy {} for contract {} yields expiresAt {} <= issuedAt {}",
                policy.name(),
                request.contract_id,
                expires_at.to_rfc3339(),
                now.to_rfc3339()
            )));
        }

        let ticket = Ticket::new(TicketDraft {
            product_scope: self.eligibility.scope_for(&request.brand_id),
            student_id: request.student_id.clone(),
            contract_id: request.contract_id.clone(),
            origin_lesson_id: request.origin_lesson_id.clone(),
            brand_id: request.brand_id.clone(),
            absence_date: request.absence_date,
            issued_at: now,
            expires_at,
        });

        match self.insert(&ticket).await {
            Ok(()) => {
                info!(
                    "Issued ticket {} to student {} for lesson {}, expires {}",
                    ticket.id, ticket.student_id, ticket.origin_lesson_id, ticket.expires_at
                );
                publish(self.events.as_ref(), ticket.lifecycle_event(LifecycleEventKind::Issued, None, None, now)).await;
                Ok(ticket)
            }
            // A concurrent issuance for the same lesson won the unique constraint.
            Err(CoreError::Store(StoreError::Conflict(_))) => self
                .find_by_origin(&ticket.origin_lesson_id)
                .await?
                .ok_or_else(|| CoreError::not_found("Ticket", &ticket.origin_lesson_id)),
            Err(e) => Err(e),
        }
    }

    async fn insert(&self, ticket: &Ticket) -> CoreResult<()> {
        let mut tx = self.store.begin().await?;
        if tx.lock_ticket_by_origin(&ticket.origin_lesson_id).await?.is_some() {
            return Err(StoreError::Conflict(format!(
                "origin lesson {} already has a ticket",
                ticket.origin_lesson_id
            ))
            .into());
        }
        tx.insert_ticket(ticket).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_origin(&self, origin_lesson_id: &str) -> CoreResult<Option<Ticket>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.lock_ticket_by_origin(origin_lesson_id).await?)
    }
}
