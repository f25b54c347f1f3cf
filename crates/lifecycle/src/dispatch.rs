use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::domain::{Complaint, ComplaintId, Status};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{error::Rejection, rules::is_response_dispatch_eligible};

/// Body handed to the messaging channel for every recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub complaint_id: ComplaintId,
    pub protocol: String,
    pub status: Status,
    pub citizen_name: String,
    pub resolution_description: String,
    pub message: String,
}

impl ResponsePayload {
    pub fn for_complaint(complaint: &Complaint) -> Self {
        let resolution_description = complaint
            .resolution_description
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_string();
        let headline = match complaint.status {
            Status::Resolved => "foi resolvida",
            Status::InsufficientInformation => {
                "não pôde ser concluída por falta de informações"
            }
            Status::Pending | Status::InProgress => "foi atualizada",
        };
        let message = format!(
            "Olá, {}! Sua solicitação de protocolo {} {}.\n\n{}",
            complaint.citizen_name.trim(),
            complaint.protocol,
            headline,
            resolution_description
        );

        Self {
            complaint_id: complaint.id,
            protocol: complaint.protocol.clone(),
            status: complaint.status,
            citizen_name: complaint.citizen_name.clone(),
            resolution_description,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum RecipientOutcome {
    Delivered,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientResult {
    pub recipient: String,
    pub outcome: RecipientOutcome,
}

/// Per-recipient outcome of one batch send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub batch_id: Uuid,
    pub results: Vec<RecipientResult>,
}

impl DispatchReport {
    pub fn new(results: Vec<RecipientResult>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            results,
        }
    }

    pub fn delivered(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|result| result.outcome == RecipientOutcome::Delivered)
            .map(|result| result.recipient.clone())
            .collect()
    }

    pub fn undelivered(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|result| result.outcome != RecipientOutcome::Delivered)
            .map(|result| result.recipient.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("notification webhook is not configured")]
    NotConfigured,
    #[error("notification transport failed: {0}")]
    Transport(String),
}

/// Outbound channel for citizen-facing answers.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(
        &self,
        recipients: &[String],
        payload: &ResponsePayload,
    ) -> Result<DispatchReport, DispatchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchAck {
    pub complaint_id: ComplaintId,
    pub report: DispatchReport,
}

pub fn recipients_for(complaint: &Complaint) -> Vec<String> {
    complaint
        .citizen_phone
        .iter()
        .map(|phone| phone.trim().to_string())
        .filter(|phone| !phone.is_empty())
        .collect()
}

/// Sends the answer for an eligible complaint exactly once per call.
///
/// Succeeds when at least one recipient was reached; the ack keeps the
/// per-recipient outcomes so undelivered numbers can be reported.
pub async fn dispatch_response(
    current: &Complaint,
    dispatcher: &dyn NotificationDispatcher,
) -> Result<DispatchAck, Rejection> {
    if !is_response_dispatch_eligible(current) {
        return Err(Rejection::NotEligible);
    }

    let recipients = recipients_for(current);
    if recipients.is_empty() {
        return Err(Rejection::DispatchFailed(
            "complaint has no phone number to answer".into(),
        ));
    }

    let payload = ResponsePayload::for_complaint(current);
    let report = dispatcher
        .send(&recipients, &payload)
        .await
        .map_err(|err| {
            warn!(complaint_id = %current.id, error = %err, "citizen response dispatch failed");
            Rejection::DispatchFailed(err.to_string())
        })?;

    let undelivered = report.undelivered();
    if undelivered.len() == report.results.len() {
        warn!(
            complaint_id = %current.id,
            recipients = recipients.len(),
            "no recipient accepted the citizen response"
        );
        return Err(Rejection::DispatchFailed(format!(
            "no recipient was reached ({})",
            undelivered.join(", ")
        )));
    }
    if !undelivered.is_empty() {
        warn!(
            complaint_id = %current.id,
            undelivered = ?undelivered,
            "citizen response partially delivered"
        );
    }

    info!(
        complaint_id = %current.id,
        batch_id = %report.batch_id,
        delivered = report.results.len() - undelivered.len(),
        "citizen response dispatched"
    );
    Ok(DispatchAck {
        complaint_id: current.id,
        report,
    })
}

#[cfg(test)]
#[path = "tests/dispatch_tests.rs"]
mod tests;
