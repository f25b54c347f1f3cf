use std::sync::Arc;

use shared::domain::{Complaint, ComplaintId, Status};
use tracing::{debug, info};

use crate::{
    dispatch::{dispatch_response, DispatchAck, NotificationDispatcher},
    error::Rejection,
    rules::{request_save, request_status_change, ComplaintEdits},
    store::{ComplaintStore, ComplaintUpdate},
};

/// Applies the lifecycle rules against a store and an outbound channel.
///
/// Each call loads the current row, decides, and writes at most once. Nothing
/// is retried: a rejection goes straight back to the caller.
pub struct ComplaintController<S: ComplaintStore> {
    store: S,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl<S: ComplaintStore> ComplaintController<S> {
    pub fn new(store: S, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn load(&self, id: ComplaintId) -> Result<Complaint, Rejection> {
        Ok(self.store.get(id).await?)
    }

    /// Quick status switch from the complaint list.
    ///
    /// Moving into a terminal status also runs the form rules against the
    /// stored description and images, so a row can never be resolved without
    /// them.
    pub async fn change_status(
        &self,
        id: ComplaintId,
        proposed: Status,
    ) -> Result<Complaint, Rejection> {
        let current = self.store.get(id).await?;
        let status = request_status_change(&current, proposed)?;

        let update = if status.is_terminal() {
            ComplaintUpdate::from(request_save(
                &current,
                ComplaintEdits::status_only(&current, status),
            )?)
        } else {
            ComplaintUpdate::status(status, false)
        };

        let updated = self.store.update(id, update).await?;
        info!(
            complaint_id = %id,
            from = %current.status,
            to = %updated.status,
            "complaint status changed"
        );
        Ok(updated)
    }

    /// Full editor save.
    pub async fn save(&self, id: ComplaintId, edits: ComplaintEdits) -> Result<Complaint, Rejection> {
        let current = self.store.get(id).await?;
        let saved = request_save(&current, edits)?;
        let entered_terminal = saved.entered_terminal;
        let updated = self.store.update(id, saved.into()).await?;
        info!(
            complaint_id = %id,
            status = %updated.status,
            entered_terminal,
            "complaint saved"
        );
        Ok(updated)
    }

    /// Sends the citizen answer for one explicit user action.
    pub async fn send_response(&self, id: ComplaintId) -> Result<(DispatchAck, Complaint), Rejection> {
        let current = self.store.get(id).await?;
        let ack = dispatch_response(&current, self.dispatcher.as_ref()).await?;

        if !self.store.mark_response_sent(id).await? {
            // Another session flipped the flag while this dispatch was in flight.
            debug!(complaint_id = %id, "response_sent was already set");
        }
        let updated = self.store.get(id).await?;
        Ok((ack, updated))
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
