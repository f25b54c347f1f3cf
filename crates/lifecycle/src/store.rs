use async_trait::async_trait;
use chrono::NaiveDate;
use shared::domain::{Complaint, ComplaintId, ImageUpload, Status};

use crate::{error::StoreError, rules::SavedRecord};

/// Partial update of a complaint row. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComplaintUpdate {
    pub status: Option<Status>,
    pub deadline: Option<NaiveDate>,
    pub resolution_description: Option<String>,
    pub new_image: Option<ImageUpload>,
    /// Stamp `resolved_at` and compute `resolved_on_time` in this update.
    pub entered_terminal: bool,
}

impl ComplaintUpdate {
    pub fn status(status: Status, entered_terminal: bool) -> Self {
        Self {
            status: Some(status),
            entered_terminal,
            ..Self::default()
        }
    }
}

impl From<SavedRecord> for ComplaintUpdate {
    fn from(saved: SavedRecord) -> Self {
        let edits = saved.edits;
        Self {
            status: Some(edits.status),
            deadline: edits.deadline,
            resolution_description: edits
                .resolution_description
                .map(|text| text.trim().to_string()),
            new_image: edits.new_image,
            entered_terminal: saved.entered_terminal,
        }
    }
}

/// Durable home of complaint rows.
///
/// Implementations bump `updated_at` on every successful `update`.
#[async_trait]
pub trait ComplaintStore: Send + Sync {
    async fn get(&self, id: ComplaintId) -> Result<Complaint, StoreError>;
    async fn update(&self, id: ComplaintId, update: ComplaintUpdate)
        -> Result<Complaint, StoreError>;
    /// Flips `response_sent` from false to true. Returns `false` when the flag
    /// was already set, leaving the row untouched.
    async fn mark_response_sent(&self, id: ComplaintId) -> Result<bool, StoreError>;
}
