//! Guard rules for the complaint lifecycle.
//!
//! Pending -> In progress -> Resolved | Insufficient information. Leaving
//! Pending needs a deadline, terminal statuses need a resolution text, and
//! Resolved also needs at least one image. A resolved complaint is frozen.
//! Everything here is a pure function of the stored record and the proposal;
//! persistence lives in [`crate::controller`].

use chrono::NaiveDate;
use shared::{
    domain::{Complaint, ImageUpload, Status},
    protocol::Affordances,
};

use crate::error::Rejection;

/// Field values submitted by the complaint editor form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplaintEdits {
    pub status: Status,
    pub deadline: Option<NaiveDate>,
    pub resolution_description: Option<String>,
    pub new_image: Option<ImageUpload>,
}

impl ComplaintEdits {
    /// Edits that keep every field of `current` and only move the status.
    pub fn status_only(current: &Complaint, status: Status) -> Self {
        Self {
            status,
            deadline: current.deadline,
            resolution_description: current.resolution_description.clone(),
            new_image: None,
        }
    }

    fn has_description(&self) -> bool {
        self.resolution_description
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty())
    }
}

/// An accepted edit set, ready for the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedRecord {
    pub edits: ComplaintEdits,
    /// First move into a terminal status: the store stamps the resolution
    /// time and computes `resolved_on_time`.
    pub entered_terminal: bool,
}

pub fn is_locked(current: &Complaint) -> bool {
    current.status == Status::Resolved
}

pub fn request_status_change(current: &Complaint, proposed: Status) -> Result<Status, Rejection> {
    if is_locked(current) {
        return Err(Rejection::RecordLocked);
    }
    if proposed == current.status {
        return Err(Rejection::StatusUnchanged(proposed));
    }
    if proposed.requires_deadline() && current.deadline.is_none() {
        return Err(Rejection::DeadlineRequired);
    }
    Ok(proposed)
}

pub fn request_save(current: &Complaint, edits: ComplaintEdits) -> Result<SavedRecord, Rejection> {
    if is_locked(current) {
        return Err(Rejection::RecordLocked);
    }
    if edits.status.requires_deadline() && edits.deadline.is_none() {
        return Err(Rejection::DeadlineRequired);
    }
    if edits.status.requires_description() && !edits.has_description() {
        return Err(Rejection::DescriptionRequired);
    }
    if edits.status.requires_image()
        && edits.new_image.is_none()
        && !current.has_resolution_image()
    {
        return Err(Rejection::ImageRequired);
    }

    let entered_terminal = edits.status.is_terminal() && !current.status.is_terminal();
    Ok(SavedRecord {
        edits,
        entered_terminal,
    })
}

/// Whether the citizen-facing answer may be sent for the stored record.
pub fn is_response_dispatch_eligible(current: &Complaint) -> bool {
    current.status.is_terminal()
        && current.has_resolution_description()
        && (!current.status.requires_image() || current.has_resolution_image())
        && !current.response_sent
}

pub fn affordances(current: &Complaint) -> Affordances {
    let locked = is_locked(current);
    Affordances {
        locked,
        can_edit_status: !locked,
        can_edit_deadline: !locked,
        can_edit_description: !locked,
        can_upload_image: !locked,
        can_send_response: is_response_dispatch_eligible(current),
    }
}

#[cfg(test)]
#[path = "tests/rules_tests.rs"]
mod tests;
