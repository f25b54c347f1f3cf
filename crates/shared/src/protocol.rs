use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    domain::{Complaint, ComplaintId, OfficeId, Status},
    error::ApiError,
};

/// Which editing controls are live for a complaint, derived from its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affordances {
    pub locked: bool,
    pub can_edit_status: bool,
    pub can_edit_deadline: bool,
    pub can_edit_description: bool,
    pub can_upload_image: bool,
    pub can_send_response: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplaintView {
    pub complaint: Complaint,
    pub affordances: Affordances,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePayload {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub data_b64: String,
}

/// Full form submission from the complaint editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveComplaintRequest {
    pub status: Status,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub resolution_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImagePayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseDispatchReceipt {
    pub complaint_id: ComplaintId,
    pub batch_id: Uuid,
    pub delivered: Vec<String>,
    pub undelivered: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: Status,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub office_id: Option<OfficeId>,
    pub total: u64,
    pub by_status: Vec<StatusCount>,
    pub resolved_on_time: u64,
    pub resolved_late: u64,
    pub responses_sent: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    ComplaintInserted { complaint: Complaint },
    ComplaintUpdated { complaint: Complaint },
    Error(ApiError),
}

impl ServerEvent {
    pub fn complaint(&self) -> Option<&Complaint> {
        match self {
            ServerEvent::ComplaintInserted { complaint }
            | ServerEvent::ComplaintUpdated { complaint } => Some(complaint),
            ServerEvent::Error(_) => None,
        }
    }
}
