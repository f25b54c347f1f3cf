use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(ComplaintId);
id_newtype!(OfficeId);
id_newtype!(UserId);
id_newtype!(ImageId);

/// Lifecycle status of a complaint. The serialized labels are the ones stored
/// in the `problemas.status` column and shown to staff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Status {
    #[default]
    #[serde(rename = "Pendente")]
    Pending,
    #[serde(rename = "Em andamento")]
    InProgress,
    #[serde(rename = "Resolvido")]
    Resolved,
    #[serde(rename = "Informações Insuficientes")]
    InsufficientInformation,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Pending,
        Status::InProgress,
        Status::Resolved,
        Status::InsufficientInformation,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Status::Pending => "Pendente",
            Status::InProgress => "Em andamento",
            Status::Resolved => "Resolvido",
            Status::InsufficientInformation => "Informações Insuficientes",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.label() == label.trim())
    }

    /// Terminal statuses close the citizen's request and unlock the response.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Resolved | Status::InsufficientInformation)
    }

    pub fn requires_deadline(self) -> bool {
        self != Status::Pending
    }

    pub fn requires_description(self) -> bool {
        self.is_terminal()
    }

    pub fn requires_image(self) -> bool {
        self == Status::Resolved
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Gabinete,
}

/// Who is looking. Passed into every read and mutation instead of being
/// looked up from a session singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub user_id: UserId,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub office_id: Option<OfficeId>,
}

impl Viewer {
    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
            office_id: None,
        }
    }

    pub fn office(user_id: UserId, office_id: OfficeId) -> Self {
        Self {
            user_id,
            role: Role::Gabinete,
            office_id: Some(office_id),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn can_see(&self, complaint_office: Option<OfficeId>) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Gabinete => self.office_id.is_some() && self.office_id == complaint_office,
        }
    }

    /// Office restriction to apply when listing. `None` means unrestricted.
    pub fn office_scope(&self) -> Option<Option<OfficeId>> {
        match self.role {
            Role::Admin => None,
            Role::Gabinete => Some(self.office_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionImage {
    pub image_id: ImageId,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complaint {
    pub id: ComplaintId,
    pub protocol: String,
    pub category: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighborhood: Option<String>,
    pub citizen_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citizen_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub office_id: Option<OfficeId>,
    pub status: Status,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub resolution_description: Option<String>,
    #[serde(default)]
    pub resolution_images: Vec<ResolutionImage>,
    #[serde(default)]
    pub resolved_on_time: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub response_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Complaint {
    pub fn has_resolution_description(&self) -> bool {
        self.resolution_description
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty())
    }

    pub fn has_resolution_image(&self) -> bool {
        !self.resolution_images.is_empty()
    }
}

/// Intake record as delivered by the citizen-facing channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewComplaint {
    pub protocol: String,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub neighborhood: Option<String>,
    pub citizen_name: String,
    #[serde(default)]
    pub citizen_phone: Option<String>,
    #[serde(default)]
    pub office_id: Option<OfficeId>,
}

/// Image uploaded together with a form save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
