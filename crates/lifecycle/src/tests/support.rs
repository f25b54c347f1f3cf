use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use shared::domain::{
    Complaint, ComplaintId, ImageId, OfficeId, ResolutionImage, Status,
};

use crate::{
    dispatch::{
        DispatchError, DispatchReport, NotificationDispatcher, RecipientOutcome, RecipientResult,
        ResponsePayload,
    },
    error::StoreError,
    store::{ComplaintStore, ComplaintUpdate},
};

pub fn deadline() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 5, 20).expect("date")
}

pub fn complaint(status: Status) -> Complaint {
    let created = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();
    Complaint {
        id: ComplaintId(1),
        protocol: "2025-0001".into(),
        category: "Iluminação pública".into(),
        description: "Poste apagado na esquina".into(),
        address: Some("Rua das Flores, 10".into()),
        neighborhood: Some("Centro".into()),
        citizen_name: "Maria".into(),
        citizen_phone: Some("5511999990000".into()),
        office_id: Some(OfficeId(7)),
        status,
        deadline: None,
        resolution_description: None,
        resolution_images: Vec::new(),
        resolved_on_time: None,
        resolved_at: None,
        response_sent: false,
        created_at: created,
        updated_at: created,
    }
}

pub fn image(id: i64) -> ResolutionImage {
    ResolutionImage {
        image_id: ImageId(id),
        filename: format!("foto-{id}.jpg"),
        mime_type: Some("image/jpeg".into()),
        size_bytes: 4,
    }
}

/// Row store kept in memory; mirrors what the SQLite store does on update.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<ComplaintId, Complaint>>,
    next_image: Mutex<i64>,
}

impl MemoryStore {
    pub fn with(complaint: Complaint) -> Self {
        let store = Self::default();
        store
            .rows
            .lock()
            .unwrap()
            .insert(complaint.id, complaint);
        store
    }

    pub fn snapshot(&self, id: ComplaintId) -> Complaint {
        self.rows.lock().unwrap()[&id].clone()
    }
}

#[async_trait]
impl ComplaintStore for MemoryStore {
    async fn get(&self, id: ComplaintId) -> Result<Complaint, StoreError> {
        self.rows
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn update(
        &self,
        id: ComplaintId,
        update: ComplaintUpdate,
    ) -> Result<Complaint, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if let Some(status) = update.status {
            row.status = status;
        }
        if let Some(deadline) = update.deadline {
            row.deadline = Some(deadline);
        }
        if let Some(text) = update.resolution_description {
            row.resolution_description = Some(text);
        }
        if let Some(upload) = update.new_image {
            let mut next = self.next_image.lock().unwrap();
            *next += 1;
            row.resolution_images.push(ResolutionImage {
                image_id: ImageId(*next),
                filename: upload.filename,
                mime_type: upload.mime_type,
                size_bytes: upload.bytes.len() as u64,
            });
        }
        if update.entered_terminal {
            let now = Utc::now();
            row.resolved_at = Some(now);
            row.resolved_on_time = row.deadline.map(|deadline| now.date_naive() <= deadline);
        }
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn mark_response_sent(&self, id: ComplaintId) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if row.response_sent {
            return Ok(false);
        }
        row.response_sent = true;
        Ok(true)
    }
}

/// Dispatcher that records every batch and answers with a scripted outcome.
pub struct RecordingDispatcher {
    pub sent: Mutex<Vec<(Vec<String>, ResponsePayload)>>,
    outcome: Result<RecipientOutcome, DispatchError>,
    /// Extra contact appended to every batch and always reported as failed.
    failing_extra: Option<String>,
}

impl RecordingDispatcher {
    pub fn delivering() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            outcome: Ok(RecipientOutcome::Delivered),
            failing_extra: None,
        }
    }

    /// Delivers to the complaint's numbers but fails an extra contact.
    pub fn partially_delivering(extra: &str) -> Self {
        Self {
            failing_extra: Some(extra.into()),
            ..Self::delivering()
        }
    }

    pub fn rejecting(reason: &str) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            outcome: Ok(RecipientOutcome::Failed(reason.into())),
            failing_extra: None,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            outcome: Err(DispatchError::Transport("connection refused".into())),
            failing_extra: None,
        }
    }

    pub fn batches(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send(
        &self,
        recipients: &[String],
        payload: &ResponsePayload,
    ) -> Result<DispatchReport, DispatchError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipients.to_vec(), payload.clone()));
        let outcome = self.outcome.clone()?;
        let mut results: Vec<RecipientResult> = recipients
            .iter()
            .map(|recipient| RecipientResult {
                recipient: recipient.clone(),
                outcome: outcome.clone(),
            })
            .collect();
        if let Some(extra) = &self.failing_extra {
            results.push(RecipientResult {
                recipient: extra.clone(),
                outcome: RecipientOutcome::Failed("HTTP 404".into()),
            });
        }
        Ok(DispatchReport::new(results))
    }
}
