use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use lifecycle::{
    affordances, ComplaintController, ComplaintEdits, NotificationDispatcher, Rejection,
    StoreError,
};
use shared::{
    domain::{Complaint, ComplaintId, ImageId, ImageUpload, NewComplaint, Status, Viewer},
    error::{ApiError, ErrorCode},
    protocol::{
        ChangeStatusRequest, ComplaintView, ImagePayload, ResponseDispatchReceipt,
        SaveComplaintRequest, ServerEvent, StatusSummary,
    },
};
use storage::{is_duplicate_protocol, ComplaintFilter, Storage, StoredImage};
use tracing::info;

pub mod auth;

pub const MAX_IMAGE_BYTES: usize = 8 * 1024 * 1024;
const MAX_FILENAME_BYTES: usize = 180;
const MAX_LIST_LIMIT: u32 = 500;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub dispatcher: Arc<dyn NotificationDispatcher>,
    pub auth: auth::AuthConfig,
}

impl ApiContext {
    fn controller(&self) -> ComplaintController<Storage> {
        ComplaintController::new(self.storage.clone(), self.dispatcher.clone())
    }
}

pub fn view(complaint: Complaint) -> ComplaintView {
    let affordances = affordances(&complaint);
    ComplaintView {
        complaint,
        affordances,
    }
}

/// Registers a complaint handed over by the intake channel.
pub async fn intake_complaint(
    ctx: &ApiContext,
    viewer: &Viewer,
    new: NewComplaint,
) -> Result<ServerEvent, ApiError> {
    if !viewer.is_admin() {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "only administrators can register complaints",
        ));
    }
    for (field, value) in [
        ("protocol", &new.protocol),
        ("category", &new.category),
        ("description", &new.description),
        ("citizen_name", &new.citizen_name),
    ] {
        if value.trim().is_empty() {
            return Err(ApiError::new(
                ErrorCode::Validation,
                format!("{field} cannot be empty"),
            ));
        }
    }

    let complaint = ctx
        .storage
        .insert_complaint(&new)
        .await
        .map_err(|e| {
            if is_duplicate_protocol(&e) {
                ApiError::new(
                    ErrorCode::Conflict,
                    format!("protocol '{}' is already registered", new.protocol.trim()),
                )
            } else {
                internal(e)
            }
        })?;
    info!(complaint_id = %complaint.id, protocol = %complaint.protocol, "complaint registered");
    Ok(ServerEvent::ComplaintInserted { complaint })
}

pub async fn list_complaints(
    ctx: &ApiContext,
    viewer: &Viewer,
    status: Option<Status>,
    limit: u32,
) -> Result<Vec<ComplaintView>, ApiError> {
    let complaints = ctx
        .storage
        .list_complaints(ComplaintFilter {
            office_scope: viewer.office_scope(),
            status,
            limit: limit.clamp(1, MAX_LIST_LIMIT),
        })
        .await
        .map_err(internal)?;
    Ok(complaints.into_iter().map(view).collect())
}

pub async fn get_complaint(
    ctx: &ApiContext,
    viewer: &Viewer,
    id: ComplaintId,
) -> Result<ComplaintView, ApiError> {
    ensure_visible(ctx, viewer, id).await.map(view)
}

pub async fn change_status(
    ctx: &ApiContext,
    viewer: &Viewer,
    id: ComplaintId,
    req: ChangeStatusRequest,
) -> Result<ServerEvent, ApiError> {
    ensure_visible(ctx, viewer, id).await?;
    let complaint = ctx
        .controller()
        .change_status(id, req.status)
        .await
        .map_err(rejection)?;
    Ok(ServerEvent::ComplaintUpdated { complaint })
}

pub async fn save_complaint(
    ctx: &ApiContext,
    viewer: &Viewer,
    id: ComplaintId,
    req: SaveComplaintRequest,
) -> Result<ServerEvent, ApiError> {
    ensure_visible(ctx, viewer, id).await?;
    let new_image = req.image.map(decode_image).transpose()?;
    let edits = ComplaintEdits {
        status: req.status,
        deadline: req.deadline,
        resolution_description: req.resolution_description,
        new_image,
    };
    let complaint = ctx.controller().save(id, edits).await.map_err(rejection)?;
    Ok(ServerEvent::ComplaintUpdated { complaint })
}

/// One explicit "send answer" action. Never retried here.
pub async fn send_response(
    ctx: &ApiContext,
    viewer: &Viewer,
    id: ComplaintId,
) -> Result<(ResponseDispatchReceipt, ServerEvent), ApiError> {
    ensure_visible(ctx, viewer, id).await?;
    let (ack, complaint) = ctx
        .controller()
        .send_response(id)
        .await
        .map_err(rejection)?;
    let receipt = ResponseDispatchReceipt {
        complaint_id: ack.complaint_id,
        batch_id: ack.report.batch_id,
        delivered: ack.report.delivered(),
        undelivered: ack.report.undelivered(),
    };
    Ok((receipt, ServerEvent::ComplaintUpdated { complaint }))
}

pub async fn load_image(
    ctx: &ApiContext,
    viewer: &Viewer,
    id: ComplaintId,
    image_id: ImageId,
) -> Result<StoredImage, ApiError> {
    ensure_visible(ctx, viewer, id).await?;
    ctx.storage
        .load_image(image_id)
        .await
        .map_err(internal)?
        .filter(|image| image.complaint_id == id)
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "image not found"))
}

pub async fn status_summary(ctx: &ApiContext, viewer: &Viewer) -> Result<StatusSummary, ApiError> {
    ctx.storage
        .status_summary(viewer.office_scope())
        .await
        .map_err(internal)
}

async fn ensure_visible(
    ctx: &ApiContext,
    viewer: &Viewer,
    id: ComplaintId,
) -> Result<Complaint, ApiError> {
    let complaint = ctx
        .storage
        .load_complaint(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "complaint not found"))?;
    if !viewer.can_see(complaint.office_id) {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "complaint belongs to another office",
        ));
    }
    Ok(complaint)
}

fn decode_image(payload: ImagePayload) -> Result<ImageUpload, ApiError> {
    let filename = payload.filename.trim().to_string();
    if filename.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "image filename cannot be empty"));
    }
    if filename.len() > MAX_FILENAME_BYTES {
        return Err(ApiError::new(ErrorCode::Validation, "image filename is too long"));
    }
    if filename.contains('/') || filename.contains('\\') {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "image filename must not contain path separators",
        ));
    }
    // The name is echoed in a quoted Content-Disposition header.
    if filename
        .chars()
        .any(|c| matches!(c, '"' | ';') || c.is_control())
    {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "image filename contains characters that are not allowed",
        ));
    }

    let bytes = STANDARD
        .decode(payload.data_b64.as_bytes())
        .map_err(|_| ApiError::new(ErrorCode::Validation, "invalid base64 image"))?;
    if bytes.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "image cannot be empty"));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("image exceeds {MAX_IMAGE_BYTES} bytes"),
        ));
    }

    Ok(ImageUpload {
        filename,
        mime_type: payload
            .mime_type
            .map(|mime| mime.trim().to_string())
            .filter(|mime| !mime.is_empty()),
        bytes,
    })
}

pub fn rejection(err: Rejection) -> ApiError {
    let code = match &err {
        Rejection::StatusUnchanged(_)
        | Rejection::DeadlineRequired
        | Rejection::DescriptionRequired
        | Rejection::ImageRequired => ErrorCode::Validation,
        Rejection::RecordLocked | Rejection::NotEligible => ErrorCode::Conflict,
        Rejection::DispatchFailed(_) => ErrorCode::Upstream,
        Rejection::Store(StoreError::NotFound(_)) => ErrorCode::NotFound,
        Rejection::Store(StoreError::Backend(_)) => ErrorCode::Internal,
    };
    ApiError::new(code, err.to_string())
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
