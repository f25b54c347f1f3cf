use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use lifecycle::{ComplaintStore, ComplaintUpdate, StoreError};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, QueryBuilder, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::{
    domain::{
        Complaint, ComplaintId, ImageId, ImageUpload, NewComplaint, OfficeId, ResolutionImage,
        Status,
    },
    protocol::{StatusCount, StatusSummary},
};

const COMPLAINT_COLUMNS: &str = "id, protocolo, categoria, descricao, endereco, bairro, nome_cidadao, telefone, gabinete_id, status, prazo_estimado, descricao_resolvido, resolvido_no_prazo, resolvido_em, resposta_enviada, created_at, updated_at";

const DEFAULT_LIST_LIMIT: u32 = 100;

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
    /// Offset of the municipality's civil day, used to judge deadlines.
    local_offset: FixedOffset,
}

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub image_id: ImageId,
    pub complaint_id: ComplaintId,
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Listing criteria. `office_scope: Some(None)` is an office user without an
/// office and matches nothing. A zero `limit` means the default page size.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplaintFilter {
    pub office_scope: Option<Option<OfficeId>>,
    pub status: Option<Status>,
    pub limit: u32,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            local_offset: Utc.fix(),
        })
    }

    /// Judges `resolved_on_time` against the calendar day at `offset`
    /// instead of the UTC day.
    pub fn with_local_offset(mut self, offset: FixedOffset) -> Self {
        self.local_offset = offset;
        self
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Intake: every complaint starts out `Pendente` with no deadline.
    pub async fn insert_complaint(&self, new: &NewComplaint) -> Result<Complaint> {
        let now = Utc::now();
        let rec = sqlx::query(
            "INSERT INTO problemas (protocolo, categoria, descricao, endereco, bairro, nome_cidadao, telefone, gabinete_id, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(new.protocol.trim())
        .bind(new.category.trim())
        .bind(new.description.trim())
        .bind(new.address.as_deref())
        .bind(new.neighborhood.as_deref())
        .bind(new.citizen_name.trim())
        .bind(new.citizen_phone.as_deref())
        .bind(new.office_id.map(|id| id.0))
        .bind(Status::Pending.label())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to insert complaint '{}'", new.protocol))?;
        let id = ComplaintId(rec.get::<i64, _>(0));

        self.load_complaint(id)
            .await?
            .ok_or_else(|| anyhow!("complaint {id} vanished after insert"))
    }

    pub async fn load_complaint(&self, id: ComplaintId) -> Result<Option<Complaint>> {
        let row = sqlx::query(&format!(
            "SELECT {COMPLAINT_COLUMNS} FROM problemas WHERE id = ?"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let images = self.list_images(id).await?;
        Ok(Some(complaint_from_row(&row, images)?))
    }

    pub async fn list_complaints(&self, filter: ComplaintFilter) -> Result<Vec<Complaint>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {COMPLAINT_COLUMNS} FROM problemas WHERE 1 = 1"
        ));
        match filter.office_scope {
            None => {}
            Some(None) => return Ok(Vec::new()),
            Some(Some(office_id)) => {
                query.push(" AND gabinete_id = ").push_bind(office_id.0);
            }
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.label());
        }
        let limit = if filter.limit == 0 {
            DEFAULT_LIST_LIMIT
        } else {
            filter.limit
        };
        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(limit));

        let rows = query.build().fetch_all(&self.pool).await?;
        let mut complaints = Vec::with_capacity(rows.len());
        for row in rows {
            let id = ComplaintId(row.try_get::<i64, _>("id")?);
            let images = self.list_images(id).await?;
            complaints.push(complaint_from_row(&row, images)?);
        }
        Ok(complaints)
    }

    /// Writes one accepted edit set in a single transaction and returns the
    /// refreshed row, or `None` when the complaint does not exist.
    pub async fn apply_update(
        &self,
        id: ComplaintId,
        update: ComplaintUpdate,
    ) -> Result<Option<Complaint>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE problemas
             SET status = COALESCE(?, status),
                 prazo_estimado = COALESCE(?, prazo_estimado),
                 descricao_resolvido = COALESCE(?, descricao_resolvido),
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(update.status.map(Status::label))
        .bind(update.deadline)
        .bind(update.resolution_description.as_deref())
        .bind(now)
        .bind(id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Ok(None);
        }

        if let Some(image) = &update.new_image {
            insert_image(&mut tx, id, image, now).await?;
        }

        if update.entered_terminal {
            let deadline: Option<NaiveDate> =
                sqlx::query_scalar("SELECT prazo_estimado FROM problemas WHERE id = ?")
                    .bind(id.0)
                    .fetch_one(&mut *tx)
                    .await?;
            let today = now.with_timezone(&self.local_offset).date_naive();
            let on_time = deadline.map(|deadline| today <= deadline);
            sqlx::query(
                "UPDATE problemas SET resolvido_em = ?, resolvido_no_prazo = ? WHERE id = ?",
            )
            .bind(now)
            .bind(on_time)
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
            debug!(complaint_id = %id, ?on_time, "complaint closed");
        } else if update.status.is_some_and(|status| !status.is_terminal()) {
            // Reopened: the previous closing no longer counts.
            sqlx::query(
                "UPDATE problemas SET resolvido_em = NULL, resolvido_no_prazo = NULL WHERE id = ?",
            )
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.load_complaint(id).await
    }

    pub async fn set_response_sent(&self, id: ComplaintId) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE problemas
             SET resposta_enviada = 1, updated_at = ?
             WHERE id = ? AND resposta_enviada = 0",
        )
        .bind(Utc::now())
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn list_images(&self, id: ComplaintId) -> Result<Vec<ResolutionImage>> {
        let rows = sqlx::query(
            "SELECT id, filename, mime_type, size_bytes
             FROM problema_imagens
             WHERE problema_id = ?
             ORDER BY id ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| ResolutionImage {
                image_id: ImageId(r.get::<i64, _>(0)),
                filename: r.get::<String, _>(1),
                mime_type: r.get::<Option<String>, _>(2),
                size_bytes: r.get::<i64, _>(3).max(0) as u64,
            })
            .collect())
    }

    pub async fn load_image(&self, image_id: ImageId) -> Result<Option<StoredImage>> {
        let row = sqlx::query(
            "SELECT id, problema_id, filename, mime_type, bytes FROM problema_imagens WHERE id = ?",
        )
        .bind(image_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredImage {
            image_id: ImageId(r.get::<i64, _>(0)),
            complaint_id: ComplaintId(r.get::<i64, _>(1)),
            filename: r.get::<String, _>(2),
            mime_type: r.get::<Option<String>, _>(3),
            bytes: r.get::<Vec<u8>, _>(4),
        }))
    }

    pub async fn status_summary(
        &self,
        office_scope: Option<Option<OfficeId>>,
    ) -> Result<StatusSummary> {
        let office_id = match office_scope {
            None => None,
            Some(None) => return Ok(empty_summary(None)),
            Some(Some(office_id)) => Some(office_id),
        };

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT status,
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN resolvido_no_prazo = 1 AND status IN ('Resolvido', 'Informações Insuficientes') THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN resolvido_no_prazo = 0 AND status IN ('Resolvido', 'Informações Insuficientes') THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(resposta_enviada), 0)
             FROM problemas",
        );
        if let Some(office_id) = office_id {
            query.push(" WHERE gabinete_id = ").push_bind(office_id.0);
        }
        query.push(" GROUP BY status");
        let rows = query.build().fetch_all(&self.pool).await?;

        let mut summary = empty_summary(office_id);
        for row in rows {
            let label = row.get::<String, _>(0);
            let status = Status::from_label(&label)
                .ok_or_else(|| anyhow!("unknown complaint status '{label}'"))?;
            let count = row.get::<i64, _>(1).max(0) as u64;
            if let Some(entry) = summary.by_status.iter_mut().find(|c| c.status == status) {
                entry.count = count;
            }
            summary.total += count;
            summary.resolved_on_time += row.get::<i64, _>(2).max(0) as u64;
            summary.resolved_late += row.get::<i64, _>(3).max(0) as u64;
            summary.responses_sent += row.get::<i64, _>(4).max(0) as u64;
        }
        Ok(summary)
    }
}

async fn insert_image(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    id: ComplaintId,
    image: &ImageUpload,
    now: DateTime<Utc>,
) -> Result<ImageId> {
    let size_bytes = i64::try_from(image.bytes.len()).unwrap_or(i64::MAX);
    let rec = sqlx::query(
        "INSERT INTO problema_imagens (problema_id, filename, mime_type, size_bytes, bytes, created_at)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(id.0)
    .bind(&image.filename)
    .bind(image.mime_type.as_deref())
    .bind(size_bytes)
    .bind(&image.bytes)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;
    Ok(ImageId(rec.get::<i64, _>(0)))
}

/// Whether an intake failed because the protocol is already registered.
pub fn is_duplicate_protocol(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|err| err.as_database_error())
        .is_some_and(|db| db.is_unique_violation())
}

fn empty_summary(office_id: Option<OfficeId>) -> StatusSummary {
    StatusSummary {
        office_id,
        total: 0,
        by_status: Status::ALL
            .into_iter()
            .map(|status| StatusCount { status, count: 0 })
            .collect(),
        resolved_on_time: 0,
        resolved_late: 0,
        responses_sent: 0,
    }
}

fn complaint_from_row(row: &SqliteRow, resolution_images: Vec<ResolutionImage>) -> Result<Complaint> {
    let label: String = row.try_get("status")?;
    let status =
        Status::from_label(&label).ok_or_else(|| anyhow!("unknown complaint status '{label}'"))?;

    Ok(Complaint {
        id: ComplaintId(row.try_get("id")?),
        protocol: row.try_get("protocolo")?,
        category: row.try_get("categoria")?,
        description: row.try_get("descricao")?,
        address: row.try_get("endereco")?,
        neighborhood: row.try_get("bairro")?,
        citizen_name: row.try_get("nome_cidadao")?,
        citizen_phone: row.try_get("telefone")?,
        office_id: row.try_get::<Option<i64>, _>("gabinete_id")?.map(OfficeId),
        status,
        deadline: row.try_get("prazo_estimado")?,
        resolution_description: row.try_get("descricao_resolvido")?,
        resolution_images,
        resolved_on_time: row.try_get("resolvido_no_prazo")?,
        resolved_at: row.try_get("resolvido_em")?,
        response_sent: row.try_get("resposta_enviada")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl ComplaintStore for Storage {
    async fn get(&self, id: ComplaintId) -> Result<Complaint, StoreError> {
        self.load_complaint(id)
            .await
            .map_err(StoreError::backend)?
            .ok_or(StoreError::NotFound(id))
    }

    async fn update(
        &self,
        id: ComplaintId,
        update: ComplaintUpdate,
    ) -> Result<Complaint, StoreError> {
        self.apply_update(id, update)
            .await
            .map_err(StoreError::backend)?
            .ok_or(StoreError::NotFound(id))
    }

    async fn mark_response_sent(&self, id: ComplaintId) -> Result<bool, StoreError> {
        self.set_response_sent(id)
            .await
            .map_err(StoreError::backend)
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
