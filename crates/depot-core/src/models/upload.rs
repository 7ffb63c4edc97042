use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum UploadStatus {
    Pending,
    Uploaded,
    Failed,
    Rejected,
    Deduplicated,
    DeletedByUser,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploaded => "uploaded",
            UploadStatus::Failed => "failed",
            UploadStatus::Rejected => "rejected",
            UploadStatus::Deduplicated => "deduplicated",
            UploadStatus::DeletedByUser => "deleted-by-user",
        }
    }

    /// A canonical record in one of these states may be superseded by a new upload
    /// of the same content.
    pub fn is_replaceable(&self) -> bool {
        matches!(
            self,
            UploadStatus::Failed | UploadStatus::Rejected | UploadStatus::DeletedByUser
        )
    }

    /// A canonical record in one of these states turns later uploads of the same
    /// content into duplicates.
    pub fn is_blocking(&self) -> bool {
        matches!(self, UploadStatus::Pending | UploadStatus::Uploaded)
    }

    /// Records in these states may be deleted by their owner.
    pub fn is_user_deletable(&self) -> bool {
        matches!(self, UploadStatus::Uploaded | UploadStatus::Deduplicated)
    }
}

impl Display for UploadStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadStatus::Pending),
            "uploaded" => Ok(UploadStatus::Uploaded),
            "failed" => Ok(UploadStatus::Failed),
            "rejected" => Ok(UploadStatus::Rejected),
            "deduplicated" => Ok(UploadStatus::Deduplicated),
            "deleted-by-user" => Ok(UploadStatus::DeletedByUser),
            _ => Err(anyhow::anyhow!("Invalid upload status: {}", s)),
        }
    }
}

/// One client-initiated upload attempt.
///
/// While `status` is `pending`, `storage_key` points into the quarantine namespace.
/// Promotion rewrites it to the healthy key; after that only `is_canonical` may change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadRecord {
    pub upload_id: Uuid,
    pub owner_id: Uuid,
    pub storage_key: String,
    pub bucket: String,
    pub original_filename: String,
    pub declared_content_type: String,
    pub status: UploadStatus,
    pub content_hash: Option<String>,
    pub is_canonical: bool,
    pub duplicate_of: Option<Uuid>,
    pub size_bytes: Option<i64>,
    pub write_window_expiry: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for UploadRecord {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(UploadRecord {
            upload_id: row.try_get("upload_id")?,
            owner_id: row.try_get("owner_id")?,
            storage_key: row.try_get("storage_key")?,
            bucket: row.try_get("bucket")?,
            original_filename: row.try_get("original_filename")?,
            declared_content_type: row.try_get("declared_content_type")?,
            status: row
                .try_get::<String, _>("status")?
                .parse()
                .map_err(|e| sqlx::Error::Decode(format!("Failed to parse status: {}", e).into()))?,
            content_hash: row.try_get("content_hash")?,
            is_canonical: row.try_get("is_canonical")?,
            duplicate_of: row.try_get("duplicate_of")?,
            size_bytes: row.try_get("size_bytes")?,
            write_window_expiry: row.try_get("write_window_expiry")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl UploadRecord {
    /// Build a fresh `pending` record for a newly issued write location.
    pub fn new_pending(
        upload_id: Uuid,
        owner_id: Uuid,
        bucket: String,
        quarantine_key: String,
        original_filename: String,
        declared_content_type: String,
        write_window_expiry: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            upload_id,
            owner_id,
            storage_key: quarantine_key,
            bucket,
            original_filename,
            declared_content_type,
            status: UploadStatus::Pending,
            content_hash: None,
            is_canonical: false,
            duplicate_of: None,
            size_bytes: None,
            write_window_expiry,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == UploadStatus::Pending
    }

    pub fn is_write_window_open(&self, now: DateTime<Utc>) -> bool {
        self.write_window_expiry > now
    }
}

/// Request to open a write location in the quarantine namespace
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IssueWriteLocationRequest {
    pub owner_id: Uuid,
    /// Original filename
    #[validate(length(
        min = 1,
        max = 255,
        message = "Filename must be between 1 and 255 characters"
    ))]
    pub filename: String,
    /// Declared content type (MIME type). Informational only.
    #[validate(length(
        min = 3,
        max = 255,
        message = "Content type must be between 3 and 255 characters"
    ))]
    pub content_type: String,
}

/// Time-boxed write target handed back to the client
#[derive(Debug, Clone, Serialize)]
pub struct WriteLocation {
    pub upload_id: Uuid,
    /// URL the client writes the bytes to (presigned PUT for S3)
    pub write_target: String,
    pub storage_key: String,
    pub expires_at: DateTime<Utc>,
}

/// Response after completing an upload
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompleteUploadResponse {
    pub upload_id: Uuid,
    pub status: UploadStatus,
    pub deduplicated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<Uuid>,
    /// First processing job created for this upload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}
