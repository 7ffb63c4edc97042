pub mod outbox;
pub mod upload;

pub use outbox::{
    validate_walk, ArtifactProcessingPayload, JobOutcome, OutboxEvent, OutboxStatus,
    RecordOutcomeRequest, ARTIFACT_PROCESSING_KIND,
};
pub use upload::{
    CompleteUploadResponse, IssueWriteLocationRequest, UploadRecord, UploadStatus, WriteLocation,
};
