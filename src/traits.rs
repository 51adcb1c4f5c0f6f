use crate::harvest::formats::ResponseDocument;
use crate::harvest::request::SubRequest;
use crate::model::EastingNorthing;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Service returned an exception report: {0}")]
    ServiceException(String),
    #[error("Failed to parse response: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReferencingError {
    #[error("Unknown reference system: {0}")]
    UnknownSrs(String),
    #[error("Transformation from {from} failed: {reason}")]
    Transform { from: String, reason: String },
}

/// Turns an abstract sub-request into a network call.
///
/// Implementations own the wire: they send the request and hand back the
/// parsed response document.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, request: SubRequest) -> Result<ResponseDocument, ExecutionError>;
}

/// Coordinate reference system helper used to normalize station locations.
pub trait ReferencingHelper: Send + Sync {
    /// Extracts a canonical `EPSG:<code>` identifier from an SRS name or URN.
    fn extract_code(&self, srs_name: &str) -> Result<String, ReferencingError>;

    /// Reprojects `point` from `from_code` into the canonical system.
    fn transform(
        &self,
        point: EastingNorthing,
        from_code: &str,
    ) -> Result<EastingNorthing, ReferencingError>;

    /// Code of the canonical reference system.
    fn canonical_code(&self) -> &str {
        "EPSG:4326"
    }
}
