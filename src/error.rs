//! Structured problem descriptions for API callers and transport-failure types.

use thiserror::Error;

/// Error categories surfaced to API callers, mirroring the NGSI-LD problem types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemKind {
    BadRequestData,
    AlreadyExists,
    ResourceNotFound,
    OperationNotSupported,
    InternalError,
}

impl ProblemKind {
    pub fn type_uri(&self) -> &'static str {
        match self {
            ProblemKind::BadRequestData => "https://uri.etsi.org/ngsi-ld/errors/BadRequestData",
            ProblemKind::AlreadyExists => "https://uri.etsi.org/ngsi-ld/errors/AlreadyExists",
            ProblemKind::ResourceNotFound => "https://uri.etsi.org/ngsi-ld/errors/ResourceNotFound",
            ProblemKind::OperationNotSupported => {
                "https://uri.etsi.org/ngsi-ld/errors/OperationNotSupported"
            }
            ProblemKind::InternalError => "https://uri.etsi.org/ngsi-ld/errors/InternalError",
        }
    }
}

/// A structured problem description: kind, title, detail and HTTP status code.
///
/// Caller/input errors are reported synchronously with one of these; transport
/// failures during notification delivery never become a `ProblemDetails` and
/// are only visible through the subscription's own counters.
#[derive(Debug, Clone, Error)]
#[error("{title}: {detail} (status code: {status})")]
pub struct ProblemDetails {
    pub kind: ProblemKind,
    pub title: String,
    pub detail: String,
    pub status: u16,
}

impl ProblemDetails {
    pub fn new(kind: ProblemKind, title: &str, detail: &str, status: u16) -> Self {
        Self {
            kind,
            title: title.to_string(),
            detail: detail.to_string(),
            status,
        }
    }

    pub fn bad_request(title: &str, detail: &str) -> Self {
        Self::new(ProblemKind::BadRequestData, title, detail, 400)
    }

    pub fn already_exists(title: &str, detail: &str) -> Self {
        Self::new(ProblemKind::AlreadyExists, title, detail, 409)
    }

    pub fn not_found(title: &str, detail: &str) -> Self {
        Self::new(ProblemKind::ResourceNotFound, title, detail, 404)
    }

    pub fn not_supported(title: &str, detail: &str) -> Self {
        Self::new(ProblemKind::OperationNotSupported, title, detail, 501)
    }

    pub fn internal(title: &str, detail: &str) -> Self {
        Self::new(ProblemKind::InternalError, title, detail, 500)
    }
}

/// Failure of one outbound delivery or federation request.
///
/// Recorded in counters and logs; never retried at this layer and never
/// surfaced to the entity-mutation caller.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    #[error("unexpected response status {0}")]
    Status(u16),
    #[error("mqtt publish failed: {0}")]
    Publish(String),
}

#[cfg(test)]
mod tests {
    use super::{ProblemDetails, ProblemKind};

    #[test]
    fn problem_details_carry_kind_title_detail_and_status() {
        let pd = ProblemDetails::already_exists("Subscription already exists", "urn:sub:1");
        assert_eq!(pd.kind, ProblemKind::AlreadyExists);
        assert_eq!(pd.status, 409);
        assert!(pd.to_string().contains("urn:sub:1"));
    }

    #[test]
    fn problem_kind_maps_to_ngsild_error_type_uri() {
        assert!(ProblemKind::BadRequestData.type_uri().ends_with("BadRequestData"));
        assert!(ProblemKind::InternalError.type_uri().ends_with("InternalError"));
    }
}
