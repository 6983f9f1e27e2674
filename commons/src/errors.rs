use actix_web::http;
use actix_web::HttpResponse;
use prometheus::{IntCounterVec, Opts, Registry};

/// Convenience alias for fallible operations.
pub type Fallible<T> = anyhow::Result<T>;

lazy_static! {
    static ref INCOMING_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "incoming_errors_total",
            "Total number of rejected incoming requests, by kind"
        ),
        &["kind"]
    )
    .expect("could not create incoming_errors_total counter");
}

/// Register relevant metrics to a prometheus registry.
pub fn register_metrics(registry: &Registry) -> Fallible<()> {
    registry.register(Box::new(INCOMING_ERRORS_TOTAL.clone()))?;
    Ok(())
}

/// Request-processing errors exposed on the HTTP surface.
#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum ExecutionError {
    /// Language tag outside the supported set.
    #[error("unsupported language '{0}'")]
    UnsupportedLanguage(String),
    /// Source exceeding the configured byte budget.
    #[error("source is {0} bytes, limit is {1}")]
    CodeTooLarge(usize, usize),
    /// Source file name outside the accepted token shape.
    #[error("invalid filename '{0}'")]
    InvalidFilename(String),
    /// Mandatory request fields missing or malformed.
    #[error("mandatory request fields missing")]
    MissingParams,
    /// Unknown or expired job identifier.
    #[error("job not found")]
    JobNotFound,
    /// Invalid, expired, or already-consumed access token.
    #[error("invalid job token")]
    InvalidToken,
    /// Failure while serializing a response.
    #[error("failed to serialize JSON: {0}")]
    FailedJsonOut(String),
    /// Backing job store unreachable or refusing writes.
    #[error("job store unavailable: {0}")]
    StoreUnavailable(String),
}

impl actix_web::error::ResponseError for ExecutionError {
    fn error_response(&self) -> HttpResponse {
        self.as_json_error()
    }
}

impl ExecutionError {
    /// Return the HTTP JSON error response.
    pub fn as_json_error(&self) -> HttpResponse {
        let code = self.as_status_code();
        let kind = self.as_kind();
        INCOMING_ERRORS_TOTAL.with_label_values(&[kind.as_str()]).inc();
        let json_body = json!({
            "kind": kind,
            "value": self.as_value(),
        });
        HttpResponse::build(code).json(json_body)
    }

    // Return the HTTP status code for the error.
    fn as_status_code(&self) -> http::StatusCode {
        match *self {
            ExecutionError::UnsupportedLanguage(_) => http::StatusCode::BAD_REQUEST,
            ExecutionError::CodeTooLarge(_, _) => http::StatusCode::PAYLOAD_TOO_LARGE,
            ExecutionError::InvalidFilename(_) => http::StatusCode::BAD_REQUEST,
            ExecutionError::MissingParams => http::StatusCode::BAD_REQUEST,
            ExecutionError::JobNotFound => http::StatusCode::NOT_FOUND,
            ExecutionError::InvalidToken => http::StatusCode::UNAUTHORIZED,
            ExecutionError::FailedJsonOut(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
            ExecutionError::StoreUnavailable(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // Return the kind for the error.
    fn as_kind(&self) -> String {
        let kind = match *self {
            ExecutionError::UnsupportedLanguage(_) => "unsupported_language",
            ExecutionError::CodeTooLarge(_, _) => "code_too_large",
            ExecutionError::InvalidFilename(_) => "invalid_filename",
            ExecutionError::MissingParams => "missing_params",
            ExecutionError::JobNotFound => "job_not_found",
            ExecutionError::InvalidToken => "invalid_token",
            ExecutionError::FailedJsonOut(_) => "failed_json_out",
            ExecutionError::StoreUnavailable(_) => "store_unavailable",
        };
        kind.to_string()
    }

    // Return the value for the error.
    fn as_value(&self) -> String {
        format!("{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::error::ResponseError;

    #[test]
    fn error_kinds_and_status_codes() {
        let cases = vec![
            (
                ExecutionError::UnsupportedLanguage("perl".to_string()),
                http::StatusCode::BAD_REQUEST,
            ),
            (
                ExecutionError::CodeTooLarge(20000, 10240),
                http::StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (ExecutionError::InvalidToken, http::StatusCode::UNAUTHORIZED),
            (ExecutionError::JobNotFound, http::StatusCode::NOT_FOUND),
        ];

        for (err, expected) in cases {
            assert_eq!(err.as_status_code(), expected);
            assert_eq!(err.error_response().status(), expected);
        }
    }

    #[test]
    fn error_value_names_offender() {
        let err = ExecutionError::UnsupportedLanguage("perl".to_string());
        assert!(err.as_value().contains("perl"));
    }
}
