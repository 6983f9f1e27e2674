//! Job creation and token issuance.

use crate::AppState;
use actix_web::{web, HttpResponse};
use commons::ExecutionError;
use runbox::store::JobStore;
use runbox::{default_filename, validate_filename, validate_source_size, Language};

/// Job creation request body.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// Language tag.
    pub language: String,
    /// Source snippet.
    pub code: String,
    /// Optional source file name; defaults per language.
    pub filename: Option<String>,
}

/// Job creation response body.
#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    /// Identifier of the created job.
    #[serde(rename = "jobId")]
    pub job_id: String,
    /// Single-use token for the WebSocket attachment.
    #[serde(rename = "jobToken")]
    pub job_token: String,
    /// Token expiry, RFC 3339.
    #[serde(rename = "expiresAt")]
    pub expires_at: String,
}

/// Create a job record and issue its access token.
pub async fn create_job(
    app_data: web::Data<AppState>,
    payload: web::Json<CreateJobRequest>,
) -> Result<HttpResponse, ExecutionError> {
    let payload = payload.into_inner();

    let language = Language::parse(&payload.language)?;
    validate_source_size(&payload.code, app_data.settings.max_code_bytes)?;
    let filename = payload
        .filename
        .unwrap_or_else(|| default_filename(language));
    validate_filename(&filename)?;

    let ticket = app_data
        .store
        .create(payload.code, language, filename)
        .await
        .map_err(|err| {
            error!("could not persist job: {}", err);
            ExecutionError::StoreUnavailable(err.to_string())
        })?;

    debug!("created {} job {}", language, ticket.job_id);
    Ok(HttpResponse::Created().json(CreateJobResponse {
        job_id: ticket.job_id,
        job_token: ticket.token,
        expires_at: ticket.token_expires_at.to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppSettings;
    use commons::prelude_errors::*;
    use commons::testing;

    fn state() -> web::Data<AppState> {
        web::Data::new(AppState::new(AppSettings::default()).unwrap())
    }

    fn request(language: &str, code: &str) -> web::Json<CreateJobRequest> {
        web::Json(CreateJobRequest {
            language: language.to_string(),
            code: code.to_string(),
            filename: None,
        })
    }

    #[test]
    fn create_job_returns_ticket() -> Fallible<()> {
        let rt = testing::init_runtime()?;
        let resp = rt
            .block_on(create_job(state(), request("python", "print(1)")))
            .map_err(|e| anyhow!("unexpected rejection: {}", e))?;
        assert_eq!(resp.status(), 201);
        Ok(())
    }

    #[test]
    fn create_job_refuses_unknown_language() -> Fallible<()> {
        let rt = testing::init_runtime()?;
        let err = rt
            .block_on(create_job(state(), request("perl", "print 1")))
            .unwrap_err();
        assert_eq!(err, ExecutionError::UnsupportedLanguage("perl".to_string()));
        Ok(())
    }

    #[test]
    fn create_job_enforces_code_budget() -> Fallible<()> {
        let rt = testing::init_runtime()?;
        let oversized = "a".repeat(10_241);
        let err = rt
            .block_on(create_job(state(), request("python", &oversized)))
            .unwrap_err();
        assert!(matches!(err, ExecutionError::CodeTooLarge(_, _)));
        Ok(())
    }

    #[test]
    fn create_job_refuses_bad_filename() -> Fallible<()> {
        let rt = testing::init_runtime()?;
        let payload = web::Json(CreateJobRequest {
            language: "python".to_string(),
            code: "print(1)".to_string(),
            filename: Some("../escape.py".to_string()),
        });
        let err = rt.block_on(create_job(state(), payload)).unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidFilename(_)));
        Ok(())
    }

    #[test]
    fn default_filenames_follow_language() {
        assert_eq!(default_filename(Language::Python), "main.py");
        assert_eq!(default_filename(Language::Cpp), "main.cpp");
    }
}
