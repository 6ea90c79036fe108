//! Wire formats of the Document Intelligence administration API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::models::{ModelSummary, OperationState, OperationStatus, ResourceDetails};

/// Model entry as listed by the service
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub model_id: String,
    pub created_date_time: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expiration_date_time: Option<DateTime<Utc>>,
}

impl From<ModelInfo> for ModelSummary {
    fn from(info: ModelInfo) -> Self {
        let mut summary = ModelSummary::new(info.model_id, info.created_date_time);
        summary.description = info.description;
        summary.expires_at = info.expiration_date_time;
        summary
    }
}

/// One page of the model listing
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPage {
    #[serde(default)]
    pub value: Vec<ModelInfo>,
    #[serde(default)]
    pub next_link: Option<String>,
}

/// Body of an authorize-copy request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeCopyRequest<'a> {
    pub model_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
}

/// Error envelope returned with non-success statuses
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorDetail,
}

/// Service error detail
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub innererror: Option<Box<ErrorDetail>>,
}

impl ErrorDetail {
    /// Renders `code: message`, preferring the innermost detail
    pub fn describe(&self) -> String {
        if let Some(inner) = &self.innererror {
            return inner.describe();
        }

        match (&self.code, &self.message) {
            (Some(code), Some(message)) => format!("{}: {}", code, message),
            (Some(code), None) => code.clone(),
            (None, Some(message)) => message.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

/// Extracts a readable detail from an error response body
pub fn describe_error_body(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.describe(),
        Err(_) if body.trim().is_empty() => "no detail".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

/// Long-running operation status
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    pub status: OperationState,
    #[serde(default)]
    pub percent_completed: Option<u8>,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}

impl From<OperationResponse> for OperationStatus {
    fn from(response: OperationResponse) -> Self {
        OperationStatus {
            state: response.status,
            percent_completed: response.percent_completed,
            error: response.error.map(|e| e.describe()),
        }
    }
}

/// Resource information
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub custom_document_models: CustomModelQuota,
}

/// Custom model usage
#[derive(Debug, Clone, Deserialize)]
pub struct CustomModelQuota {
    pub count: u32,
    pub limit: u32,
}

impl From<ResourceInfo> for ResourceDetails {
    fn from(info: ResourceInfo) -> Self {
        ResourceDetails {
            custom_model_count: info.custom_document_models.count,
            custom_model_limit: info.custom_document_models.limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::ModelKind;

    #[test]
    fn test_model_page_parsing() {
        let page: ModelPage = serde_json::from_str(
            r#"{
                "value": [
                    {"modelId": "invoices", "createdDateTime": "2024-03-01T10:00:00Z", "apiVersion": "2024-11-30"},
                    {"modelId": "prebuilt-read", "createdDateTime": "2024-02-01T00:00:00Z", "description": "Read"}
                ],
                "nextLink": "https://src/documentintelligence/documentModels?skip=2"
            }"#,
        )
        .unwrap();

        assert_eq!(page.value.len(), 2);
        assert!(page.next_link.is_some());

        let summaries: Vec<ModelSummary> = page.value.into_iter().map(Into::into).collect();
        assert_eq!(summaries[0].kind, ModelKind::Custom);
        assert_eq!(summaries[1].kind, ModelKind::Prebuilt);
        assert_eq!(summaries[1].description.as_deref(), Some("Read"));
    }

    #[test]
    fn test_describe_error_body() {
        let body = r#"{"error": {"code": "Conflict", "message": "Model exists", "innererror": {"code": "ModelExists", "message": "Model 'C-v2' already exists."}}}"#;
        assert_eq!(describe_error_body(body), "ModelExists: Model 'C-v2' already exists.");
        assert_eq!(describe_error_body(""), "no detail");
        assert_eq!(describe_error_body("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_operation_response_conversion() {
        let response: OperationResponse = serde_json::from_str(
            r#"{"status": "failed", "error": {"code": "InternalServerError", "message": "Copy failed"}}"#,
        )
        .unwrap();

        let status: OperationStatus = response.into();
        assert_eq!(status.state, OperationState::Failed);
        assert_eq!(status.error.as_deref(), Some("InternalServerError: Copy failed"));
    }
}
