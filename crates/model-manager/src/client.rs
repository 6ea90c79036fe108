//! REST client for the Document Intelligence administration API

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use common::error::{Error, Result};
use common::models::{
    CopyAuthorization, CopyOperationHandle, ModelSummary, OperationStatus, ResourceDetails,
};
use common::types::ApiKey;
use settings::HttpSettings;

use crate::admin::ModelAdministration;
use crate::metadata::{
    describe_error_body, AuthorizeCopyRequest, ModelPage, OperationResponse, ResourceInfo,
};

/// Header carrying the resource key
const API_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Header carrying the location of a started operation
const OPERATION_LOCATION_HEADER: &str = "Operation-Location";

const USER_AGENT: &str = concat!("di-model-copier/", env!("CARGO_PKG_VERSION"));

/// Builds the shared HTTP client
pub fn build_http_client(settings: &HttpSettings) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(settings.request_timeout())
        .connect_timeout(settings.connect_timeout())
        .pool_max_idle_per_host(10)
        .build()
        .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))
}

/// Which step of the protocol a request belongs to
///
/// Determines how failures are classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Inventory,
    Authorize,
    Initiate,
    Poll,
}

impl Phase {
    fn transport_error(self, context: &str, e: reqwest::Error) -> Error {
        let message = format!("{}: {}", context, e);
        let transient = e.is_timeout() || e.is_connect() || e.is_request();

        match self {
            Phase::Authorize => Error::AuthorizationRequest(message),
            Phase::Initiate => Error::Initiation(message),
            Phase::Poll if transient => Error::Poll(message),
            Phase::Inventory if transient => Error::ServiceUnavailable(message),
            _ => Error::ExternalService(message),
        }
    }

    fn status_error(self, context: &str, status: StatusCode, body: &str) -> Error {
        let message = format!("{} returned {}: {}", context, status, describe_error_body(body));
        let transient = status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error();

        match self {
            Phase::Authorize => Error::AuthorizationRequest(message),
            Phase::Initiate => Error::Initiation(message),
            _ if status == StatusCode::UNAUTHORIZED => Error::Authentication(message),
            _ if status == StatusCode::FORBIDDEN => Error::Authorization(message),
            Phase::Poll if transient => Error::Poll(message),
            Phase::Inventory if transient => Error::ServiceUnavailable(message),
            Phase::Inventory if status == StatusCode::NOT_FOUND => Error::NotFound(message),
            _ => Error::ExternalService(message),
        }
    }

    fn decode_error(self, context: &str, e: reqwest::Error) -> Error {
        let message = format!("{}: malformed response: {}", context, e);
        match self {
            Phase::Authorize => Error::AuthorizationRequest(message),
            Phase::Initiate => Error::Initiation(message),
            _ => Error::ExternalService(message),
        }
    }
}

/// Administration API client bound to one resource
pub struct DocumentIntelligenceClient {
    /// HTTP client
    http: Client,

    /// Resource endpoint, without trailing slash
    endpoint: String,

    /// Resource key
    key: ApiKey,

    /// REST api-version
    api_version: String,
}

impl DocumentIntelligenceClient {
    /// Creates a client for `endpoint`
    pub fn new(
        http: Client,
        endpoint: impl Into<String>,
        key: ApiKey,
        api_version: impl Into<String>,
    ) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            http,
            endpoint,
            key,
            api_version: api_version.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/documentintelligence/{}", self.endpoint, path)
    }

    /// Attaches the key, and the api-version unless `url` already has one
    fn prepare(&self, request: RequestBuilder, url: &str) -> RequestBuilder {
        let request = request.header(API_KEY_HEADER, self.key.expose());
        if url.contains("api-version=") {
            request
        } else {
            request.query(&[("api-version", self.api_version.as_str())])
        }
    }

    async fn send(&self, phase: Phase, context: &str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| phase.transport_error(context, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(phase.status_error(context, status, &body))
    }

    async fn get_json<T: DeserializeOwned>(&self, phase: Phase, context: &str, url: &str) -> Result<T> {
        let request = self.prepare(self.http.get(url), url);
        let response = self.send(phase, context, request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| phase.decode_error(context, e))
    }
}

#[async_trait]
impl ModelAdministration for DocumentIntelligenceClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>> {
        let context = format!("Model listing on {}", self.endpoint);
        let mut models = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(self.url("documentModels"));

        while let Some(url) = next.take() {
            if !visited.insert(url.clone()) {
                warn!("{} repeated page link {}, stopping", context, url);
                break;
            }

            let page: ModelPage = self.get_json(Phase::Inventory, &context, &url).await?;
            debug!("{} returned {} model(s)", context, page.value.len());

            models.extend(page.value.into_iter().map(ModelSummary::from));
            next = page.next_link.filter(|link| !link.is_empty());
        }

        Ok(models)
    }

    async fn resource_details(&self) -> Result<ResourceDetails> {
        let context = format!("Resource details of {}", self.endpoint);
        let info: ResourceInfo = self
            .get_json(Phase::Inventory, &context, &self.url("info"))
            .await?;
        Ok(info.into())
    }

    async fn authorize_copy(
        &self,
        model_id: &str,
        description: Option<&str>,
    ) -> Result<CopyAuthorization> {
        let context = format!("Copy authorization for '{}' on {}", model_id, self.endpoint);
        let url = self.url("documentModels:authorizeCopy");
        let body = AuthorizeCopyRequest {
            model_id,
            description,
        };

        let request = self.prepare(self.http.post(&url), &url).json(&body);
        let response = self.send(Phase::Authorize, &context, request).await?;

        let authorization: CopyAuthorization = response
            .json()
            .await
            .map_err(|e| Phase::Authorize.decode_error(&context, e))?;

        info!("{} granted until {}", context, authorization.expiration_date_time);
        Ok(authorization)
    }

    async fn begin_copy(
        &self,
        model_id: &str,
        authorization: &CopyAuthorization,
    ) -> Result<CopyOperationHandle> {
        let context = format!(
            "Copy of '{}' from {} to {}",
            model_id, self.endpoint, authorization.target_resource_id
        );
        let url = self.url(&format!("documentModels/{}:copyTo", model_id));

        let request = self.prepare(self.http.post(&url), &url).json(authorization);
        let response = self.send(Phase::Initiate, &context, request).await?;

        let location = response
            .headers()
            .get(OPERATION_LOCATION_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                Error::Initiation(format!("{}: response carried no operation location", context))
            })?;

        info!("{} started", context);
        Ok(CopyOperationHandle::new(location))
    }

    async fn copy_status(&self, handle: &CopyOperationHandle) -> Result<OperationStatus> {
        let context = format!("Copy status {}", handle);
        let response: OperationResponse = self
            .get_json(Phase::Poll, &context, handle.location())
            .await?;
        Ok(response.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::OperationState;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> DocumentIntelligenceClient {
        DocumentIntelligenceClient::new(
            Client::new(),
            format!("{}/", server.uri()),
            ApiKey::new("source-api-key-1"),
            "2024-11-30",
        )
    }

    fn authorization_json(target: &str) -> serde_json::Value {
        json!({
            "targetResourceId": target,
            "targetResourceRegion": "westeurope",
            "targetModelId": "C-v2",
            "targetModelLocation": format!("{}/documentintelligence/documentModels/C-v2", target),
            "accessToken": "copy-token",
            "expirationDateTime": "2030-01-01T00:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_list_models_follows_pages() {
        let server = MockServer::start().await;
        let models_path = "/documentintelligence/documentModels";

        Mock::given(method("GET"))
            .and(path(models_path))
            .and(query_param("skip", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"modelId": "C", "createdDateTime": "2024-03-01T00:00:00Z"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(models_path))
            .and(query_param("api-version", "2024-11-30"))
            .and(header(API_KEY_HEADER, "source-api-key-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {"modelId": "A", "createdDateTime": "2024-01-01T00:00:00Z"},
                    {"modelId": "prebuilt-invoice", "createdDateTime": "2023-01-01T00:00:00Z"}
                ],
                "nextLink": format!("{}{}?api-version=2024-11-30&skip=2", server.uri(), models_path)
            })))
            .expect(1)
            .mount(&server)
            .await;

        let models = client(&server).list_models().await.unwrap();
        let ids: Vec<&str> = models.iter().map(|m| m.model_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "prebuilt-invoice", "C"]);
    }

    #[tokio::test]
    async fn test_list_models_stops_on_repeated_link() {
        let server = MockServer::start().await;
        let link = format!("{}/documentintelligence/documentModels?api-version=2024-11-30", server.uri());

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"modelId": "A", "createdDateTime": "2024-01-01T00:00:00Z"}],
                "nextLink": link
            })))
            .mount(&server)
            .await;

        let models = client(&server).list_models().await.unwrap();
        assert_eq!(models.len(), 2);
    }

    #[tokio::test]
    async fn test_inventory_errors_are_classified() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/documentintelligence/documentModels"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"code": "401", "message": "Access denied due to invalid subscription key."}
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/documentintelligence/info"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(client.list_models().await.unwrap_err().is_authentication());
        assert!(client.resource_details().await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_resource_details() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/documentintelligence/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "customDocumentModels": {"count": 12, "limit": 500}
            })))
            .mount(&server)
            .await;

        let details = client(&server).resource_details().await.unwrap();
        assert_eq!(details.custom_model_count, 12);
        assert_eq!(details.custom_model_limit, 500);
    }

    #[tokio::test]
    async fn test_authorize_copy() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/documentintelligence/documentModels:authorizeCopy"))
            .and(body_json(json!({"modelId": "C-v2"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(authorization_json(&server.uri())))
            .mount(&server)
            .await;

        let authorization = client(&server).authorize_copy("C-v2", None).await.unwrap();
        assert_eq!(authorization.target_model_id, "C-v2");
        assert_eq!(authorization.access_token, "copy-token");
    }

    #[tokio::test]
    async fn test_authorize_rejection() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "error": {"code": "ModelExists", "message": "Model 'C-v2' already exists."}
            })))
            .mount(&server)
            .await;

        let err = client(&server).authorize_copy("C-v2", None).await.unwrap_err();
        assert!(matches!(err, Error::AuthorizationRequest(_)));
        assert!(err.to_string().contains("ModelExists"));
    }

    #[tokio::test]
    async fn test_begin_copy_and_poll() {
        let server = MockServer::start().await;
        let operation = format!(
            "{}/documentintelligence/operations/op-1?api-version=2024-11-30",
            server.uri()
        );

        Mock::given(method("POST"))
            .and(path("/documentintelligence/documentModels/C:copyTo"))
            .and(body_json(authorization_json("https://t1.example")))
            .respond_with(ResponseTemplate::new(202).insert_header(OPERATION_LOCATION_HEADER, operation.as_str()))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/documentintelligence/operations/op-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "running",
                "percentCompleted": 40
            })))
            .mount(&server)
            .await;

        let authorization: CopyAuthorization =
            serde_json::from_value(authorization_json("https://t1.example")).unwrap();

        let client = client(&server);
        let handle = client.begin_copy("C", &authorization).await.unwrap();
        assert_eq!(handle.location(), operation);

        let status = client.copy_status(&handle).await.unwrap();
        assert_eq!(status.state, OperationState::Running);
        assert_eq!(status.percent_completed, Some(40));
    }

    #[tokio::test]
    async fn test_begin_copy_without_location_is_an_initiation_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let authorization: CopyAuthorization =
            serde_json::from_value(authorization_json("https://t1.example")).unwrap();

        let err = client(&server).begin_copy("C", &authorization).await.unwrap_err();
        assert!(matches!(err, Error::Initiation(_)));
    }

    #[tokio::test]
    async fn test_poll_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/ops/throttled"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/ops/forbidden"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = client(&server);

        let throttled = CopyOperationHandle::new(format!("{}/ops/throttled", server.uri()));
        let err = client.copy_status(&throttled).await.unwrap_err();
        assert!(matches!(err, Error::Poll(_)));
        assert!(err.is_transient());

        let forbidden = CopyOperationHandle::new(format!("{}/ops/forbidden", server.uri()));
        assert!(client.copy_status(&forbidden).await.unwrap_err().is_authorization());
    }
}
