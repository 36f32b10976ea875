//! Authenticated request client with transparent refresh on 401

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::session::Session;
use crate::types::{ErrorBody, RefreshRequest, RefreshResponse, REFRESH_PATH};
use async_singleflight::Group;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Singleflight key; there is only ever one session per client
const REFRESH_FLIGHT_KEY: &str = "refresh";

/// One call against the backend: method, path, optional JSON body and extra headers
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<Value>,
    headers: HeaderMap,
    allow_refresh: bool,
}

impl ApiRequest {
    /// `path` is appended verbatim to the backend origin, so it should start with `/`
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: HeaderMap::new(),
            allow_refresh: true,
        }
    }

    /// Create a GET request
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Create a POST request
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Create a PUT request
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// Create a DELETE request
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Set the JSON request body
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Add a header; it overrides the client defaults, `Authorization` included.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::InvalidRequest(format!("Invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::InvalidRequest(format!("Invalid value for header {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Never attempt a token refresh for this request, e.g. before any session exists.
    pub fn without_refresh(mut self) -> Self {
        self.allow_refresh = false;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

struct Attempt {
    response: Response,
    /// Access token the request went out with
    sent_token: Option<String>,
}

/// HTTP client for the portal backend
///
/// Attaches the stored access token as a bearer header. A 401 is answered by
/// exchanging the refresh token for a new access token and re-issuing the
/// request exactly once. Concurrent refreshes are collapsed into a single
/// call to the refresh endpoint.
pub struct ApiClient {
    origin: String,
    http: Client,
    session: Session,
    /// Singleflight group so concurrent 401s share one refresh request
    /// Error type is String because singleflight requires a cloneable error
    refresh_singleflight: Group<String, String>,
}

impl ApiClient {
    /// Create a client for the configured backend with a default `reqwest::Client`
    pub fn new(config: ClientConfig, session: Session) -> Result<Self> {
        Self::with_http_client(config, session, Client::new())
    }

    /// Use a preconfigured `reqwest::Client`, e.g. one with custom timeouts or proxies.
    pub fn with_http_client(config: ClientConfig, session: Session, http: Client) -> Result<Self> {
        let origin = config.origin()?;
        debug!(origin = %origin, "Created portal client");

        Ok(Self {
            origin,
            http,
            session,
            refresh_singleflight: Group::new(),
        })
    }

    /// Backend origin without a trailing slash
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Get the session (for advanced usage)
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// GET `path` and decode the response
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(ApiRequest::get(path)).await
    }

    /// POST `body` as JSON to `path` and decode the response
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        self.request(ApiRequest::post(path).json(body)?).await
    }

    /// PUT `body` as JSON to `path` and decode the response
    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        self.request(ApiRequest::put(path).json(body)?).await
    }

    /// DELETE `path` and decode the response
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(ApiRequest::delete(path)).await
    }

    /// Issue `request` and decode a successful JSON body into `T`
    ///
    /// An empty 2xx body decodes as `{}`. A 401 is retried once after a
    /// successful refresh, and whatever the retry returns is final.
    pub async fn request<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let attempt = self.attempt(&request).await?;

        if attempt.response.status() == StatusCode::UNAUTHORIZED && request.allow_refresh {
            if self.recover_access_token(attempt.sent_token.as_deref()).await.is_some() {
                debug!(method = %request.method, path = %request.path, "Retrying with refreshed access token");
                let retry = self.attempt(&request).await?;
                return self.finish(retry.response, &request).await;
            }
        }

        self.finish(attempt.response, &request).await
    }

    async fn attempt(&self, request: &ApiRequest) -> Result<Attempt> {
        let url = format!("{}{}", self.origin, request.path);
        let sent_token = self.session.access_token();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &sent_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                ClientError::InvalidRequest("Stored access token is not a valid header value".to_string())
            })?;
            headers.insert(AUTHORIZATION, value);
        }
        for (name, value) in &request.headers {
            headers.insert(name.clone(), value.clone());
        }

        let mut builder = self.http.request(request.method.clone(), url.as_str()).headers(headers);
        if let Some(body) = &request.body {
            builder = builder.body(serde_json::to_vec(body)?);
        }

        debug!(
            method = %request.method,
            path = %request.path,
            authenticated = sent_token.is_some(),
            "Sending request"
        );

        let response = builder.send().await.map_err(|e| self.transport_error(e))?;
        Ok(Attempt { response, sent_token })
    }

    async fn finish<T: DeserializeOwned>(&self, response: Response, request: &ApiRequest) -> Result<T> {
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;

        if status.is_success() {
            return decode_body(status, &bytes);
        }

        let detail = failure_detail(status, &bytes);
        debug!(
            method = %request.method,
            path = %request.path,
            status = %status,
            detail = %detail,
            "Request failed"
        );

        if status == StatusCode::UNAUTHORIZED && request.allow_refresh {
            return Err(ClientError::AuthExpired { detail });
        }
        Err(ClientError::Api { status, detail })
    }

    fn transport_error(&self, error: reqwest::Error) -> ClientError {
        if error.is_builder() {
            return ClientError::InvalidRequest(error.to_string());
        }
        warn!(origin = %self.origin, error = %error, "Backend unreachable");
        ClientError::NetworkUnavailable {
            origin: self.origin.clone(),
            source: error,
        }
    }

    /// Find an access token worth retrying a 401 with
    async fn recover_access_token(&self, sent_token: Option<&str>) -> Option<String> {
        if self.session.refresh_token().is_none() {
            debug!("Unauthorized and no refresh token stored");
            return None;
        }

        // A concurrent caller may already have refreshed while this request was in flight
        if let Some(current) = self.session.access_token() {
            if sent_token != Some(current.as_str()) {
                debug!("Access token changed since the request was sent, reusing it");
                return Some(current);
            }
        }

        self.refresh_access_token().await
    }

    /// Exchange the stored refresh token for a new access token
    ///
    /// Returns `None` when no refresh token is stored (without touching the
    /// network) or when the exchange fails; a failed exchange also clears the
    /// session. Never returns an error.
    pub(crate) async fn refresh_access_token(&self) -> Option<String> {
        if self.session.refresh_token().is_none() {
            return None;
        }

        let (token, error, shared) = self
            .refresh_singleflight
            .work(REFRESH_FLIGHT_KEY, async {
                match self.exchange_refresh_token().await {
                    Ok(token) => {
                        info!(origin = %self.origin, "Access token refreshed successfully");
                        Ok(token)
                    }
                    Err(reason) => {
                        warn!(origin = %self.origin, reason = %reason, "Token refresh failed, clearing session");
                        if let Err(e) = self.session.clear() {
                            warn!(error = %e, "Failed to clear session after refresh failure");
                        }
                        Err(reason)
                    }
                }
            })
            .await;

        if token.is_none() {
            debug!(shared, error = ?error, "No access token after refresh");
        }
        token
    }

    async fn exchange_refresh_token(&self) -> std::result::Result<String, String> {
        let refresh_token = self
            .session
            .refresh_token()
            .ok_or_else(|| "no refresh token stored".to_string())?;

        let url = format!("{}{}", self.origin, REFRESH_PATH);
        let response = self
            .http
            .post(url.as_str())
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .send()
            .await
            .map_err(|e| format!("transport failure: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("refresh rejected with status {status}"));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| format!("unreadable refresh response: {e}"))?;

        let token = body
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| "refresh response without access_token".to_string())?;

        self.session
            .set_access_token(&token)
            .map_err(|e| format!("failed to persist access token: {e}"))?;

        Ok(token)
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("origin", &self.origin)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

fn decode_body<T: DeserializeOwned>(status: StatusCode, bytes: &[u8]) -> Result<T> {
    let decoded = if bytes.is_empty() {
        serde_json::from_value(Value::Object(serde_json::Map::new()))
    } else {
        serde_json::from_slice(bytes)
    };
    decoded.map_err(|source| ClientError::MalformedResponse { status, source })
}

/// Human-readable message for a failed response: the backend's `detail`,
/// else the status reason phrase.
fn failure_detail(status: StatusCode, bytes: &[u8]) -> String {
    let detail = serde_json::from_slice::<ErrorBody>(bytes)
        .ok()
        .and_then(|body| body.detail)
        .and_then(|detail| match detail {
            Value::String(message) => (!message.is_empty()).then_some(message),
            Value::Null => None,
            other => Some(other.to_string()),
        });

    detail
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| format!("HTTP error! status: {}", status.as_u16()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Empty;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(uri: &str) -> ApiClient {
        ApiClient::new(ClientConfig::new(uri), Session::in_memory()).unwrap()
    }

    async fn mock_refresh(server: &MockServer, response: ResponseTemplate, times: u64) {
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .and(body_json(json!({"refresh_token": "R1"})))
            .respond_with(response)
            .expect(times)
            .mount(server)
            .await;
    }

    #[test]
    fn test_failure_detail_prefers_backend_detail() {
        let detail = failure_detail(StatusCode::BAD_REQUEST, br#"{"detail":"Invalid OTP"}"#);
        assert_eq!(detail, "Invalid OTP");
    }

    #[test]
    fn test_failure_detail_renders_structured_detail() {
        let detail = failure_detail(
            StatusCode::UNPROCESSABLE_ENTITY,
            br#"{"detail":[{"loc":["body","email"],"msg":"field required"}]}"#,
        );
        assert!(detail.contains("field required"));
    }

    #[test]
    fn test_failure_detail_falls_back_to_status_text() {
        assert_eq!(
            failure_detail(StatusCode::INTERNAL_SERVER_ERROR, b"<html>oops</html>"),
            "Internal Server Error"
        );
        assert_eq!(failure_detail(StatusCode::NOT_FOUND, br#"{"error":"x"}"#), "Not Found");
        assert_eq!(
            failure_detail(StatusCode::from_u16(599).unwrap(), b""),
            "HTTP error! status: 599"
        );
    }

    #[test]
    fn test_decode_body_empty_is_empty_object() {
        let empty: Empty = decode_body(StatusCode::NO_CONTENT, b"").unwrap();
        assert_eq!(empty, Empty {});
        let value: Value = decode_body(StatusCode::OK, b"").unwrap();
        assert_eq!(value, json!({}));
    }

    #[test]
    fn test_decode_body_rejects_malformed_json() {
        let result: Result<Value> = decode_body(StatusCode::OK, b"{\"truncated\":");
        assert!(matches!(
            result,
            Err(ClientError::MalformedResponse { status: StatusCode::OK, .. })
        ));
    }

    #[test]
    fn test_header_validation() {
        assert!(ApiRequest::get("/x").header("X-Trace", "abc").is_ok());
        assert!(matches!(
            ApiRequest::get("/x").header("bad header", "abc"),
            Err(ClientError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_skips_network() {
        let server = MockServer::start().await;
        mock_refresh(&server, ResponseTemplate::new(200), 0).await;

        let client = client_for(&server.uri());
        client.session().set_access_token("A1").unwrap();

        assert_eq!(client.refresh_access_token().await, None);
        // Nothing was cleared since no exchange took place
        assert_eq!(client.session().access_token().as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn test_sequential_refreshes_only_touch_access_token() {
        let server = MockServer::start().await;
        mock_refresh(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({"access_token": "A2"})),
            2,
        )
        .await;

        let client = client_for(&server.uri());
        client.session().store_tokens("A1", "R1").unwrap();

        assert_eq!(client.refresh_access_token().await.as_deref(), Some("A2"));
        assert_eq!(client.refresh_access_token().await.as_deref(), Some("A2"));
        assert_eq!(client.session().access_token().as_deref(), Some("A2"));
        assert_eq!(client.session().refresh_token().as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn test_rejected_refresh_clears_session() {
        let server = MockServer::start().await;
        mock_refresh(
            &server,
            ResponseTemplate::new(403).set_body_json(json!({"detail": "Invalid refresh token"})),
            1,
        )
        .await;

        let client = client_for(&server.uri());
        client.session().store_tokens("A1", "R1").unwrap();

        assert_eq!(client.refresh_access_token().await, None);
        assert_eq!(client.session().access_token(), None);
        assert_eq!(client.session().refresh_token(), None);
    }

    #[tokio::test]
    async fn test_refresh_without_access_token_field_clears_session() {
        let server = MockServer::start().await;
        mock_refresh(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({"token_type": "bearer"})),
            1,
        )
        .await;

        let client = client_for(&server.uri());
        client.session().store_tokens("A1", "R1").unwrap();

        assert_eq!(client.refresh_access_token().await, None);
        assert_eq!(client.session().access_token(), None);
        assert_eq!(client.session().refresh_token(), None);
    }

    #[tokio::test]
    async fn test_refresh_with_empty_access_token_clears_session() {
        let server = MockServer::start().await;
        mock_refresh(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({"access_token": ""})),
            1,
        )
        .await;

        let client = client_for(&server.uri());
        client.session().store_tokens("A1", "R1").unwrap();

        assert_eq!(client.refresh_access_token().await, None);
        assert_eq!(client.session().access_token(), None);
        assert_eq!(client.session().refresh_token(), None);
    }

    #[tokio::test]
    async fn test_refresh_with_unparseable_body_clears_session() {
        let server = MockServer::start().await;
        mock_refresh(
            &server,
            ResponseTemplate::new(200).set_body_string("<html>gateway</html>"),
            1,
        )
        .await;

        let client = client_for(&server.uri());
        client.session().store_tokens("A1", "R1").unwrap();

        assert_eq!(client.refresh_access_token().await, None);
        assert_eq!(client.session().access_token(), None);
        assert_eq!(client.session().refresh_token(), None);
    }

    #[tokio::test]
    async fn test_sequential_failed_refreshes_fail_identically() {
        let server = MockServer::start().await;
        mock_refresh(
            &server,
            ResponseTemplate::new(401).set_body_json(json!({"detail": "Refresh token expired"})),
            2,
        )
        .await;

        let client = client_for(&server.uri());

        for _ in 0..2 {
            client.session().store_tokens("A1", "R1").unwrap();
            assert_eq!(client.refresh_access_token().await, None);
            assert_eq!(client.session().access_token(), None);
            assert_eq!(client.session().refresh_token(), None);
        }
    }

    #[tokio::test]
    async fn test_refresh_transport_failure_clears_session() {
        // Bind and drop a listener to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let client = client_for(&format!("http://127.0.0.1:{port}"));
        client.session().store_tokens("A1", "R1").unwrap();

        assert_eq!(client.refresh_access_token().await, None);
        assert_eq!(client.session().access_token(), None);
        assert_eq!(client.session().refresh_token(), None);
    }

    #[tokio::test]
    async fn test_refresh_request_carries_no_bearer_header() {
        let server = MockServer::start().await;
        mock_refresh(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({"access_token": "A2"})),
            1,
        )
        .await;

        let client = client_for(&server.uri());
        client.session().store_tokens("A1", "R1").unwrap();
        client.refresh_access_token().await;

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_caller_header_overrides_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/employee"))
            .and(header("authorization", "Bearer override"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        client.session().store_tokens("A1", "R1").unwrap();

        let request = ApiRequest::get("/projects/employee")
            .header("Authorization", "Bearer override")
            .unwrap();
        let projects: Vec<Value> = client.request(request).await.unwrap();
        assert!(projects.is_empty());
    }
}
