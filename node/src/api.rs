//! # Proxy API
//!
//! The axum router in front of the gateway. Bodies are taken as raw bytes and
//! decoded here, so a malformed body is a plain 400 like every other
//! validation failure rather than axum's own rejection.
//!
//! ## Endpoints
//!
//! | Method | Path                             | Description                        |
//! |--------|----------------------------------|------------------------------------|
//! | GET    | `/health`                        | Liveness probe, never authenticated |
//! | POST   | `/v1/proxy/transactions`         | Authorize, sign and forward         |
//! | PATCH  | `/v1/proxy/transactions/retry`   | Fee replacement, hash in the body   |
//! | PATCH  | `/v1/proxy/transactions/:hash`   | Fee replacement, hash in the URL    |
//!
//! Successful calls answer `200` with the transaction hash as plain text.
//! Failures answer with the error message as plain text and the status of
//! its [`GatewayError`] kind.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Router,
};
use tower_http::trace::TraceLayer;

use keyward_gateway::config::API_PREFIX;
use keyward_gateway::{Gateway, GatewayError, RetryRequest, TransactionRequest};

use crate::auth::{require_basic_auth, BasicAuth};
use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for all handlers. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the proxy router. With `auth` set, every `/v1/proxy` route
/// requires those credentials; `/health` stays open.
pub fn create_router(state: AppState, auth: Option<BasicAuth>) -> Router {
    let mut proxy = Router::new()
        .route("/transactions", post(submit_handler))
        .route("/transactions/retry", patch(retry_handler))
        .route("/transactions/:hash", patch(retry_by_hash_handler));
    if let Some(auth) = auth {
        proxy = proxy.layer(middleware::from_fn_with_state(auth, require_basic_auth));
    }

    Router::new()
        .route("/health", get(health_handler))
        .nest(API_PREFIX, proxy)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Renders a [`GatewayError`] as a plain-text response.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::PolicyDenied => StatusCode::FORBIDDEN,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.0.to_string()).into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`
async fn health_handler() -> &'static str {
    "ok"
}

/// `POST /v1/proxy/transactions`
async fn submit_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<String, ApiError> {
    let started = Instant::now();
    let result = match serde_json::from_slice::<TransactionRequest>(&body) {
        Ok(request) => state.gateway.submit(&request).await,
        Err(e) => Err(GatewayError::Validation(format!(
            "error decoding payload: {e}"
        ))),
    };
    state.metrics.observe("submit", &result, started.elapsed());
    Ok(result?)
}

/// `PATCH /v1/proxy/transactions/retry`
async fn retry_handler(State(state): State<AppState>, body: Bytes) -> Result<String, ApiError> {
    retry(&state, None, &body).await
}

/// `PATCH /v1/proxy/transactions/:hash`
async fn retry_by_hash_handler(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    body: Bytes,
) -> Result<String, ApiError> {
    retry(&state, Some(&hash), &body).await
}

async fn retry(state: &AppState, hash: Option<&str>, body: &[u8]) -> Result<String, ApiError> {
    let started = Instant::now();
    let result = match RetryRequest::from_json(hash, body) {
        Ok(request) => state.gateway.retry(&request).await,
        Err(e) => Err(e),
    };
    state.metrics.observe("retry", &result, started.elapsed());
    Ok(result?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256};
    use axum::body::Body;
    use axum::http::{header, Request};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use keyward_gateway::chain::SimulatedChain;
    use keyward_gateway::ledger::MemoryLedger;
    use keyward_gateway::nonce::LocalNonceCounter;
    use keyward_gateway::policy::{LuaPolicyEngine, PolicySource};
    use keyward_gateway::transaction::TransactionSigner;

    use crate::metrics::GatewayMetrics;

    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const CHAIN_ID: u64 = 1337;
    const RECIPIENT: &str = "0x5597285BbE81BaF351e2C0884e9a5f4416958862";
    const ALLOW_ALL: &str = "function validate(tx) return true end";

    struct TestApp {
        router: Router,
        chain: Arc<SimulatedChain>,
        ledger: Arc<MemoryLedger>,
        metrics: SharedMetrics,
    }

    fn test_app(policy: &str, auth: Option<BasicAuth>) -> TestApp {
        let signer = TransactionSigner::from_hex(DEV_KEY, CHAIN_ID).unwrap();
        let chain = Arc::new(SimulatedChain::new(
            CHAIN_ID,
            signer.address(),
            U256::from(10_000_000_000_000u64),
        ));
        let nonces = LocalNonceCounter::new();
        nonces.seed(signer.address(), 0);
        let ledger = Arc::new(MemoryLedger::new());
        let gateway = Gateway::new(
            chain.clone(),
            Arc::new(nonces),
            Arc::new(LuaPolicyEngine::default()),
            PolicySource::new(policy),
            ledger.clone(),
            signer,
        );
        let metrics = Arc::new(GatewayMetrics::new().unwrap());
        let state = AppState {
            gateway: Arc::new(gateway),
            metrics: metrics.clone(),
        };
        TestApp {
            router: create_router(state, auth),
            chain,
            ledger,
            metrics,
        }
    }

    fn transfer_body(gas_price: &str) -> String {
        format!(r#"{{"to":"{RECIPIENT}","value":"10000000000","gasPrice":"{gas_price}"}}"#)
    }

    fn patch_body(gas_price: &str) -> String {
        format!(r#"[{{"op":"replace","path":"/gasPrice","value":"{gas_price}"}}]"#)
    }

    /// Sends a request and returns (status, body as text).
    async fn send(
        router: &Router,
        method: &str,
        path: &str,
        body: &str,
        authorization: Option<&str>,
    ) -> (StatusCode, String) {
        let mut req = Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(value) = authorization {
            req = req.header(header::AUTHORIZATION, value);
        }
        let req = req.body(Body::from(body.to_string())).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, String::from_utf8(body).unwrap())
    }

    async fn submit(router: &Router, body: &str) -> (StatusCode, String) {
        send(router, "POST", "/v1/proxy/transactions", body, None).await
    }

    fn basic(user: &str, pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
    }

    // -- Health ---------------------------------------------------------------

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = test_app(ALLOW_ALL, None);
        let (status, body) = send(&app.router, "GET", "/health", "", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    // -- Submit ---------------------------------------------------------------

    #[tokio::test]
    async fn allowed_transfer_returns_hash() {
        let app = test_app(ALLOW_ALL, None);
        let (status, body) = submit(&app.router, &transfer_body("1")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("0x") && body.len() == 66);
        assert_eq!(app.ledger.len(), 1);

        let pending = app.chain.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].to, Some(RECIPIENT.parse::<Address>().unwrap()));
        assert_eq!(
            app.metrics
                .requests_total
                .with_label_values(&["submit", "ok"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn denied_transfer_is_forbidden() {
        let app = test_app("function validate(tx) return false end", None);
        let (status, body) = submit(&app.router, &transfer_body("1")).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, "forbidden transaction");
        assert_eq!(app.chain.accepted_count(), 0);
        assert_eq!(
            app.metrics
                .requests_total
                .with_label_values(&["submit", "denied"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let app = test_app(ALLOW_ALL, None);
        let (status, body) = submit(&app.router, "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.starts_with("error decoding payload"));

        let (status, _) = submit(&app.router, r#"{"to":"0x01"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_fields_are_bad_request() {
        let app = test_app(ALLOW_ALL, None);
        for body in [
            format!(r#"{{"to":"{RECIPIENT}","gasPrice":"-1"}}"#),
            format!(r#"{{"to":"{RECIPIENT}","gasPrice":"1","value":"1.5"}}"#),
            format!(r#"{{"to":"{RECIPIENT}","gasPrice":"1","data":"zz"}}"#),
            r#"{"to":"0x1234","gasPrice":"1"}"#.to_string(),
        ] {
            let (status, _) = submit(&app.router, &body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
        }
        assert_eq!(app.chain.accepted_count(), 0);
    }

    #[tokio::test]
    async fn node_failure_is_bad_gateway() {
        let app = test_app(ALLOW_ALL, None);
        app.chain.fail_send(true);
        let (status, _) = submit(&app.router, &transfer_body("1")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(app.ledger.is_empty());
    }

    // -- Retry ----------------------------------------------------------------

    #[tokio::test]
    async fn retry_by_url_hash_replaces_fee() {
        let app = test_app(ALLOW_ALL, None);
        let (_, hash) = submit(&app.router, &transfer_body("1")).await;

        let path = format!("/v1/proxy/transactions/{hash}");
        let (status, replaced) = send(&app.router, "PATCH", &path, &patch_body("2"), None).await;

        assert_eq!(status, StatusCode::OK);
        assert_ne!(replaced, hash);
        let pending = app.chain.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!((pending[0].nonce, pending[0].gas_price), (0, 2));
    }

    #[tokio::test]
    async fn retry_with_hash_in_body() {
        let app = test_app(ALLOW_ALL, None);
        let (_, hash) = submit(&app.router, &transfer_body("1")).await;

        let body = format!(r#"{{"hash":"{hash}","gasPrice":"5"}}"#);
        let (status, _) = send(&app.router, "PATCH", "/v1/proxy/transactions/retry", &body, None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(app.chain.pending()[0].gas_price, 5);
    }

    #[tokio::test]
    async fn retry_of_unknown_hash_is_not_found() {
        let app = test_app(ALLOW_ALL, None);
        let path = format!("/v1/proxy/transactions/0x{}", "cd".repeat(32));
        let (status, _) = send(&app.router, "PATCH", &path, &patch_body("2"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn retry_of_other_field_is_bad_request() {
        let app = test_app(ALLOW_ALL, None);
        let (_, hash) = submit(&app.router, &transfer_body("1")).await;

        let path = format!("/v1/proxy/transactions/{hash}");
        let body = r#"[{"op":"replace","path":"/to","value":"0x0000000000000000000000000000000000000000"}]"#;
        let (status, _) = send(&app.router, "PATCH", &path, body, None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(app.chain.accepted_count(), 1);
    }

    // -- Auth -----------------------------------------------------------------

    #[tokio::test]
    async fn proxy_routes_require_credentials_when_configured() {
        let app = test_app(ALLOW_ALL, Some(BasicAuth::new("ops", "s3cret")));

        let req = Request::builder()
            .method("POST")
            .uri("/v1/proxy/transactions")
            .body(Body::from(transfer_body("1")))
            .unwrap();
        let resp = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"Restricted\""
        );

        let wrong = basic("ops", "nope");
        let (status, _) = send(
            &app.router,
            "POST",
            "/v1/proxy/transactions",
            &transfer_body("1"),
            Some(&wrong),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(app.chain.accepted_count(), 0);

        let right = basic("ops", "s3cret");
        let (status, _) = send(
            &app.router,
            "POST",
            "/v1/proxy/transactions",
            &transfer_body("1"),
            Some(&right),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn health_is_open_when_auth_is_configured() {
        let app = test_app(ALLOW_ALL, Some(BasicAuth::new("ops", "s3cret")));
        let (status, _) = send(&app.router, "GET", "/health", "", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn error_kinds_map_to_statuses() {
        let cases = [
            (GatewayError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (GatewayError::PolicyDenied, StatusCode::FORBIDDEN),
            (GatewayError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (GatewayError::Upstream("x".into()), StatusCode::BAD_GATEWAY),
            (GatewayError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
