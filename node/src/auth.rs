//! HTTP basic auth for the proxy routes.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use keyward_gateway::config::AUTH_REALM;

type Digest32 = [u8; 32];

/// One configured user/password pair, held as SHA-256 digests so every
/// comparison runs over the same 32 bytes whatever the input length.
#[derive(Clone)]
pub struct BasicAuth {
    user: Arc<str>,
    user_digest: Digest32,
    pass_digest: Digest32,
}

fn digest(input: &[u8]) -> Digest32 {
    Sha256::digest(input).into()
}

impl BasicAuth {
    pub fn new(user: &str, pass: &str) -> Self {
        Self {
            user: user.into(),
            user_digest: digest(user.as_bytes()),
            pass_digest: digest(pass.as_bytes()),
        }
    }

    /// Whether an `Authorization` header carries the configured credentials.
    pub fn verify(&self, header: Option<&HeaderValue>) -> bool {
        let Some(encoded) = header
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Basic "))
        else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        let Some((user, pass)) = decoded.split_once(':') else {
            return false;
        };
        let user_ok = digest(user.as_bytes())[..].ct_eq(&self.user_digest[..]);
        let pass_ok = digest(pass.as_bytes())[..].ct_eq(&self.pass_digest[..]);
        (user_ok & pass_ok).into()
    }
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .finish()
    }
}

/// Middleware rejecting requests without valid credentials.
pub async fn require_basic_auth(
    State(auth): State<BasicAuth>,
    request: Request,
    next: Next,
) -> Response {
    if auth.verify(request.headers().get(header::AUTHORIZATION)) {
        return next.run(request).await;
    }
    tracing::debug!(path = %request.uri().path(), "rejected unauthenticated request");
    (
        StatusCode::UNAUTHORIZED,
        [(
            header::WWW_AUTHENTICATE,
            format!("Basic realm=\"{AUTH_REALM}\""),
        )],
        "unauthorized",
    )
        .into_response()
}
