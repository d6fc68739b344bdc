//! Success and error callbacks
//!
//! Each adapter reports its outcome through one [`Callbacks`] value given
//! at construction. Without an `on_success` hook a successful login
//! redirects to the landing path; without an `on_error` hook every
//! failure becomes the generic JSON unauthorized response built by
//! [`error_body`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Redirect, Response};
use broker_core::AuthError;
use std::sync::Arc;

/// Hook invoked with the outcome of a successful login.
pub type SuccessHandler<T> = Arc<dyn Fn(&T) -> Response + Send + Sync>;

/// Hook invoked with the reason a login failed.
pub type ErrorHandler = Arc<dyn Fn(&AuthError) -> Response + Send + Sync>;

/// Generic error response: `{"error": <code>, "message": <text>}`.
///
/// Rejections answer 401. Server-class failures answer 500 without
/// echoing internal detail.
pub fn error_body(err: &AuthError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::UNAUTHORIZED);
    let message = if err.is_server_error() {
        "Internal error".to_string()
    } else {
        err.to_string()
    };

    (
        status,
        Json(serde_json::json!({
            "error": err.error_code(),
            "message": message,
        })),
    )
        .into_response()
}

/// [`AuthError`] as an axum response, rendered by [`error_body`].
#[derive(Debug)]
pub struct AuthRejection(pub AuthError);

impl From<AuthError> for AuthRejection {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        error_body(&self.0)
    }
}

/// Outcome hooks for one adapter.
pub struct Callbacks<T> {
    on_success: Option<SuccessHandler<T>>,
    on_error: Option<ErrorHandler>,
    landing_path: String,
}

impl<T> Clone for Callbacks<T> {
    fn clone(&self) -> Self {
        Self {
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            landing_path: self.landing_path.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Callbacks<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("landing_path", &self.landing_path)
            .finish()
    }
}

impl<T> Callbacks<T> {
    /// Redirect to `landing_path` on success, generic 401 on error.
    pub fn new(landing_path: impl Into<String>) -> Self {
        Self {
            on_success: None,
            on_error: None,
            landing_path: landing_path.into(),
        }
    }

    /// Set the success hook.
    pub fn set_on_success(&mut self, handler: SuccessHandler<T>) {
        self.on_success = Some(handler);
    }

    /// Set the error hook.
    pub fn set_on_error(&mut self, handler: ErrorHandler) {
        self.on_error = Some(handler);
    }

    /// Response for a successful login.
    pub fn success(&self, outcome: &T) -> Response {
        match &self.on_success {
            Some(handler) => handler(outcome),
            None => Redirect::to(&self.landing_path).into_response(),
        }
    }

    /// Log a failed attempt and build its response.
    pub fn failure(&self, protocol: &'static str, err: &AuthError) -> Response {
        if err.is_server_error() {
            tracing::error!(protocol, error = %err, code = err.error_code(), "Login failed");
        } else {
            tracing::warn!(protocol, error = %err, code = err.error_code(), "Login rejected");
        }

        match &self.on_error {
            Some(handler) => handler(err),
            None => error_body(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::LOCATION;

    #[test]
    fn test_default_success_redirects() {
        let callbacks: Callbacks<()> = Callbacks::new("/dashboard");
        let response = callbacks.success(&());
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[LOCATION], "/dashboard");
    }

    #[test]
    fn test_default_failure_is_unauthorized() {
        let callbacks: Callbacks<()> = Callbacks::new("/");
        let response = callbacks.failure("oauth2", &AuthError::InvalidState);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_custom_handlers() {
        let mut callbacks: Callbacks<u32> = Callbacks::new("/");
        callbacks.set_on_success(Arc::new(|n: &u32| {
            (StatusCode::OK, format!("welcome {}", n)).into_response()
        }));
        callbacks.set_on_error(Arc::new(|_: &AuthError| StatusCode::FORBIDDEN.into_response()));

        assert_eq!(callbacks.success(&7).status(), StatusCode::OK);
        assert_eq!(
            callbacks.failure("saml", &AuthError::MissingState).status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_server_errors_hide_detail() {
        let err = AuthError::Internal("db password rejected".to_string());
        let response = error_body(&err);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_rejection_into_response() {
        let response = AuthRejection::from(AuthError::SessionExpired).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
