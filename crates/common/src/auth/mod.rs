//! Admin identity extraction
//!
//! Every mutating endpoint is admin-only. Authentication itself terminates
//! at the edge proxy; by the time a request reaches the gateway it carries a
//! trusted `X-Admin-Id` header. This module extracts it into an
//! [`AdminContext`] handlers take as an argument.

use crate::errors::{AppError, Result};
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

/// Identity of the admin behind the current request.
#[derive(Debug, Clone)]
pub struct AdminContext {
    /// Admin user ID
    pub admin_id: Uuid,

    /// Request ID for tracing
    pub request_id: String,
}

/// Axum extractor for AdminContext
impl<S> FromRequestParts<S> for AdminContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let request_id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let admin_id = parts
            .headers
            .get("x-admin-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing or invalid X-Admin-Id header".to_string(),
            })?;

        Ok(AdminContext {
            admin_id,
            request_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<AdminContext> {
        let (mut parts, _) = request.into_parts();
        AdminContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn valid_header_yields_context() {
        let admin_id = Uuid::new_v4();
        let request = Request::builder()
            .header("x-admin-id", admin_id.to_string())
            .header("x-request-id", "req-1")
            .body(())
            .unwrap();

        let ctx = extract(request).await.unwrap();
        assert_eq!(ctx.admin_id, admin_id);
        assert_eq!(ctx.request_id, "req-1");
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let request = Request::builder().body(()).unwrap();
        assert!(matches!(
            extract(request).await,
            Err(AppError::Unauthorized { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_id_is_unauthorized() {
        let request = Request::builder()
            .header("x-admin-id", "not-a-uuid")
            .body(())
            .unwrap();
        assert!(extract(request).await.is_err());
    }

    #[tokio::test]
    async fn request_id_is_generated_when_absent() {
        let request = Request::builder()
            .header("x-admin-id", Uuid::new_v4().to_string())
            .body(())
            .unwrap();
        let ctx = extract(request).await.unwrap();
        assert!(Uuid::parse_str(&ctx.request_id).is_ok());
    }
}
