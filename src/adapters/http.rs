use crate::core::resolver::ProxyResolver;
use crate::domain::model::{AssignmentRecord, ErrorBody, ResolveRequest};
use crate::domain::ports::{ConfigStore, ProcessSupervisor};
use crate::utils::error::{ProxyError, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type ApiError = (StatusCode, Json<ErrorBody>);

/// Builds the API router around a shared resolver.
pub fn router<S, P>(resolver: Arc<ProxyResolver<S, P>>) -> Router
where
    S: ConfigStore + 'static,
    P: ProcessSupervisor + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/api/proxy/resolve", post(resolve::<S, P>))
        .route("/api/proxy/assignments", get(list_assignments::<S, P>))
        .with_state(resolver)
}

/// Serves `app` on `addr` until `shutdown` completes.
pub async fn serve(
    addr: SocketAddr,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// HTTP status for a failed resolution.
pub fn status_for(error: &ProxyError) -> StatusCode {
    match error {
        ProxyError::InvalidDescriptor { .. } => StatusCode::BAD_REQUEST,
        ProxyError::NoAvailablePort { .. } | ProxyError::ProviderUnavailable { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ProxyError::ProvisioningFailed { .. } | ProxyError::SupervisorError { .. } => {
            StatusCode::BAD_GATEWAY
        }
        // nginx 的 "client closed request"
        ProxyError::Cancelled => {
            StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &ProxyError) -> ApiError {
    (status_for(error), Json(ErrorBody::new(error.to_string())))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn resolve<S, P>(
    State(resolver): State<Arc<ProxyResolver<S, P>>>,
    body: std::result::Result<Json<ResolveRequest>, JsonRejection>,
) -> std::result::Result<Json<String>, ApiError>
where
    S: ConfigStore + 'static,
    P: ProcessSupervisor + 'static,
{
    let Json(request) = body.map_err(|rejection| {
        tracing::debug!("Rejected resolve body: {}", rejection);
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody::new(rejection.body_text())),
        )
    })?;

    // 客戶端斷線時 handler future 被丟棄，guard 會取消 readiness 等待
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match resolver.resolve_with_cancel(&request, &cancel).await {
        Ok(outcome) => Ok(Json(outcome.descriptor.to_string())),
        Err(e) => {
            tracing::warn!("Resolve of '{}' failed: {}", request.descriptor, e);
            Err(error_response(&e))
        }
    }
}

async fn list_assignments<S, P>(
    State(resolver): State<Arc<ProxyResolver<S, P>>>,
) -> std::result::Result<Json<Vec<AssignmentRecord>>, ApiError>
where
    S: ConfigStore + 'static,
    P: ProcessSupervisor + 'static,
{
    resolver
        .list_assignments()
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&ProxyError::invalid_descriptor("x", "bad")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ProxyError::NoAvailablePort { min: 1, max: 2 }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&ProxyError::ProviderUnavailable { target: "ZZ".into() }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&ProxyError::ProvisioningFailed {
                attempts: 10,
                message: "down".into()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(status_for(&ProxyError::Cancelled).as_u16(), 499);
        assert_eq!(
            status_for(&ProxyError::ConfigError {
                message: "oops".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
