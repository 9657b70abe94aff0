use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use crate::error::{Error, UpstreamError};

impl Error {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            Error::InvalidRequest(_) | Error::InvalidTicker(_) | Error::InvalidCandle(_) => {
                (StatusCode::BAD_REQUEST, "invalid_request")
            }
            Error::Upstream(UpstreamError::InvalidEndpoint { .. }) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Error::Upstream(UpstreamError::Timeout { .. }) => (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout"),
            Error::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            Error::AggregateAllFailed { .. } => (StatusCode::BAD_GATEWAY, "aggregate_all_failed"),
            Error::SinkWrite(_) => (StatusCode::INTERNAL_SERVER_ERROR, "sink_write_failed"),
            Error::StorageUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let mut body = json!({ "error": kind, "detail": self.to_string() });
        match &self {
            Error::Upstream(upstream) => body["upstream"] = json!(upstream),
            Error::AggregateAllFailed { failures } => body["failures"] = json!(failures),
            Error::SinkWrite(failure) => body["failed_rows"] = json!(failure.failed),
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}
