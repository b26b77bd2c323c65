//! Plain HTTP handlers and the JSON error response shared by every route.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use sales_agent_core::ConfigurationError;
use serde::Serialize;
use tracing::{error, warn};

/// The body returned with every non-2xx response.
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub message: String,
}

pub enum ApiError {
    BadRequest(String),
    UpgradeRequired,
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                warn!(%message, "Rejecting request");
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::UpgradeRequired => (
                StatusCode::UPGRADE_REQUIRED,
                Json(ErrorResponse {
                    message: "Expected WebSocket".to_string(),
                }),
            )
                .into_response(),
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl From<ConfigurationError> for ApiError {
    fn from(err: ConfigurationError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalServerError(err)
    }
}

/// Liveness probe.
pub async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_maps_to_bad_request() {
        let err = ApiError::from(ConfigurationError::MissingDynamicVariable(
            "booking_id".to_string(),
        ));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_upgrade_required_status() {
        let response = ApiError::UpgradeRequired.into_response();
        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
    }

    #[test]
    fn test_internal_error_hides_details() {
        let response = ApiError::from(anyhow::anyhow!("secret detail")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_health() {
        assert_eq!(health().await, "ok");
    }
}
