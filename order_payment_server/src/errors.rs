use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use log::error;
use order_payment_engine::PaymentGatewayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("Payload deserialization error. {0}")]
    CouldNotDeserializePayload(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
    #[error("Authentication Error. {0}")]
    AuthenticationError(#[from] AuthError),
    #[error("{0}")]
    EngineError(#[from] PaymentGatewayError),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::CouldNotDeserializePayload(_) => StatusCode::BAD_REQUEST,
            Self::InvalidRequestPath(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationError(e) => match e {
                AuthError::MissingAdminKey => StatusCode::UNAUTHORIZED,
                AuthError::InvalidAdminKey => StatusCode::UNAUTHORIZED,
                AuthError::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
            },
            Self::EngineError(e) => engine_status_code(e),
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("💻️ {status} response: {self}");
        }
        HttpResponse::build(status)
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

fn engine_status_code(e: &PaymentGatewayError) -> StatusCode {
    match e {
        PaymentGatewayError::ValidationError(_) => StatusCode::BAD_REQUEST,
        PaymentGatewayError::Unauthorized(_) => StatusCode::FORBIDDEN,
        PaymentGatewayError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        PaymentGatewayError::NotFound(_) => StatusCode::NOT_FOUND,
        PaymentGatewayError::InvalidTransition { .. } => StatusCode::CONFLICT,
        PaymentGatewayError::Conflict(_) => StatusCode::CONFLICT,
        PaymentGatewayError::DuplicateAction(_) => StatusCode::CONFLICT,
        PaymentGatewayError::AmountMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PaymentGatewayError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        PaymentGatewayError::Exhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
        PaymentGatewayError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("No admin key was provided.")]
    MissingAdminKey,
    #[error("The admin key is not valid.")]
    InvalidAdminKey,
    #[error("Insufficient Permissions. {0}")]
    InsufficientPermissions(String),
}
