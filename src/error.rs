use crate::models::{codes, ApiResponse};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

/// HTTP 接口错误；冲突、心跳失败等预期结果不走这里
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid identity header: {0}")]
    MissingIdentity(&'static str),

    #[error("administrator privileges required")]
    AdminRequired,

    #[error("lock storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl ApiError {
    pub fn code(&self) -> i32 {
        match self {
            ApiError::MissingIdentity(_) => codes::MISSING_IDENTITY,
            ApiError::AdminRequired => codes::ADMIN_REQUIRED,
            ApiError::Storage(_) => codes::STORAGE_FAILURE,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingIdentity(_) => StatusCode::BAD_REQUEST,
            ApiError::AdminRequired => StatusCode::FORBIDDEN,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ApiError::Storage(e) = self {
            log::error!("Lock storage failure: {:#}", e);
        }
        HttpResponse::build(self.status_code())
            .json(ApiResponse::<serde_json::Value>::error(self.code(), self.to_string()))
    }
}

/// 客户端错误：网络/服务端故障，或会话使用不当
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("lock service error ({code}): {message}")]
    Service { code: i32, message: String },

    #[error("invalid lock service url: {0}")]
    InvalidUrl(String),

    #[error("identity cannot be sent as a header: {0}")]
    InvalidIdentity(String),

    #[error("session already holds {0}")]
    AlreadyHolding(String),

    #[error("session is busy: {0}")]
    Busy(&'static str),
}

impl From<anyhow::Error> for ClientError {
    fn from(e: anyhow::Error) -> Self {
        ClientError::Service {
            code: codes::STORAGE_FAILURE,
            message: format!("{:#}", e),
        }
    }
}
