use crate::error::ApiError;
use crate::models::Holder;
use actix_web::dev::Payload;
use actix_web::http::header::HeaderMap;
use actix_web::{FromRequest, HttpRequest};
use std::future::{ready, Ready};

pub const HOLDER_ID_HEADER: &str = "X-Holder-Id";
pub const HOLDER_NAME_HEADER: &str = "X-Holder-Name";
pub const HOLDER_ADMIN_HEADER: &str = "X-Holder-Admin";

/// 调用方身份。认证由上游完成，这里只信任它写入的请求头。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub holder: Holder,
    pub is_admin: bool,
}

impl Identity {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let id = header_str(headers, HOLDER_ID_HEADER)
            .filter(|id| !id.trim().is_empty())
            .ok_or(ApiError::MissingIdentity(HOLDER_ID_HEADER))?;
        // 没有显示名时退回到 id
        let name = header_str(headers, HOLDER_NAME_HEADER)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(id);
        let is_admin = header_str(headers, HOLDER_ADMIN_HEADER)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            holder: Holder::new(id.trim(), name.trim()),
            is_admin,
        })
    }
}

// 显示名可能是中文，按 UTF-8 解析原始字节
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| std::str::from_utf8(value.as_bytes()).ok())
}

impl FromRequest for Identity {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(Self::from_headers(req.headers()))
    }
}
