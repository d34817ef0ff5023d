use crate::client::LockApi;
use crate::error::ClientError;
use crate::identity::{HOLDER_ADMIN_HEADER, HOLDER_ID_HEADER, HOLDER_NAME_HEADER};
use crate::models::{
    codes, AcquireOutcome, ApiResponse, ConflictDetail, Holder, LockListResult, LockRecord,
    LockSettings, RenewOutcome, ResetLocksResult,
};
use async_trait::async_trait;
use reqwest::header::HeaderValue;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// 通过 HTTP 访问锁服务
#[derive(Debug, Clone)]
pub struct HttpLockClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpLockClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    /// 按路径段拼接 URL，pericope 引用中的空格等字符会被正确转义
    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn with_identity(request: RequestBuilder, holder: &Holder) -> Result<RequestBuilder, ClientError> {
        let id = HeaderValue::from_str(&holder.id)
            .map_err(|_| ClientError::InvalidIdentity(holder.id.clone()))?;
        // 显示名按 UTF-8 原始字节发送
        let name = HeaderValue::from_bytes(holder.name.as_bytes())
            .map_err(|_| ClientError::InvalidIdentity(holder.name.clone()))?;
        Ok(request.header(HOLDER_ID_HEADER, id).header(HOLDER_NAME_HEADER, name))
    }

    pub async fn settings(&self) -> Result<LockSettings, ClientError> {
        let response = self.http.get(self.url(&["api", "lock-settings"])?).send().await?;
        expect_data(response).await
    }

    pub async fn list_locks(&self) -> Result<Vec<LockRecord>, ClientError> {
        let response = self.http.get(self.url(&["api", "locks"])?).send().await?;
        let list: LockListResult = expect_data(response).await?;
        Ok(list.locks)
    }

    pub async fn reset_all(&self, admin: &Holder) -> Result<usize, ClientError> {
        let request = self.http.delete(self.url(&["api", "locks"])?);
        let response = Self::with_identity(request, admin)?
            .header(HOLDER_ADMIN_HEADER, "true")
            .send()
            .await?;
        let result: ResetLocksResult = expect_data(response).await?;
        Ok(result.cleared)
    }
}

async fn service_error(response: Response) -> ClientError {
    let status = response.status();
    match response.json::<ApiResponse<serde_json::Value>>().await {
        Ok(body) => ClientError::Service {
            code: body.code,
            message: body.message,
        },
        Err(_) => ClientError::Service {
            code: i32::from(status.as_u16()),
            message: format!("unexpected response status {}", status),
        },
    }
}

async fn expect_data<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    if !response.status().is_success() {
        return Err(service_error(response).await);
    }
    let body: ApiResponse<T> = response.json().await?;
    body.data.ok_or(ClientError::Service {
        code: body.code,
        message: "response carried no data".to_string(),
    })
}

#[async_trait]
impl LockApi for HttpLockClient {
    async fn acquire(&self, resource: &str, holder: &Holder) -> Result<AcquireOutcome, ClientError> {
        let request = self.http.post(self.url(&["api", "locks", resource])?);
        let response = Self::with_identity(request, holder)?.send().await?;

        if response.status() == StatusCode::CONFLICT {
            let body: ApiResponse<ConflictDetail> = response.json().await?;
            return match body.data {
                Some(detail) => Ok(AcquireOutcome::Conflict(detail)),
                None => Err(ClientError::Service {
                    code: body.code,
                    message: body.message,
                }),
            };
        }
        let record: LockRecord = expect_data(response).await?;
        Ok(AcquireOutcome::Granted(record))
    }

    async fn heartbeat(&self, resource: &str, holder: &Holder) -> Result<RenewOutcome, ClientError> {
        let request = self.http.put(self.url(&["api", "locks", resource, "heartbeat"])?);
        let response = Self::with_identity(request, holder)?.send().await?;

        if response.status().is_success() {
            return Ok(RenewOutcome::Renewed);
        }
        match service_error(response).await {
            ClientError::Service {
                code: codes::HEARTBEAT_NOT_FOUND,
                ..
            } => Ok(RenewOutcome::NotFound),
            ClientError::Service {
                code: codes::HEARTBEAT_NOT_OWNER,
                ..
            } => Ok(RenewOutcome::NotOwner),
            other => Err(other),
        }
    }

    async fn unlock(&self, resource: &str, holder: &Holder) -> Result<(), ClientError> {
        let request = self.http.delete(self.url(&["api", "locks", resource])?);
        let response = Self::with_identity(request, holder)?.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(service_error(response).await)
        }
    }

    async fn list_mine(&self, holder: &Holder) -> Result<Vec<LockRecord>, ClientError> {
        let mut url = self.url(&["api", "locks"])?;
        url.query_pairs_mut().append_pair("mine", "true");
        let response = Self::with_identity(self.http.get(url), holder)?.send().await?;
        let list: LockListResult = expect_data(response).await?;
        Ok(list.locks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_is_escaped_as_a_single_path_segment() {
        let client = HttpLockClient::new("http://127.0.0.1:8080").unwrap();
        let url = client.url(&["api", "locks", "Ruth 1:1-5", "heartbeat"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8080/api/locks/Ruth%201:1-5/heartbeat"
        );
    }

    #[test]
    fn base_path_is_preserved() {
        let client = HttpLockClient::new("http://example.com/lock-service/").unwrap();
        let url = client.url(&["api", "locks"]).unwrap();
        assert_eq!(url.as_str(), "http://example.com/lock-service/api/locks");
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(matches!(
            HttpLockClient::new("not a url"),
            Err(ClientError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpLockClient::new("mailto:someone@example.com"),
            Err(ClientError::InvalidUrl(_))
        ));
    }
}
