use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use shiftfill_core::{DispatchError, DispatchResult};

/// 外部服务类别，决定HTTP错误映射到哪种领域错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Scheduling,
    Gateway,
    Intent,
    Notifier,
}

impl Upstream {
    fn name(&self) -> &'static str {
        match self {
            Upstream::Scheduling => "排班系统",
            Upstream::Gateway => "短信/语音网关",
            Upstream::Intent => "意图识别服务",
            Upstream::Notifier => "人工升级通道",
        }
    }

    /// 429和5xx可以重试，其余4xx是永久错误
    pub fn status_error(&self, status: StatusCode, body: &str) -> DispatchError {
        let message = format!("{} 返回 {}: {}", self.name(), status, body.trim());
        let retryable = status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error();
        match (self, retryable) {
            (Upstream::Scheduling, true) => DispatchError::SchedulingSystem(message),
            (Upstream::Scheduling, false) => DispatchError::CommitRejected(message),
            (Upstream::Gateway, true) => DispatchError::TransientGateway(message),
            (Upstream::Gateway, false) => DispatchError::PermanentGateway(message),
            (Upstream::Intent | Upstream::Notifier, true) => DispatchError::Network(message),
            (Upstream::Intent | Upstream::Notifier, false) => DispatchError::Internal(message),
        }
    }

    pub fn transport_error(&self, err: reqwest::Error) -> DispatchError {
        if err.is_timeout() {
            DispatchError::Timeout(format!("{} 请求超时: {}", self.name(), err))
        } else if err.is_decode() {
            DispatchError::Serialization(format!("{} 响应无法解析: {}", self.name(), err))
        } else {
            DispatchError::Network(format!("{} 请求失败: {}", self.name(), err))
        }
    }
}

/// 带基础地址、超时和鉴权的 JSON 客户端
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    upstream: Upstream,
}

impl HttpClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
        upstream: Upstream,
    ) -> DispatchResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::config_error(format!("HTTP客户端创建失败: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            upstream,
        })
    }

    pub fn upstream(&self) -> Upstream {
        self.upstream
    }

    pub fn url(&self, path: &str) -> String {
        if path.is_empty() {
            return self.base_url.clone();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// 发送请求，不检查状态码
    pub async fn send(&self, request: RequestBuilder) -> DispatchResult<Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| self.upstream.transport_error(e))
    }

    /// 非2xx状态码转换为领域错误
    pub async fn check(&self, response: Response) -> DispatchResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(self.upstream.status_error(status, &body))
    }

    pub async fn json<T: DeserializeOwned>(&self, response: Response) -> DispatchResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| self.upstream.transport_error(e))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> DispatchResult<T> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        let response = self.send(self.client.get(&url)).await?;
        let response = self.check(response).await?;
        self.json(response).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> DispatchResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        debug!(url = %url, "POST");
        let response = self.send(self.client.post(&url).json(body)).await?;
        let response = self.check(response).await?;
        self.json(response).await
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path))
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.client.put(self.url(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = Upstream::Gateway.status_error(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(err, DispatchError::TransientGateway(_)));
        assert!(err.is_retryable());

        let err = Upstream::Gateway.status_error(StatusCode::BAD_REQUEST, "invalid number");
        assert!(matches!(err, DispatchError::PermanentGateway(_)));
        assert!(!err.is_retryable());

        let err = Upstream::Scheduling.status_error(StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(err.is_retryable());
        let err = Upstream::Scheduling.status_error(StatusCode::UNPROCESSABLE_ENTITY, "");
        assert!(matches!(err, DispatchError::CommitRejected(_)));
    }

    #[test]
    fn test_url_joining() {
        let client = HttpClient::new(
            "http://localhost:8081/api/",
            None,
            Duration::from_secs(1),
            Upstream::Scheduling,
        )
        .unwrap();
        assert_eq!(client.url("/gaps/g-1"), "http://localhost:8081/api/gaps/g-1");
        assert_eq!(client.url("gaps"), "http://localhost:8081/api/gaps");
        assert_eq!(client.url(""), "http://localhost:8081/api");
    }
}
