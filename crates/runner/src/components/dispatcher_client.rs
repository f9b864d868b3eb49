use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use fileflow_core::{
    CompletionReport, HelloRequest, HelloResponse, LogAppendRequest, NextFileRequest,
    NextFileResult, SchedulerError, SchedulerResult,
};

/// 服务端响应的外层结构
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

/// 访问调度服务端的HTTP客户端
#[derive(Debug, Clone)]
pub struct DispatcherClient {
    base_url: String,
    access_token: Option<String>,
    http_client: reqwest::Client,
}

impl DispatcherClient {
    pub fn new(base_url: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
            http_client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Runner推送通道的WebSocket地址
    pub fn channel_url(&self, runner_uid: Uuid) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{ws_base}/api/runner/{runner_uid}/channel")
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> SchedulerResult<Option<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http_client.post(&url).json(body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SchedulerError::Network(format!("请求 {url} 失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("请求 {} 失败: HTTP {} - {}", url, status, body);
            return Err(SchedulerError::Network(format!(
                "请求 {url} 失败: HTTP {status} - {body}"
            )));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| SchedulerError::Network(format!("解析 {url} 响应失败: {e}")))?;
        if !envelope.success {
            return Err(SchedulerError::Network(
                envelope.message.unwrap_or_else(|| format!("请求 {url} 失败")),
            ));
        }
        debug!("请求 {} 成功", url);
        Ok(envelope.data)
    }

    pub async fn next_file(&self, request: &NextFileRequest) -> SchedulerResult<NextFileResult> {
        self.post("/api/node/next-file", request)
            .await?
            .ok_or_else(|| SchedulerError::Network("领取文件响应缺少数据".to_string()))
    }

    pub async fn hello(&self, request: &HelloRequest) -> SchedulerResult<HelloResponse> {
        self.post("/api/runner/hello", request)
            .await?
            .ok_or_else(|| SchedulerError::Network("心跳响应缺少数据".to_string()))
    }

    pub async fn append_log(&self, request: &LogAppendRequest) -> SchedulerResult<()> {
        self.post::<_, serde_json::Value>("/api/runner/log", request)
            .await
            .map(|_| ())
    }

    pub async fn complete(&self, report: &CompletionReport) -> SchedulerResult<()> {
        self.post::<_, serde_json::Value>("/api/runner/complete", report)
            .await
            .map(|_| ())
    }
}
