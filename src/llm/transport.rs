//! 聊天补全传输层
//!
//! ChatTransport 把"发一段 prompt，拿一段文本"抽象成单个异步方法，
//! 上层的重试与哨兵解释不感知 HTTP 细节，测试时可以换成桩实现。

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::types::ModelConfig;
use crate::config::ModelSettings;
use crate::error::{SyncError, SyncResult};

/// 传输层返回的原始补全
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub finish_reason: Option<String>,
}

/// 聊天补全传输抽象
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn complete(&self, prompt: &str, config: &ModelConfig) -> SyncResult<ChatCompletion>;
}

/// OpenAI 兼容接口的 HTTP 传输实现
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl HttpTransport {
    /// 创建 HTTP 传输，配置不合法时直接报错
    pub fn new(settings: &ModelSettings) -> SyncResult<Self> {
        if settings.api_key.is_empty() {
            return Err(SyncError::Config(
                "缺少 API 密钥，请设置 DOCSYNC_API_KEY 或在配置中提供".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SyncError::Config(format!("HTTP 客户端构建失败: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }

    /// HTTP 状态码到错误类别的映射
    ///
    /// 429 与 5xx 视为瞬时错误可重试，4xx 的其余情况视为致命。
    fn classify_status(status: StatusCode, body: &str) -> SyncError {
        let detail = format!("上游返回 {}: {}", status, body.chars().take(200).collect::<String>());
        if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            SyncError::GenerationTransient(detail)
        } else {
            SyncError::GenerationFatal(detail)
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn complete(&self, prompt: &str, config: &ModelConfig) -> SyncResult<ChatCompletion> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let payload = json!({
            "model": config.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": config.temperature,
            "max_tokens": config.max_tokens,
            "stream": false,
        });

        debug!("发送补全请求: model={} url={}", config.model, url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                // 超时与连接失败都是瞬时错误
                if e.is_timeout() || e.is_connect() {
                    SyncError::GenerationTransient(format!("请求失败: {}", e))
                } else {
                    SyncError::GenerationFatal(format!("请求失败: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| SyncError::GenerationFatal(format!("响应解析失败: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::GenerationFatal("响应不含任何 choice".to_string()))?;

        Ok(ChatCompletion {
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let transient = HttpTransport::classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(transient, SyncError::GenerationTransient(_)));

        let transient = HttpTransport::classify_status(StatusCode::BAD_GATEWAY, "");
        assert!(matches!(transient, SyncError::GenerationTransient(_)));

        let fatal = HttpTransport::classify_status(StatusCode::UNAUTHORIZED, "bad key");
        assert!(matches!(fatal, SyncError::GenerationFatal(_)));

        let fatal = HttpTransport::classify_status(StatusCode::BAD_REQUEST, "bad payload");
        assert!(matches!(fatal, SyncError::GenerationFatal(_)));
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let settings = ModelSettings {
            api_key: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            HttpTransport::new(&settings),
            Err(SyncError::Config(_))
        ));
    }
}
