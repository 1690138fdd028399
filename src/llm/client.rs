//! 生成客户端
//!
//! 在传输层之上叠加两件事：瞬时错误的有界指数退避重试，
//! 以及模型回复的语义解释（哨兵识别与 markdown 围栏清洗）。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::transport::ChatTransport;
use super::types::{GenerationResult, GenerationStatus, ModelConfig};
use crate::config::RetrySettings;
use crate::error::{SyncError, SyncResult};
use crate::services::prompt::NO_CHANGES_SENTINEL;

/// 重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 首次重试前的延迟，之后逐次翻倍
    pub base_delay: Duration,
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// 第 attempt 次失败后的退避时长（attempt 从 1 起）
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// 简单令牌桶限速器，按每分钟请求数补充
pub struct RateLimiter {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn per_minute(requests: u32) -> Self {
        let capacity = f64::from(requests.max(1));
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: capacity / 60.0,
        }
    }

    /// 取得一个令牌，不足时挂起等待
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };
            sleep(wait).await;
        }
    }
}

/// 生成客户端
pub struct GenerationClient {
    transport: Arc<dyn ChatTransport>,
    config: ModelConfig,
    policy: RetryPolicy,
}

impl GenerationClient {
    pub fn new(transport: Arc<dyn ChatTransport>, config: ModelConfig, policy: RetryPolicy) -> Self {
        Self {
            transport,
            config,
            policy,
        }
    }

    /// 发送一次生成请求，瞬时错误自动重试
    ///
    /// 致命错误立刻返回不重试；重试耗尽后瞬时错误升级为致命错误。
    pub async fn send(&self, prompt: &str) -> SyncResult<GenerationResult> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.transport.complete(prompt, &self.config).await {
                Ok(completion) => {
                    return Ok(interpret_response(
                        &completion.content,
                        &self.config.model,
                        attempt,
                        completion.finish_reason,
                    ));
                }
                Err(SyncError::GenerationTransient(reason)) => {
                    if attempt >= self.policy.max_attempts {
                        return Err(SyncError::GenerationFatal(format!(
                            "重试 {} 次后仍失败: {}",
                            attempt, reason
                        )));
                    }
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        "生成请求瞬时失败 (第 {}/{} 次)，{} 毫秒后重试: {}",
                        attempt,
                        self.policy.max_attempts,
                        delay.as_millis(),
                        reason
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// 把模型回复解释成生成结果
///
/// 裁决顺序固定：先精确哨兵，再嵌入哨兵，最后按更新内容清洗。
pub fn interpret_response(
    raw: &str,
    model: &str,
    attempts: u32,
    finish_reason: Option<String>,
) -> GenerationResult {
    let trimmed = raw.trim();

    let status = if trimmed == NO_CHANGES_SENTINEL {
        GenerationStatus::NoChanges
    } else if trimmed.contains(NO_CHANGES_SENTINEL) {
        // 哨兵混在其他内容里，不猜测模型意图
        GenerationStatus::Ambiguous
    } else {
        GenerationStatus::Updated
    };

    let content = if status == GenerationStatus::Updated {
        strip_markdown_fence(trimmed)
    } else {
        String::new()
    };

    debug!("生成结果: status={:?} attempts={}", status, attempts);

    GenerationResult {
        status,
        content,
        model: model.to_string(),
        attempts,
        finish_reason,
    }
}

/// 剥掉模型习惯性包裹的最外层 ``` 围栏
///
/// 只处理整段回复恰好是一个代码块的情况，文档内部的围栏不受影响。
fn strip_markdown_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") || !trimmed.ends_with("```") {
        return trimmed.to_string();
    }

    let Some(first_newline) = trimmed.find('\n') else {
        return trimmed.to_string();
    };
    let fence_label = &trimmed[3..first_newline];
    if !fence_label.trim().is_empty() && fence_label.trim() != "markdown" && fence_label.trim() != "md" {
        return trimmed.to_string();
    }

    let inner = &trimmed[first_newline + 1..];
    let Some(closing) = inner.rfind("```") else {
        return trimmed.to_string();
    };
    // 内部还有围栏时说明整段不是单一代码块，原样保留
    if inner[..closing].contains("```") {
        return trimmed.to_string();
    }
    inner[..closing].trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::transport::ChatCompletion;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 按脚本依次返回预设结果的桩传输
    struct ScriptedTransport {
        responses: Vec<SyncResult<ChatCompletion>>,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<SyncResult<ChatCompletion>>) -> Self {
            Self {
                responses,
                calls: AtomicU32::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn complete(&self, _prompt: &str, _config: &ModelConfig) -> SyncResult<ChatCompletion> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match &self.responses[index.min(self.responses.len() - 1)] {
                Ok(c) => Ok(c.clone()),
                Err(SyncError::GenerationTransient(r)) => {
                    Err(SyncError::GenerationTransient(r.clone()))
                }
                Err(SyncError::GenerationFatal(r)) => Err(SyncError::GenerationFatal(r.clone())),
                Err(_) => unreachable!(),
            }
        }
    }

    fn client(transport: ScriptedTransport, max_attempts: u32) -> (GenerationClient, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        let config = ModelConfig {
            model: "gpt-4o".to_string(),
            temperature: 0.3,
            max_tokens: 4096,
        };
        let policy = RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        };
        (
            GenerationClient::new(transport.clone(), config, policy),
            transport,
        )
    }

    fn ok(content: &str) -> SyncResult<ChatCompletion> {
        Ok(ChatCompletion {
            content: content.to_string(),
            finish_reason: Some("stop".to_string()),
        })
    }

    #[test]
    fn test_exact_sentinel_is_no_changes() {
        let result = interpret_response("  NO_CHANGES_NEEDED\n", "m", 1, None);
        assert_eq!(result.status, GenerationStatus::NoChanges);
        assert!(result.content.is_empty());
    }

    #[test]
    fn test_embedded_sentinel_is_ambiguous() {
        let raw = "I think NO_CHANGES_NEEDED, but here is an updated intro:\n# Title";
        let result = interpret_response(raw, "m", 1, None);
        assert_eq!(result.status, GenerationStatus::Ambiguous);
        assert!(result.content.is_empty());
    }

    #[test]
    fn test_markdown_fence_is_stripped() {
        let raw = "```markdown\n# Title\n\nBody text.\n```";
        let result = interpret_response(raw, "m", 1, None);
        assert_eq!(result.status, GenerationStatus::Updated);
        assert_eq!(result.content, "# Title\n\nBody text.");
    }

    #[test]
    fn test_inner_fences_are_preserved() {
        // 回复本身不是单一代码块，原样保留
        let raw = "# Title\n\n```python\nprint(1)\n```\n";
        let result = interpret_response(raw, "m", 1, None);
        assert_eq!(result.status, GenerationStatus::Updated);
        assert!(result.content.contains("```python"));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let transport = ScriptedTransport::new(vec![
            Err(SyncError::GenerationTransient("timeout".to_string())),
            Err(SyncError::GenerationTransient("timeout".to_string())),
            ok("# Updated"),
        ]);
        let (client, transport) = client(transport, 3);

        let result = client.send("prompt").await.unwrap();
        assert_eq!(result.status, GenerationStatus::Updated);
        assert_eq!(result.attempts, 3);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_become_fatal() {
        let transport = ScriptedTransport::new(vec![Err(SyncError::GenerationTransient(
            "timeout".to_string(),
        ))]);
        let (client, transport) = client(transport, 3);

        let result = client.send("prompt").await;
        assert!(matches!(result, Err(SyncError::GenerationFatal(_))));
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(SyncError::GenerationFatal(
            "bad key".to_string(),
        ))]);
        let (client, transport) = client(transport, 3);

        let result = client.send("prompt").await;
        assert!(matches!(result, Err(SyncError::GenerationFatal(_))));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_rate_limiter_allows_burst_within_capacity() {
        let limiter = RateLimiter::per_minute(60);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        // 初始桶是满的，三次获取不应等待
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
