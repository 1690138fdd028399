//! 同步配置
//!
//! 配置在进程启动时加载一次，构造成不可变对象显式传入每个组件，
//! 不使用全局单例查找。字段值在加载时即视为已校验。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{SyncError, SyncResult};

/// 落盘策略选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    /// 打包提交到评审工作流（默认），核心不直接写主分支
    Review,
    /// 直接写入本地文件系统，用于本地/测试执行
    Direct,
}

impl Default for ApplyMode {
    fn default() -> Self {
        Self::Review
    }
}

/// 生成模型设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// LLM API 密钥（缺省时读 DOCSYNC_API_KEY 环境变量）
    #[serde(default = "default_api_key")]
    pub api_key: String,

    /// LLM API 基础 URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// 模型名称
    #[serde(default = "default_model")]
    pub model: String,

    /// 温度参数 (0.0 - 2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// 最大输出 token 数
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// 单次请求超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_key() -> String {
    std::env::var("DOCSYNC_API_KEY").unwrap_or_default()
}

fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f64 {
    0.3
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// 文档更新规则开关，每个开关对应 prompt 中一条明确的指令
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRules {
    /// 保留原文语气
    #[serde(default = "default_true")]
    pub preserve_tone: bool,

    /// 保留原文结构与风格
    #[serde(default = "default_true")]
    pub preserve_style: bool,

    /// 更新已变化的技术细节
    #[serde(default = "default_true")]
    pub update_technical_details: bool,

    /// 同步更新代码示例
    #[serde(default)]
    pub update_examples: bool,

    /// 追加破坏性变更章节
    #[serde(default)]
    pub add_breaking_changes: bool,
}

fn default_true() -> bool {
    true
}

impl Default for UpdateRules {
    fn default() -> Self {
        Self {
            preserve_tone: true,
            preserve_style: true,
            update_technical_details: true,
            update_examples: false,
            add_breaking_changes: false,
        }
    }
}

/// Prompt 预算
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PromptBudget {
    /// 组装后 prompt 的最大字符数
    #[serde(default = "default_max_prompt_chars")]
    pub max_chars: usize,

    /// 超预算时每个 diff 块保留的最大行数
    #[serde(default = "default_diff_line_cap")]
    pub diff_line_cap: usize,
}

fn default_max_prompt_chars() -> usize {
    60_000
}

fn default_diff_line_cap() -> usize {
    120
}

impl Default for PromptBudget {
    fn default() -> Self {
        Self {
            max_chars: default_max_prompt_chars(),
            diff_line_cap: default_diff_line_cap(),
        }
    }
}

/// 重试设置
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrySettings {
    /// 最大尝试次数（含首次）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// 指数退避的基础延迟（毫秒）
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// 同步配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// 仓库根目录
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,

    /// 对比基准修订（默认上一次提交）
    #[serde(default = "default_base_rev")]
    pub base_rev: String,

    /// 对比目标修订
    #[serde(default = "default_head_rev")]
    pub head_rev: String,

    /// 对比工作区与 HEAD（未提交运行）
    #[serde(default)]
    pub working_tree: bool,

    /// 监控的文件扩展名（含点号）
    #[serde(default = "default_monitored_extensions")]
    pub monitored_extensions: Vec<String>,

    /// 排除的 glob 模式，排除永远优先于监控
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    /// 需要同步的文档文件路径（相对仓库根目录）
    #[serde(default = "default_documentation_files")]
    pub documentation_files: Vec<String>,

    /// 文档中必须保留的章节标题
    #[serde(default)]
    pub mandatory_sections: Vec<String>,

    /// 模型设置
    #[serde(default)]
    pub model: ModelSettings,

    /// 更新规则
    #[serde(default)]
    pub update_rules: UpdateRules,

    /// Prompt 预算
    #[serde(default)]
    pub prompt: PromptBudget,

    /// 重试设置
    #[serde(default)]
    pub retry: RetrySettings,

    /// 落盘策略
    #[serde(default)]
    pub apply_mode: ApplyMode,

    /// 生成调用并行数（1-10）
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// 生成调用限速（每分钟请求数）
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_base_rev() -> String {
    "HEAD~1".to_string()
}

fn default_head_rev() -> String {
    "HEAD".to_string()
}

fn default_monitored_extensions() -> Vec<String> {
    vec![
        ".py".to_string(),
        ".js".to_string(),
        ".jsx".to_string(),
        ".ts".to_string(),
        ".tsx".to_string(),
    ]
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/tests/**".to_string(),
        "**/test_*".to_string(),
        "**/node_modules/**".to_string(),
        "**/__pycache__/**".to_string(),
    ]
}

fn default_documentation_files() -> Vec<String> {
    vec!["README.md".to_string()]
}

fn default_concurrency() -> usize {
    3
}

fn default_requests_per_minute() -> u32 {
    20
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            repo_path: default_repo_path(),
            base_rev: default_base_rev(),
            head_rev: default_head_rev(),
            working_tree: false,
            monitored_extensions: default_monitored_extensions(),
            exclude_patterns: default_exclude_patterns(),
            documentation_files: default_documentation_files(),
            mandatory_sections: Vec::new(),
            model: ModelSettings::default(),
            update_rules: UpdateRules::default(),
            prompt: PromptBudget::default(),
            retry: RetrySettings::default(),
            apply_mode: ApplyMode::default(),
            concurrency: default_concurrency(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

impl SyncConfig {
    /// 从 JSON 文件加载配置
    pub fn load(path: &Path) -> SyncResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("读取配置文件 {} 失败: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| SyncError::Config(format!("解析配置文件 {} 失败: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.base_rev, "HEAD~1");
        assert_eq!(config.head_rev, "HEAD");
        assert!(config.monitored_extensions.contains(&".py".to_string()));
        assert_eq!(config.documentation_files, vec!["README.md".to_string()]);
        assert_eq!(config.apply_mode, ApplyMode::Review);
        assert_eq!(config.retry.max_attempts, 3);
        assert!((config.model.temperature - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"documentation_files": ["docs/API.md"], "apply_mode": "direct"}"#)
                .unwrap();
        assert_eq!(config.documentation_files, vec!["docs/API.md".to_string()]);
        assert_eq!(config.apply_mode, ApplyMode::Direct);
        assert_eq!(config.prompt.max_chars, 60_000);
        assert!(config.update_rules.preserve_tone);
    }
}
