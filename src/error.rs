//! 统一错误处理模块
//!
//! 定义同步管线的错误分类。致命错误中止整个运行；非致命错误按文件或
//! 按文档累积到运行报告中，运行本身正常结束。

use thiserror::Error;

/// 同步管线错误枚举
#[derive(Error, Debug)]
pub enum SyncError {
    /// 仓库状态错误（非 git 仓库、版本区间无法解析）
    #[error("仓库状态错误: {0}")]
    RepositoryState(String),

    /// 源码解析失败（按文件跳过，不中止运行）
    #[error("解析失败 ({path}): {reason}")]
    Parse { path: String, reason: String },

    /// Prompt 超出预算且已无可丢弃的可选内容
    #[error("Prompt 预算不足: {0}")]
    PromptBudget(String),

    /// 生成请求的瞬时失败（超时、限流），可重试
    #[error("生成请求瞬时失败: {0}")]
    GenerationTransient(String),

    /// 生成请求的致命失败，中止该文档的更新，不影响其他文档
    #[error("生成请求失败: {0}")]
    GenerationFatal(String),

    /// 校验拒绝（内容未通过完整性检查），记录并跳过该文档
    #[error("校验拒绝 ({path}): {reason}")]
    ReconciliationRejected { path: String, reason: String },

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// 是否中止整个运行
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::RepositoryState(_)
                | SyncError::PromptBudget(_)
                | SyncError::Config(_)
                | SyncError::Io(_)
        )
    }
}

/// 便捷类型别名
pub type SyncResult<T> = Result<T, SyncError>;
