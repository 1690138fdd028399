//! LLM 数据类型定义

use serde::Serialize;

/// 单次请求的模型参数
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// 生成结果的语义分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    /// 模型产出了更新后的文档内容
    Updated,
    /// 模型精确返回了哨兵，文档无需更新
    NoChanges,
    /// 回复中嵌入了哨兵但不止于哨兵，语义不明，交人工确认
    Ambiguous,
}

/// 一次生成调用的最终结果
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub status: GenerationStatus,
    /// Updated 时为清洗后的文档内容，其余为空
    pub content: String,
    pub model: String,
    /// 实际发起的请求次数（含重试）
    pub attempts: u32,
    pub finish_reason: Option<String>,
}
