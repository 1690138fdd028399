//! 业务服务层
//!
//! changeset 检测变更，analyzer 提取结构，prompt 组装上下文，
//! pipeline 负责编排，reconciler 负责对账与落盘。

pub mod analyzer;
pub mod changeset;
pub mod pipeline;
pub mod prompt;
pub mod reconciler;
