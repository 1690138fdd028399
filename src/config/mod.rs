//! 配置模块

mod sync_config;

pub use sync_config::{
    ApplyMode, ModelSettings, PromptBudget, RetrySettings, SyncConfig, UpdateRules,
};
