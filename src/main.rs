//! docsync-rs 入口
//!
//! 读取配置，组装同步管线并执行一次运行。
//! Ctrl-C 触发协作式取消，在阶段边界停止。

mod config;
mod error;
mod llm;
mod services;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{ApplyMode, SyncConfig};
use llm::HttpTransport;
use services::pipeline::{CancelFlag, SyncPipeline};
use services::reconciler::{ApplyStrategy, DirectApplyStrategy, JsonHandoffWorkflow, ReviewStrategy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docsync_rs=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("docsync.json"));

    let config = if config_path.exists() {
        info!("加载配置: {}", config_path.display());
        SyncConfig::load(&config_path)?
    } else {
        warn!("配置文件 {} 不存在，使用默认配置", config_path.display());
        SyncConfig::default()
    };

    let transport = Arc::new(HttpTransport::new(&config.model)?);
    let strategy = build_strategy(&config);

    let pipeline = SyncPipeline::new(config, transport, strategy)
        .context("管线初始化失败")?;

    let cancel = CancelFlag::new();
    let signal_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到 Ctrl-C，请求取消");
            signal_flag.cancel();
        }
    });

    let report = pipeline.run(&cancel).await?;

    info!(
        "运行 {} 完成: 变更 {} 个文件，更新 {} / 无变化 {} / 待确认 {} / 失败 {}",
        report.run_id,
        report.changed_files,
        report.updated.len(),
        report.unchanged.len(),
        report.flagged.len(),
        report.failed.len()
    );
    for (path, reason) in &report.flagged {
        warn!("待人工确认: {} ({})", path, reason);
    }
    for (path, reason) in &report.failed {
        warn!("失败: {} ({})", path, reason);
    }

    if !report.failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

/// 按配置选择落盘策略
fn build_strategy(config: &SyncConfig) -> Box<dyn ApplyStrategy> {
    match config.apply_mode {
        ApplyMode::Direct => Box::new(DirectApplyStrategy::new(config.repo_path.clone())),
        ApplyMode::Review => {
            let handoff = config.repo_path.join(".docsync-review.json");
            Box::new(ReviewStrategy::new(Arc::new(JsonHandoffWorkflow::new(
                handoff,
            ))))
        }
    }
}
