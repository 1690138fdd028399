//! 同步管线编排
//!
//! 状态机推进：Detecting → Analyzing → Composing → Generating →
//! Reconciling → Done。仓库级错误与 prompt 预算耗尽让整次运行失败，
//! 单文件解析错误与单文档生成失败只影响自身，兄弟文档继续推进。
//! 取消标志在阶段边界检查，已经在途的调用允许跑完。

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::analyzer::{self, FileAnalysis};
use super::changeset::{ChangeKind, ChangeSetResolver, ChangedFile, RevisionRange};
use super::prompt::{PromptComposer, PromptContext};
use super::reconciler::{
    ApplyStrategy, ChangeSummary, DocumentReconciler, DocumentUpdate, ReconcileOutcome,
};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::llm::{ChatTransport, GenerationClient, ModelConfig, RateLimiter, RetryPolicy};

/// 管线运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Detecting,
    Analyzing,
    Composing,
    Generating,
    Reconciling,
    Done,
}

/// 单次运行的结果报告
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub state: RunState,
    /// 进入分析阶段的变更文件数
    pub changed_files: usize,
    /// 产出结构分析的文件数
    pub analyzed_files: usize,
    /// 被跳过的源文件及原因
    pub skipped_files: Vec<(String, String)>,
    /// 已更新（或已暂存待评审）的文档
    pub updated: Vec<String>,
    /// 确认无需更新的文档
    pub unchanged: Vec<String>,
    /// 语义不明待人工确认的文档及原因
    pub flagged: Vec<(String, String)>,
    /// 生成或对账失败的文档及原因
    pub failed: Vec<(String, String)>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            state: RunState::Idle,
            changed_files: 0,
            analyzed_files: 0,
            skipped_files: Vec::new(),
            updated: Vec::new(),
            unchanged: Vec::new(),
            flagged: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// 协作式取消标志
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// 运行互斥锁，同一仓库同时只允许一次同步
///
/// 锁文件在 Drop 时删除，进程异常退出留下的锁需要手工清理。
struct RunLock {
    path: PathBuf,
}

impl RunLock {
    fn acquire(repo_path: &Path) -> SyncResult<Self> {
        let path = repo_path.join(".docsync.lock");
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(SyncError::RepositoryState(format!(
                    "锁文件 {} 已存在，另一次同步可能正在运行",
                    path.display()
                )))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// 同步管线
pub struct SyncPipeline {
    config: SyncConfig,
    resolver: ChangeSetResolver,
    composer: PromptComposer,
    client: GenerationClient,
    reconciler: DocumentReconciler,
    strategy: Box<dyn ApplyStrategy>,
    limiter: RateLimiter,
}

impl SyncPipeline {
    /// 组装管线，所有依赖显式注入
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn ChatTransport>,
        strategy: Box<dyn ApplyStrategy>,
    ) -> SyncResult<Self> {
        let resolver = ChangeSetResolver::new(
            config.repo_path.clone(),
            config.monitored_extensions.clone(),
            &config.exclude_patterns,
        )?;
        let composer = PromptComposer::new(config.update_rules.clone(), config.prompt);
        let client = GenerationClient::new(
            transport,
            ModelConfig {
                model: config.model.model.clone(),
                temperature: config.model.temperature,
                max_tokens: config.model.max_tokens,
            },
            RetryPolicy::from(config.retry),
        );
        let reconciler = DocumentReconciler::new(config.mandatory_sections.clone());
        let limiter = RateLimiter::per_minute(config.requests_per_minute);

        Ok(Self {
            config,
            resolver,
            composer,
            client,
            reconciler,
            strategy,
            limiter,
        })
    }

    fn revision_range(&self) -> RevisionRange {
        if self.config.working_tree {
            RevisionRange::WorkingTree
        } else {
            RevisionRange::Commits {
                base: self.config.base_rev.clone(),
                head: self.config.head_rev.clone(),
            }
        }
    }

    /// 执行一次完整同步
    pub async fn run(&self, cancel: &CancelFlag) -> SyncResult<RunReport> {
        let mut report = RunReport::new();
        info!("同步运行开始: run_id={}", report.run_id);

        // Detecting
        report.state = RunState::Detecting;
        let _lock = RunLock::acquire(&self.config.repo_path)?;
        let changes = self.resolver.resolve(&self.revision_range())?;
        report.changed_files = changes.len();

        if changes.is_empty() {
            // 区间内没有受监控的变更，本次运行正常结束
            info!("版本区间内没有受监控的变更文件");
            report.state = RunState::Done;
            return Ok(report);
        }
        if cancelled(cancel, &report) {
            return Ok(report);
        }

        // Analyzing
        report.state = RunState::Analyzing;
        let analyses = self.analyze_changes(&changes, &mut report).await;
        report.analyzed_files = analyses.len();
        if cancelled(cancel, &report) {
            return Ok(report);
        }

        let head_rev = self
            .resolver
            .head_revision()
            .map(|r| r.trim().to_string())
            .unwrap_or_else(|_| "worktree".to_string());

        self.run_documents(&mut report, &changes, &analyses, head_rev, cancel)
            .await?;

        report.state = RunState::Done;
        info!(
            "同步运行结束: updated={} unchanged={} flagged={} failed={}",
            report.updated.len(),
            report.unchanged.len(),
            report.flagged.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// 并行读取并分析变更文件，结果按路径排序
    async fn analyze_changes(
        &self,
        changes: &[ChangedFile],
        report: &mut RunReport,
    ) -> Vec<FileAnalysis> {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        let outcomes: Vec<(String, SyncResult<Option<FileAnalysis>>)> =
            stream::iter(changes.iter().filter(|c| c.kind != ChangeKind::Deleted))
                .map(|change| async move {
                    let full_path = self.config.repo_path.join(&change.path);
                    let result = match tokio::fs::read_to_string(&full_path).await {
                        Ok(content) => analyzer::analyze_file(&change.path, &content),
                        Err(e) => Err(SyncError::Parse {
                            path: change.path.clone(),
                            reason: format!("读取失败: {}", e),
                        }),
                    };
                    (change.path.clone(), result)
                })
                .buffer_unordered(parallelism)
                .collect()
                .await;

        let mut analyses = Vec::new();
        for (path, outcome) in outcomes {
            match outcome {
                Ok(Some(analysis)) => analyses.push(analysis),
                Ok(None) => {} // 未注册扩展名，文件只以 diff 形式进入上下文
                Err(e) => {
                    warn!("跳过文件 {}: {}", path, e);
                    report.skipped_files.push((path, e.to_string()));
                }
            }
        }
        analyses.sort_by(|a, b| a.path.cmp(&b.path));
        analyses
    }

    /// 对全部文档走完组装、生成、对账、落盘
    ///
    /// 测试入口：不依赖 git，直接喂变更与分析结果。
    pub(crate) async fn run_documents(
        &self,
        report: &mut RunReport,
        changes: &[ChangedFile],
        analyses: &[FileAnalysis],
        head_rev: String,
        cancel: &CancelFlag,
    ) -> SyncResult<()> {
        // Composing
        report.state = RunState::Composing;
        let mut contexts: Vec<(PromptContext, String)> = Vec::new();
        for doc_path in &self.config.documentation_files {
            let full_path = self.config.repo_path.join(doc_path);
            let current = match tokio::fs::read_to_string(&full_path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!("文档 {} 不可读，跳过: {}", doc_path, e);
                    report
                        .skipped_files
                        .push((doc_path.clone(), format!("文档不可读: {}", e)));
                    continue;
                }
            };
            // 预算耗尽是整次运行的失败
            let ctx = self.composer.compose(doc_path, &current, changes, analyses)?;
            contexts.push((ctx, current));
        }
        if cancelled(cancel, report) {
            return Ok(());
        }

        // Generating
        report.state = RunState::Generating;
        let concurrency = self.config.concurrency.clamp(1, 10);
        let mut generated: Vec<_> = stream::iter(contexts)
            .map(|(ctx, current)| async move {
                self.limiter.acquire().await;
                let result = self.client.send(&ctx.prompt).await;
                (ctx.doc_path, current, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        generated.sort_by(|a, b| a.0.cmp(&b.0));
        if cancelled(cancel, report) {
            return Ok(());
        }

        // Reconciling
        report.state = RunState::Reconciling;
        let mut updates: Vec<DocumentUpdate> = Vec::new();
        for (doc_path, current, result) in generated {
            let result = match result {
                Ok(result) => result,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("文档 {} 生成失败: {}", doc_path, e);
                    report.failed.push((doc_path, e.to_string()));
                    continue;
                }
            };
            match self.reconciler.reconcile(&doc_path, &current, &result) {
                ReconcileOutcome::Unchanged => report.unchanged.push(doc_path),
                ReconcileOutcome::Flagged(reason) => {
                    warn!("文档 {} 待人工确认: {}", doc_path, reason);
                    report.flagged.push((doc_path, reason));
                }
                ReconcileOutcome::Rejected(reason) => {
                    error!("文档 {} 对账拒绝: {}", doc_path, reason);
                    report.failed.push((doc_path, reason));
                }
                ReconcileOutcome::Staged(update) => {
                    report.updated.push(doc_path);
                    updates.push(update);
                }
            }
        }

        let summary = ChangeSummary {
            changed_files: changes.iter().map(|c| c.path.clone()).collect(),
            head_rev,
        };
        info!("落盘策略: {} ({} 份更新)", self.strategy.name(), updates.len());
        self.strategy.apply(&updates, &summary).await?;
        Ok(())
    }
}

/// 阶段边界的取消检查
fn cancelled(cancel: &CancelFlag, report: &RunReport) -> bool {
    if cancel.is_cancelled() {
        warn!("运行已取消，停止于 {:?} 阶段", report.state);
        true
    } else {
        false
    }
}
