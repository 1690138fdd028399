//! 文档对账与落盘
//!
//! 生成结果先经过对账校验再落盘：空内容与丢失必需章节的结果被拒绝，
//! 丢掉多数历史条目的结果转人工确认，与当前内容逐字节相同的结果
//! 降级为无变化。落盘方式由策略决定，评审策略把全部更新打包成
//! 一次原子提交，核心流程不直接写主分支。

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{SyncError, SyncResult};
use crate::llm::{GenerationResult, GenerationStatus};

// 历史条目中的日期（ISO 或 斜线格式）
static RE_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}|\d{2}/\d{2}/\d{4}").unwrap());

/// 识别历史/变更记录章节标题的关键词
const CHANGELOG_KEYWORDS: &[&str] = &["changelog", "recent updates", "version history", "history"];

/// 一份通过对账的文档更新
#[derive(Debug, Clone, Serialize)]
pub struct DocumentUpdate {
    pub path: String,
    pub content: String,
    /// 行级差异摘要，形如 "+12/-3 行"
    pub summary: String,
}

/// 单份文档的对账结论
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// 无需更新（哨兵，或生成内容与现状逐字节一致）
    Unchanged,
    /// 语义不明，不落盘，留给人工确认
    Flagged(String),
    /// 校验失败，不落盘
    Rejected(String),
    /// 通过校验，待落盘
    Staged(DocumentUpdate),
}

/// 文档对账器
pub struct DocumentReconciler {
    mandatory_sections: Vec<String>,
}

impl DocumentReconciler {
    pub fn new(mandatory_sections: Vec<String>) -> Self {
        Self { mandatory_sections }
    }

    /// 对单份文档的生成结果做对账
    pub fn reconcile(
        &self,
        path: &str,
        current: &str,
        result: &GenerationResult,
    ) -> ReconcileOutcome {
        match result.status {
            GenerationStatus::NoChanges => ReconcileOutcome::Unchanged,
            GenerationStatus::Ambiguous => ReconcileOutcome::Flagged(
                "回复同时包含无需更新哨兵与其他内容，需人工确认".to_string(),
            ),
            GenerationStatus::Updated => self.validate(path, current, &result.content),
        }
    }

    fn validate(&self, path: &str, current: &str, new_content: &str) -> ReconcileOutcome {
        if new_content.trim().is_empty() {
            return ReconcileOutcome::Rejected("生成内容为空".to_string());
        }

        if new_content == current {
            // 模型重述了原文，按无变化处理
            return ReconcileOutcome::Unchanged;
        }

        for section in &self.mandatory_sections {
            if !new_content.contains(section.as_str()) {
                return ReconcileOutcome::Rejected(format!("必需章节 {} 丢失", section));
            }
        }

        // 历史章节保护：旧文档里的变更记录日期多数丢失时不落盘
        let old_dates = changelog_dates(current);
        if !old_dates.is_empty() {
            let kept = old_dates
                .iter()
                .filter(|d| new_content.contains(d.as_str()))
                .count();
            if kept * 2 < old_dates.len() {
                warn!(
                    "{}: 旧历史章节的 {} 个日期条目只保留了 {} 个",
                    path,
                    old_dates.len(),
                    kept
                );
                return ReconcileOutcome::Flagged(format!(
                    "历史章节疑似丢失: {} 个日期条目只保留了 {} 个",
                    old_dates.len(),
                    kept
                ));
            }
        }

        ReconcileOutcome::Staged(DocumentUpdate {
            path: path.to_string(),
            summary: diff_summary(current, new_content),
            content: new_content.to_string(),
        })
    }
}

/// 提取历史/变更记录章节里的日期条目（去重，保持出现顺序）
///
/// 章节范围从命中关键词的标题行开始，到下一个标题行为止。
fn changelog_dates(content: &str) -> Vec<String> {
    let mut dates: Vec<String> = Vec::new();
    let mut in_section = false;

    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            let lower = trimmed.to_lowercase();
            in_section = CHANGELOG_KEYWORDS.iter().any(|k| lower.contains(k));
            continue;
        }
        if in_section {
            for m in RE_DATE.find_iter(line) {
                if !dates.iter().any(|d| d == m.as_str()) {
                    dates.push(m.as_str().to_string());
                }
            }
        }
    }

    dates
}

/// 行级差异摘要，重复行按出现次数计数
fn diff_summary(old: &str, new: &str) -> String {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for line in old.lines() {
        *counts.entry(line).or_default() -= 1;
    }
    for line in new.lines() {
        *counts.entry(line).or_default() += 1;
    }
    let added: i64 = counts.values().filter(|c| **c > 0).sum();
    let removed: i64 = -counts.values().filter(|c| **c < 0).sum::<i64>();
    format!("+{}/-{} 行", added, removed)
}

/// 本次运行的变更概览，用于生成提交信息与评审标题
#[derive(Debug, Clone)]
pub struct ChangeSummary {
    /// 触发本次同步的变更文件路径（按字典序）
    pub changed_files: Vec<String>,
    /// 目标修订号
    pub head_rev: String,
}

impl ChangeSummary {
    /// 评审标题，最多列出三个文件名
    pub fn title(&self) -> String {
        let names: Vec<&str> = self
            .changed_files
            .iter()
            .take(3)
            .map(|p| p.rsplit('/').next().unwrap_or(p.as_str()))
            .collect();

        let rest = self.changed_files.len().saturating_sub(3);
        if rest > 0 {
            format!("docs: sync for changes in {} and {} others", names.join(", "), rest)
        } else {
            format!("docs: sync for changes in {}", names.join(", "))
        }
    }
}

/// 打包提交给评审工作流的完整载荷
#[derive(Debug, Clone, Serialize)]
pub struct ReviewSubmission {
    pub branch_name: String,
    pub commit_message: String,
    pub pr_title: String,
    pub pr_body: String,
    pub updates: Vec<DocumentUpdate>,
}

/// 评审工作流抽象，一次提交带走全部更新
#[async_trait]
pub trait ReviewWorkflow: Send + Sync {
    async fn submit(&self, submission: ReviewSubmission) -> SyncResult<()>;
}

/// 落盘策略抽象
#[async_trait]
pub trait ApplyStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, updates: &[DocumentUpdate], summary: &ChangeSummary) -> SyncResult<()>;
}

/// 直接写入本地文件系统的策略
///
/// 写临时文件再重命名，同一文件不会出现半写状态。
pub struct DirectApplyStrategy {
    root: PathBuf,
}

impl DirectApplyStrategy {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn write_atomic(&self, path: &Path, content: &str) -> SyncResult<()> {
        let target = self.root.join(path);
        let parent = target.parent().ok_or_else(|| {
            SyncError::ReconciliationRejected {
                path: path.display().to_string(),
                reason: "目标路径没有父目录".to_string(),
            }
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl ApplyStrategy for DirectApplyStrategy {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn apply(&self, updates: &[DocumentUpdate], _summary: &ChangeSummary) -> SyncResult<()> {
        for update in updates {
            self.write_atomic(Path::new(&update.path), &update.content)?;
            info!("已写入 {} ({})", update.path, update.summary);
        }
        Ok(())
    }
}

/// 打包提交到评审工作流的策略
pub struct ReviewStrategy {
    workflow: Arc<dyn ReviewWorkflow>,
}

impl ReviewStrategy {
    pub fn new(workflow: Arc<dyn ReviewWorkflow>) -> Self {
        Self { workflow }
    }

    fn build_submission(updates: &[DocumentUpdate], summary: &ChangeSummary) -> ReviewSubmission {
        let mut body = String::from("Automated documentation sync.\n\nSource changes:\n");
        for path in &summary.changed_files {
            body.push_str(&format!("- `{}`\n", path));
        }
        body.push_str("\nUpdated documents:\n");
        for update in updates {
            body.push_str(&format!("- `{}` ({})\n", update.path, update.summary));
        }

        ReviewSubmission {
            branch_name: format!("docs/sync-{}", summary.head_rev),
            commit_message: summary.title(),
            pr_title: summary.title(),
            pr_body: body,
            updates: updates.to_vec(),
        }
    }
}

#[async_trait]
impl ApplyStrategy for ReviewStrategy {
    fn name(&self) -> &'static str {
        "review"
    }

    async fn apply(&self, updates: &[DocumentUpdate], summary: &ChangeSummary) -> SyncResult<()> {
        if updates.is_empty() {
            warn!("没有通过对账的更新，跳过评审提交");
            return Ok(());
        }
        // 全部更新进同一份提交，保证评审侧原子可见
        self.workflow
            .submit(Self::build_submission(updates, summary))
            .await
    }
}

/// 把提交载荷写成 JSON 文件，交给外部评审工具消费
pub struct JsonHandoffWorkflow {
    output_path: PathBuf,
}

impl JsonHandoffWorkflow {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }
}

#[async_trait]
impl ReviewWorkflow for JsonHandoffWorkflow {
    async fn submit(&self, submission: ReviewSubmission) -> SyncResult<()> {
        let payload = serde_json::to_string_pretty(&submission)
            .map_err(|e| SyncError::Config(format!("序列化评审载荷失败: {}", e)))?;
        tokio::fs::write(&self.output_path, payload).await?;
        info!(
            "评审载荷已写入 {} (branch={})",
            self.output_path.display(),
            submission.branch_name
        );
        Ok(())
    }
}
