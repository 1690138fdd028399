//! 变更集解析
//!
//! 把一个版本区间解析成按路径排序的变更文件列表，带各自的 diff 块。
//! 过滤规则：扩展名允许列表减去排除 glob 模式，排除永远优先。
//! 本组件对管线只读，不执行任何写操作。

use std::path::PathBuf;
use std::process::Command;

use glob::Pattern;
use serde::Serialize;
use tracing::debug;

use super::analyzer;
use crate::error::{SyncError, SyncResult};

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl ChangeKind {
    /// 解析 git name-status 状态码（R/C 带相似度分数，如 R100）
    ///
    /// 复制的文件对本管线就是新增文件；类型变更与其余状态码一律
    /// 归入修改，受监控的路径不允许无声消失。
    fn from_status(status: &str) -> Option<Self> {
        match status.chars().next()? {
            'A' => Some(Self::Added),
            'C' => Some(Self::Added),
            'D' => Some(Self::Deleted),
            'R' => Some(Self::Renamed),
            _ => Some(Self::Modified),
        }
    }

    /// 该状态码的行是否带新旧两个路径
    fn two_paths(status: &str) -> bool {
        matches!(status.chars().next(), Some('R') | Some('C'))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
        }
    }
}

/// 单个变更文件，解析后不可变
#[derive(Debug, Clone, Serialize)]
pub struct ChangedFile {
    pub path: String,
    pub kind: ChangeKind,
    /// 原始 diff 块文本
    pub diff: String,
    /// 检测到的语言标签，未注册扩展名为 None
    pub language: Option<String>,
}

/// 版本区间
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionRange {
    /// 两个提交之间（默认 HEAD~1 对 HEAD）
    Commits { base: String, head: String },
    /// 工作区对 HEAD（未提交运行）
    WorkingTree,
}

impl RevisionRange {
    fn diff_args(&self) -> Vec<&str> {
        match self {
            Self::Commits { base, head } => vec![base.as_str(), head.as_str()],
            Self::WorkingTree => vec!["HEAD"],
        }
    }
}

/// 变更集解析器
pub struct ChangeSetResolver {
    repo_path: PathBuf,
    monitored_extensions: Vec<String>,
    exclude_patterns: Vec<Pattern>,
}

impl ChangeSetResolver {
    /// 创建新的解析器，排除模式在此一次性编译
    pub fn new(
        repo_path: impl Into<PathBuf>,
        monitored_extensions: Vec<String>,
        exclude_patterns: &[String],
    ) -> SyncResult<Self> {
        let patterns = exclude_patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| SyncError::Config(format!("排除模式 {} 无效: {}", p, e)))
            })
            .collect::<SyncResult<Vec<_>>>()?;

        Ok(Self {
            repo_path: repo_path.into(),
            monitored_extensions,
            exclude_patterns: patterns,
        })
    }

    /// 解析版本区间为变更文件列表（按路径排序）
    pub fn resolve(&self, range: &RevisionRange) -> SyncResult<Vec<ChangedFile>> {
        self.ensure_repository()?;

        let mut args = vec!["diff", "--name-status"];
        args.extend(range.diff_args());
        let output = self.git(&args)?;

        let mut files = parse_name_status(&output);
        files.retain(|(path, _)| self.is_monitored(path) && !self.is_excluded(path));
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut changed = Vec::with_capacity(files.len());
        for (path, kind) in files {
            let mut diff_args = vec!["diff"];
            diff_args.extend(range.diff_args());
            diff_args.push("--");
            diff_args.push(&path);
            let diff = self.git(&diff_args)?;

            debug!("changed file: {} ({})", path, kind.as_str());
            changed.push(ChangedFile {
                language: analyzer::detect_language(&path).map(|l| l.to_string()),
                path,
                kind,
                diff,
            });
        }

        Ok(changed)
    }

    /// 当前 HEAD 修订号
    pub fn head_revision(&self) -> SyncResult<String> {
        self.git(&["rev-parse", "--short", "HEAD"])
    }

    /// 校验目标目录是合法的 git 工作树
    fn ensure_repository(&self) -> SyncResult<()> {
        let inside = self.git(&["rev-parse", "--is-inside-work-tree"])?;
        if inside.trim() != "true" {
            return Err(SyncError::RepositoryState(format!(
                "{} 不是 git 工作树",
                self.repo_path.display()
            )));
        }
        Ok(())
    }

    /// 在仓库目录执行 git 命令
    fn git(&self, args: &[&str]) -> SyncResult<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| SyncError::RepositoryState(format!("无法执行 git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::RepositoryState(format!(
                "git {} 失败: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// 扩展名允许列表检查
    fn is_monitored(&self, path: &str) -> bool {
        self.monitored_extensions
            .iter()
            .any(|ext| path.ends_with(ext.as_str()))
    }

    /// 排除模式检查，命中任意一条即排除
    ///
    /// 同时匹配原始路径和 "./" 前缀形式，保证 `**/tests/**`
    /// 也能命中仓库根目录下的 tests/。
    fn is_excluded(&self, path: &str) -> bool {
        let prefixed = format!("./{}", path);
        self.exclude_patterns
            .iter()
            .any(|p| p.matches(path) || p.matches(&prefixed))
    }
}

/// 解析 git diff --name-status 的输出
///
/// 普通行: `M\tpath`；重命名/复制行: `R100\told\tnew`，取新路径。
fn parse_name_status(output: &str) -> Vec<(String, ChangeKind)> {
    let mut files = Vec::new();

    for line in output.lines() {
        let mut parts = line.split('\t');
        let Some(status) = parts.next() else { continue };
        let status = status.trim();
        let Some(kind) = ChangeKind::from_status(status) else {
            continue;
        };

        let path = if ChangeKind::two_paths(status) {
            parts.nth(1) // 跳过旧路径
        } else {
            parts.next()
        };

        if let Some(path) = path {
            let path = path.trim();
            if !path.is_empty() {
                files.push((path.to_string(), kind));
            }
        }
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(extensions: &[&str], excludes: &[&str]) -> ChangeSetResolver {
        ChangeSetResolver::new(
            ".",
            extensions.iter().map(|e| e.to_string()).collect(),
            &excludes.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_name_status() {
        let output = "M\tsrc/app.py\nA\tsrc/new.py\nD\told.js\nR100\tsrc/a.py\tsrc/b.py\n";
        let files = parse_name_status(output);
        assert_eq!(
            files,
            vec![
                ("src/app.py".to_string(), ChangeKind::Modified),
                ("src/new.py".to_string(), ChangeKind::Added),
                ("old.js".to_string(), ChangeKind::Deleted),
                ("src/b.py".to_string(), ChangeKind::Renamed),
            ]
        );
    }

    #[test]
    fn test_copied_and_typechange_statuses_are_kept() {
        let output = "C75\tsrc/a.py\tsrc/copy.py\nT\tscripts/tool.py\nU\tconflict.py\n";
        let files = parse_name_status(output);
        assert_eq!(
            files,
            vec![
                ("src/copy.py".to_string(), ChangeKind::Added),
                ("scripts/tool.py".to_string(), ChangeKind::Modified),
                ("conflict.py".to_string(), ChangeKind::Modified),
            ]
        );
    }

    #[test]
    fn test_monitored_extension_filter() {
        let r = resolver(&[".py", ".ts"], &[]);
        assert!(r.is_monitored("src/app.py"));
        assert!(r.is_monitored("web/index.ts"));
        assert!(!r.is_monitored("README.md"));
        assert!(!r.is_monitored("build.gradle"));
    }

    #[test]
    fn test_exclude_pattern_wins() {
        // tests/ 下的变更文件必须完全不出现在输出中
        let r = resolver(&[".py"], &["**/tests/**"]);
        assert!(r.is_monitored("tests/test_app.py"));
        assert!(r.is_excluded("tests/test_app.py"));
        assert!(r.is_excluded("src/tests/helpers.py"));
        assert!(!r.is_excluded("src/app.py"));
    }

    #[test]
    fn test_exclude_prefix_pattern() {
        let r = resolver(&[".py"], &["vendor/**", "**/__pycache__/**"]);
        assert!(r.is_excluded("vendor/lib.py"));
        assert!(r.is_excluded("pkg/__pycache__/mod.py"));
        assert!(!r.is_excluded("pkg/mod.py"));
    }

    #[test]
    fn test_invalid_exclude_pattern_is_config_error() {
        let result = ChangeSetResolver::new(".", vec![], &["[".to_string()]);
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
