//! Prompt 组装
//!
//! 把当前文档、变更 diff 和提取出的代码结构拼成一份确定性的 prompt。
//! 同样的输入永远产出同一字节序列，不含时间戳或随机 id。
//! 超出预算时按固定顺序降级：先截断 diff 行数，再丢弃无分析结果
//! 文件的 diff，结构化分析段永不截断。

use tracing::{debug, warn};

use super::analyzer::{Confidence, FileAnalysis};
use super::changeset::ChangedFile;
use crate::config::{PromptBudget, UpdateRules};
use crate::error::{SyncError, SyncResult};

/// 模型回复"无需更新"时必须精确输出的哨兵
pub const NO_CHANGES_SENTINEL: &str = "NO_CHANGES_NEEDED";

/// 单份待生成文档的完整上下文
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub doc_path: String,
    pub prompt: String,
    /// 组装时用到的变更文件路径，按字典序
    pub change_paths: Vec<String>,
}

/// Prompt 组装器
pub struct PromptComposer {
    rules: UpdateRules,
    budget: PromptBudget,
}

impl PromptComposer {
    pub fn new(rules: UpdateRules, budget: PromptBudget) -> Self {
        Self { rules, budget }
    }

    /// 为一份文档组装 prompt
    ///
    /// 输入在内部按路径排序，调用方传入顺序不影响结果。
    /// 三级降级后仍超预算时返回 `SyncError::PromptBudget`。
    pub fn compose(
        &self,
        doc_path: &str,
        doc_content: &str,
        changes: &[ChangedFile],
        analyses: &[FileAnalysis],
    ) -> SyncResult<PromptContext> {
        let mut changes: Vec<&ChangedFile> = changes.iter().collect();
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        let mut analyses: Vec<&FileAnalysis> = analyses.iter().collect();
        analyses.sort_by(|a, b| a.path.cmp(&b.path));

        // 第一级：完整渲染
        let full = self.render(doc_path, doc_content, &changes, &analyses, None, false);
        if full.len() <= self.budget.max_chars {
            return Ok(self.context(doc_path, &changes, full));
        }

        // 第二级：diff 截断到行数上限
        debug!("prompt 超出预算，截断 diff 到 {} 行", self.budget.diff_line_cap);
        let capped = self.render(
            doc_path,
            doc_content,
            &changes,
            &analyses,
            Some(self.budget.diff_line_cap),
            false,
        );
        if capped.len() <= self.budget.max_chars {
            return Ok(self.context(doc_path, &changes, capped));
        }

        // 第三级：丢弃没有分析结果的文件的 diff
        warn!("prompt 仍超预算，丢弃无结构分析文件的 diff: {}", doc_path);
        let reduced = self.render(
            doc_path,
            doc_content,
            &changes,
            &analyses,
            Some(self.budget.diff_line_cap),
            true,
        );
        if reduced.len() <= self.budget.max_chars {
            return Ok(self.context(doc_path, &changes, reduced));
        }

        Err(SyncError::PromptBudget(format!(
            "文档 {} 的 prompt 降级后仍有 {} 字符，超出预算 {}",
            doc_path,
            reduced.len(),
            self.budget.max_chars
        )))
    }

    fn context(&self, doc_path: &str, changes: &[&ChangedFile], prompt: String) -> PromptContext {
        PromptContext {
            doc_path: doc_path.to_string(),
            change_paths: changes.iter().map(|c| c.path.clone()).collect(),
            prompt,
        }
    }

    fn render(
        &self,
        doc_path: &str,
        doc_content: &str,
        changes: &[&ChangedFile],
        analyses: &[&FileAnalysis],
        diff_line_cap: Option<usize>,
        drop_ancillary: bool,
    ) -> String {
        let mut out = String::new();

        out.push_str("# Task: Update Technical Documentation\n\n");
        out.push_str(
            "You are updating project documentation to reflect recent code changes. \
             Modify only what the changes require and keep everything else intact.\n\n",
        );

        out.push_str(&format!("## Current Document (`{}`)\n\n", doc_path));
        out.push_str("```markdown\n");
        out.push_str(doc_content);
        if !doc_content.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("```\n\n");

        out.push_str("## Recent Code Changes\n\n");
        for change in changes {
            if drop_ancillary && !analyses.iter().any(|a| a.path == change.path) {
                continue;
            }
            out.push_str(&format!("### {} ({})\n\n", change.path, change.kind.as_str()));
            out.push_str("```diff\n");
            out.push_str(&truncate_diff(&change.diff, diff_line_cap));
            out.push_str("```\n\n");
        }

        if !analyses.is_empty() {
            out.push_str("## Extracted Code Structure\n\n");
            for analysis in analyses {
                render_analysis(&mut out, analysis);
            }
        }

        out.push_str("## Constraints\n\n");
        for directive in self.directives() {
            out.push_str(&format!("- {}\n", directive));
        }
        out.push('\n');

        out.push_str("## Output Instructions\n\n");
        out.push_str(&format!(
            "If the document needs changes, return the complete updated document as markdown, \
             with no commentary before or after it. If no changes are needed, respond with \
             exactly `{}` and nothing else.\n",
            NO_CHANGES_SENTINEL
        ));

        out
    }

    /// 更新规则对应的约束指令，每个激活标志一条
    fn directives(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.rules.preserve_tone {
            out.push("Preserve the document's existing tone and voice.");
        }
        if self.rules.preserve_style {
            out.push("Preserve the document's formatting and structural style.");
        }
        if self.rules.update_technical_details {
            out.push("Update technical details (signatures, parameters, behavior) to match the code.");
        }
        if self.rules.update_examples {
            out.push("Update code examples so they run against the changed code.");
        }
        if self.rules.add_breaking_changes {
            out.push("Add a note for any breaking change introduced by these modifications.");
        }
        out.push("Be precise and accurate.");
        out
    }
}

/// 渲染单个文件的结构段
///
/// 语法级提取的结果按权威事实呈现；模式匹配的结果必须附带
/// 弱化说明，避免模型把近似签名当成精确事实。
fn render_analysis(out: &mut String, analysis: &FileAnalysis) {
    out.push_str(&format!("### {} ({})\n\n", analysis.path, analysis.language));

    if analysis.confidence == Confidence::PatternBased {
        out.push_str(
            "Note: this structure was recovered by pattern matching and may be approximate; \
             treat signatures below as indicative, not authoritative.\n\n",
        );
    }

    if let Some(doc) = &analysis.module_docstring {
        out.push_str(&format!("Module: {}\n\n", doc));
    }

    if !analysis.functions.is_empty() {
        out.push_str("Functions:\n");
        for func in &analysis.functions {
            out.push_str(&format!("- `{}`", func.signature()));
            if let Some(doc) = &func.docstring {
                out.push_str(&format!(": {}", first_line(doc)));
            }
            out.push('\n');
        }
        out.push('\n');
    }

    if !analysis.classes.is_empty() {
        out.push_str("Classes:\n");
        for class in &analysis.classes {
            if class.bases.is_empty() {
                out.push_str(&format!("- `{}`", class.name));
            } else {
                out.push_str(&format!("- `{}({})`", class.name, class.bases.join(", ")));
            }
            if let Some(doc) = &class.docstring {
                out.push_str(&format!(": {}", first_line(doc)));
            }
            out.push('\n');
            for method in &class.methods {
                out.push_str(&format!("  - `{}`\n", method.signature()));
            }
        }
        out.push('\n');
    }

    if !analysis.imports.is_empty() {
        out.push_str(&format!("Imports: {}\n\n", analysis.imports.join(", ")));
    }
}

/// 截断 diff 到指定行数，超出部分以一行标记替代
fn truncate_diff(diff: &str, cap: Option<usize>) -> String {
    let mut text = match cap {
        Some(cap) => {
            let lines: Vec<&str> = diff.lines().collect();
            if lines.len() > cap {
                let mut kept = lines[..cap].join("\n");
                kept.push_str(&format!("\n... ({} lines omitted)", lines.len() - cap));
                kept
            } else {
                diff.to_string()
            }
        }
        None => diff.to_string(),
    };
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::analyzer::{FunctionInfo, ParamInfo};
    use crate::services::changeset::ChangeKind;

    fn change(path: &str, diff: &str) -> ChangedFile {
        ChangedFile {
            path: path.to_string(),
            kind: ChangeKind::Modified,
            diff: diff.to_string(),
            language: Some("python".to_string()),
        }
    }

    fn analysis(path: &str, confidence: Confidence) -> FileAnalysis {
        FileAnalysis {
            path: path.to_string(),
            language: "python".to_string(),
            confidence,
            module_docstring: None,
            functions: vec![FunctionInfo {
                name: "add".to_string(),
                params: vec![
                    ParamInfo {
                        name: "a".to_string(),
                        annotation: Some("int".to_string()),
                        default: None,
                        keyword_only: false,
                    },
                    ParamInfo {
                        name: "b".to_string(),
                        annotation: Some("int".to_string()),
                        default: None,
                        keyword_only: false,
                    },
                    ParamInfo {
                        name: "round_result".to_string(),
                        annotation: Some("bool".to_string()),
                        default: Some("False".to_string()),
                        keyword_only: true,
                    },
                ],
                return_type: Some("int".to_string()),
                docstring: None,
                decorators: vec![],
                is_async: false,
            }],
            classes: vec![],
            imports: vec![],
        }
    }

    fn composer() -> PromptComposer {
        PromptComposer::new(UpdateRules::default(), PromptBudget::default())
    }

    #[test]
    fn test_compose_is_deterministic_regardless_of_input_order() {
        let c = composer();
        let changes = vec![change("b.py", "+b"), change("a.py", "+a")];
        let reversed = vec![change("a.py", "+a"), change("b.py", "+b")];
        let analyses = vec![analysis("b.py", Confidence::Structured)];

        let first = c.compose("README.md", "# Doc", &changes, &analyses).unwrap();
        let second = c.compose("README.md", "# Doc", &reversed, &analyses).unwrap();
        assert_eq!(first.prompt, second.prompt);
        assert_eq!(first.change_paths, vec!["a.py", "b.py"]);
    }

    #[test]
    fn test_structured_signature_appears_verbatim() {
        let c = composer();
        let changes = vec![change("math_utils.py", "+def add(...)")];
        let analyses = vec![analysis("math_utils.py", Confidence::Structured)];

        let ctx = c.compose("README.md", "# Doc", &changes, &analyses).unwrap();
        assert!(ctx
            .prompt
            .contains("`add(a: int, b: int, *, round_result: bool = False) -> int`"));
        assert!(!ctx.prompt.contains("pattern matching"));
    }

    #[test]
    fn test_pattern_based_analysis_carries_hedge() {
        let c = composer();
        let changes = vec![change("app.js", "+x")];
        let mut a = analysis("app.js", Confidence::PatternBased);
        a.language = "javascript".to_string();

        let ctx = c.compose("README.md", "# Doc", &changes, &[a]).unwrap();
        assert!(ctx.prompt.contains("pattern matching"));
        assert!(ctx.prompt.contains("not authoritative"));
    }

    #[test]
    fn test_active_rule_flags_emit_directives() {
        let rules = UpdateRules {
            preserve_tone: true,
            preserve_style: false,
            update_technical_details: true,
            update_examples: true,
            add_breaking_changes: false,
        };
        let c = PromptComposer::new(rules, PromptBudget::default());
        let ctx = c.compose("README.md", "# Doc", &[], &[]).unwrap();

        assert!(ctx.prompt.contains("existing tone"));
        assert!(!ctx.prompt.contains("structural style"));
        assert!(ctx.prompt.contains("code examples"));
        assert!(ctx.prompt.contains("Be precise and accurate."));
    }

    #[test]
    fn test_sentinel_contract_in_output_instructions() {
        let ctx = composer().compose("README.md", "# Doc", &[], &[]).unwrap();
        assert!(ctx.prompt.contains("exactly `NO_CHANGES_NEEDED`"));
    }

    #[test]
    fn test_budget_truncates_diff_lines_first() {
        let budget = PromptBudget {
            max_chars: 2_000,
            diff_line_cap: 10,
        };
        let c = PromptComposer::new(UpdateRules::default(), budget);

        let big_diff: String = (0..200).map(|i| format!("+line {}\n", i)).collect();
        let changes = vec![change("math_utils.py", &big_diff)];
        let analyses = vec![analysis("math_utils.py", Confidence::Structured)];

        let ctx = c.compose("README.md", "# Doc", &changes, &analyses).unwrap();
        assert!(ctx.prompt.contains("(190 lines omitted)"));
        // 结构化分析段完整保留
        assert!(ctx
            .prompt
            .contains("`add(a: int, b: int, *, round_result: bool = False) -> int`"));
    }

    #[test]
    fn test_budget_drops_ancillary_diffs_second() {
        // 行数上限大于 diff 行数，第二级降级不生效，必须走到第三级
        let budget = PromptBudget {
            max_chars: 1_800,
            diff_line_cap: 500,
        };
        let c = PromptComposer::new(UpdateRules::default(), budget);

        let noise: String = (0..300).map(|i| format!("+noise {}\n", i)).collect();
        let changes = vec![
            change("math_utils.py", "+def add(...)\n"),
            change("assets/data.py", &noise),
        ];
        // 只有 math_utils.py 有分析结果，data.py 的 diff 可丢弃
        let analyses = vec![analysis("math_utils.py", Confidence::Structured)];

        let ctx = c.compose("README.md", "# Doc", &changes, &analyses).unwrap();
        assert!(ctx.prompt.contains("math_utils.py"));
        assert!(!ctx.prompt.contains("+noise"));
        assert!(ctx
            .prompt
            .contains("`add(a: int, b: int, *, round_result: bool = False) -> int`"));
    }

    #[test]
    fn test_budget_exhausted_is_error() {
        let budget = PromptBudget {
            max_chars: 100,
            diff_line_cap: 1,
        };
        let c = PromptComposer::new(UpdateRules::default(), budget);
        let changes = vec![change("math_utils.py", "+x\n")];
        let analyses = vec![analysis("math_utils.py", Confidence::Structured)];

        let result = c.compose("README.md", "# Doc", &changes, &analyses);
        assert!(matches!(result, Err(SyncError::PromptBudget(_))));
    }
}
