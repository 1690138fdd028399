//! 源码结构分析
//!
//! 按扩展名静态表把文件分发到对应的提取器。新增语言支持 = 新增一个表项
//! 和一个提取模块，分发逻辑本身不需要改动。
//! 未注册的扩展名不产出分析结果，文件仅以 diff 形式进入后续上下文。

mod javascript;
mod python;
pub mod types;

pub use types::{ClassInfo, Confidence, FileAnalysis, FunctionInfo, ParamInfo};

use crate::error::SyncResult;

/// 提取器变体
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerKind {
    /// 语法级提取（置信度 structured）
    StructuredPython,
    /// 文本模式匹配（置信度 pattern_based）
    PatternJavaScript,
}

/// 单条语言注册：扩展名、语言标签与提取器变体
struct LanguageEntry {
    extension: &'static str,
    language: &'static str,
    kind: AnalyzerKind,
}

/// 扩展名（不含点号）→ 语言注册表，语言标签只在这里出现一次
const EXTENSION_TABLE: &[LanguageEntry] = &[
    LanguageEntry { extension: "py", language: "python", kind: AnalyzerKind::StructuredPython },
    LanguageEntry { extension: "js", language: "javascript", kind: AnalyzerKind::PatternJavaScript },
    LanguageEntry { extension: "jsx", language: "javascript", kind: AnalyzerKind::PatternJavaScript },
    LanguageEntry { extension: "ts", language: "typescript", kind: AnalyzerKind::PatternJavaScript },
    LanguageEntry { extension: "tsx", language: "typescript", kind: AnalyzerKind::PatternJavaScript },
];

fn entry_for(extension: &str) -> Option<&'static LanguageEntry> {
    EXTENSION_TABLE.iter().find(|e| e.extension == extension)
}

/// 查表获取提取器变体
pub fn lookup(extension: &str) -> Option<AnalyzerKind> {
    entry_for(extension).map(|e| e.kind)
}

/// 检测文件语言标签
pub fn detect_language(path: &str) -> Option<&'static str> {
    entry_for(file_extension(path)?).map(|e| e.language)
}

/// 分析单个文件
///
/// 扩展名未注册时返回 `Ok(None)`；源码无法解析时返回 `SyncError::Parse`，
/// 由调用方按文件跳过。
pub fn analyze_file(path: &str, content: &str) -> SyncResult<Option<FileAnalysis>> {
    let Some(entry) = file_extension(path).and_then(entry_for) else {
        return Ok(None);
    };

    match entry.kind {
        AnalyzerKind::StructuredPython => python::analyze(path, content).map(Some),
        AnalyzerKind::PatternJavaScript => {
            javascript::analyze(path, entry.language, content).map(Some)
        }
    }
}

fn file_extension(path: &str) -> Option<&str> {
    std::path::Path::new(path).extension().and_then(|e| e.to_str())
}

/// 按顶层分隔符切分，括号与引号内的分隔符不生效
pub(crate) fn split_top_level(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;
    let mut in_str: Option<char> = None;
    let mut escaped = false;

    for ch in text.chars() {
        if let Some(quote) = in_str {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                in_str = None;
            }
            current.push(ch);
            continue;
        }
        match ch {
            '\'' | '"' => {
                in_str = Some(ch);
                current.push(ch);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                current.push(ch);
            }
            c if c == sep && depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// 在首个顶层分隔符处一分为二
pub(crate) fn split_once_top_level(text: &str, sep: char) -> (String, Option<String>) {
    let mut depth: i32 = 0;
    let mut in_str: Option<char> = None;
    let mut escaped = false;

    for (pos, ch) in text.char_indices() {
        if let Some(quote) = in_str {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                in_str = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => in_str = Some(ch),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            c if c == sep && depth == 0 => {
                return (
                    text[..pos].to_string(),
                    Some(text[pos + ch.len_utf8()..].to_string()),
                );
            }
            _ => {}
        }
    }

    (text.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_table_dispatch() {
        assert_eq!(lookup("py"), Some(AnalyzerKind::StructuredPython));
        assert_eq!(lookup("ts"), Some(AnalyzerKind::PatternJavaScript));
        assert_eq!(lookup("go"), None);
    }

    #[test]
    fn test_unregistered_extension_yields_no_analysis() {
        let result = analyze_file("main.go", "package main\nfunc main() {}\n").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("a/b/c.py"), Some("python"));
        assert_eq!(detect_language("x.tsx"), Some("typescript"));
        assert_eq!(detect_language("Makefile"), None);
    }

    #[test]
    fn test_analysis_language_matches_table_entry() {
        // 每个注册扩展名的分析结果语言标签都来自同一条表项
        for entry in EXTENSION_TABLE {
            let path = format!("src/sample.{}", entry.extension);
            let analysis = analyze_file(&path, "").unwrap().unwrap();
            assert_eq!(analysis.language, entry.language);
            assert_eq!(detect_language(&path), Some(entry.language));
        }
    }

    #[test]
    fn test_split_top_level_respects_brackets_and_quotes() {
        let parts = split_top_level("a, b=(1, 2), c='x,y', d={'k': [1, 2]}", ',');
        let parts: Vec<String> = parts.iter().map(|p| p.trim().to_string()).collect();
        assert_eq!(parts, vec!["a", "b=(1, 2)", "c='x,y'", "d={'k': [1, 2]}"]);
    }

    #[test]
    fn test_split_once_top_level() {
        let (head, tail) = split_once_top_level("key=lambda x: x", '=');
        assert_eq!(head, "key");
        assert_eq!(tail.as_deref(), Some("lambda x: x"));

        let (head, tail) = split_once_top_level("shape=(a==b)", '=');
        assert_eq!(head, "shape");
        assert_eq!(tail.as_deref(), Some("(a==b)"));
    }
}
