//! JavaScript / TypeScript 模式匹配提取
//!
//! 没有语法级解析器，用文本模式尽力恢复函数与类签名。
//! 输出标记为 pattern_based，下游组装 prompt 时必须弱化相关表述。

use once_cell::sync::Lazy;
use regex::Regex;

use super::split_top_level;
use super::types::{ClassInfo, Confidence, FileAnalysis, FunctionInfo, ParamInfo};
use crate::error::SyncResult;

// 预编译正则表达式
static RE_FUNC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:export\s+)?(?:default\s+)?(async\s+)?function\s*\*?\s*(\w+)\s*\(([^)]*)\)(?:\s*:\s*([\w.<>\[\]| ]+))?")
        .unwrap()
});
static RE_ARROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:export\s+)?(?:const|let)\s+(\w+)\s*=\s*(async\s+)?\(([^)]*)\)(?:\s*:\s*([\w.<>\[\]| ]+))?\s*=>")
        .unwrap()
});
static RE_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:export\s+)?(?:default\s+)?class\s+(\w+)(?:\s+extends\s+([\w.]+))?").unwrap());
static RE_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^import\s+.*?from\s+['"]([^'"]+)['"]"#).unwrap());
static RE_IMPORT_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^import\s+['"]([^'"]+)['"]"#).unwrap());
static RE_REQUIRE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"require\(['"]([^'"]+)['"]\)"#).unwrap());

/// 分析 JavaScript / TypeScript 源文件，语言标签由注册表传入
pub fn analyze(path: &str, language: &str, content: &str) -> SyncResult<FileAnalysis> {
    let mut functions: Vec<FunctionInfo> = Vec::new();
    let mut classes: Vec<ClassInfo> = Vec::new();
    let mut imports: Vec<String> = Vec::new();

    for line in content.lines() {
        let stripped = line.trim();

        if let Some(caps) = RE_FUNC.captures(stripped) {
            functions.push(FunctionInfo {
                name: caps[2].to_string(),
                params: parse_params(&caps[3]),
                return_type: caps.get(4).map(|m| m.as_str().trim().to_string()),
                docstring: None, // JSDoc 解析不在模式匹配范围内
                decorators: Vec::new(),
                is_async: caps.get(1).is_some(),
            });
            continue;
        }

        if let Some(caps) = RE_ARROW.captures(stripped) {
            functions.push(FunctionInfo {
                name: caps[1].to_string(),
                params: parse_params(&caps[3]),
                return_type: caps.get(4).map(|m| m.as_str().trim().to_string()),
                docstring: None,
                decorators: Vec::new(),
                is_async: caps.get(2).is_some(),
            });
            continue;
        }

        if let Some(caps) = RE_CLASS.captures(stripped) {
            classes.push(ClassInfo {
                name: caps[1].to_string(),
                bases: caps.get(2).map(|m| vec![m.as_str().to_string()]).unwrap_or_default(),
                docstring: None,
                methods: Vec::new(), // 方法归属需要块级解析，模式匹配不做
                attributes: Vec::new(),
            });
            continue;
        }

        if let Some(caps) = RE_IMPORT.captures(stripped) {
            imports.push(caps[1].to_string());
        } else if let Some(caps) = RE_IMPORT_BARE.captures(stripped) {
            imports.push(caps[1].to_string());
        } else if let Some(caps) = RE_REQUIRE.captures(stripped) {
            imports.push(caps[1].to_string());
        }
    }

    Ok(FileAnalysis {
        path: path.to_string(),
        language: language.to_string(),
        confidence: Confidence::PatternBased,
        module_docstring: None,
        functions,
        classes,
        imports,
    })
}

/// 解析参数列表：name: type = default，三段都可选
fn parse_params(text: &str) -> Vec<ParamInfo> {
    let mut params = Vec::new();

    for raw in split_top_level(text, ',') {
        let piece = raw.trim();
        if piece.is_empty() {
            continue;
        }

        let (head, default) = match piece.split_once('=') {
            Some((h, d)) => (h.trim(), Some(d.trim().to_string())),
            None => (piece, None),
        };
        let (name, annotation) = match head.split_once(':') {
            Some((n, a)) => (n.trim(), Some(a.trim().to_string())),
            None => (head, None),
        };

        params.push(ParamInfo {
            name: name.to_string(),
            annotation: annotation.filter(|a| !a.is_empty()),
            default: default.filter(|d| !d.is_empty()),
            keyword_only: false, // JS 没有仅关键字参数
        });
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_declarations() {
        let source = r#"
export async function fetchUser(id: number, verbose = false): Promise<User> {
    return api.get(id);
}

function plain(a, b) {}
"#;
        let analysis = analyze("api.ts", "typescript", source).unwrap();
        assert_eq!(analysis.language, "typescript");
        assert_eq!(analysis.confidence, Confidence::PatternBased);
        assert_eq!(analysis.functions.len(), 2);

        let fetch = &analysis.functions[0];
        assert_eq!(fetch.name, "fetchUser");
        assert!(fetch.is_async);
        assert_eq!(fetch.params[0].annotation.as_deref(), Some("number"));
        assert_eq!(fetch.params[1].default.as_deref(), Some("false"));
        assert_eq!(fetch.return_type.as_deref(), Some("Promise<User>"));
    }

    #[test]
    fn test_arrow_functions_and_classes() {
        let source = r#"
const handler = async (req, res) => {
    res.send("ok");
};

export class UserStore extends BaseStore {
}
"#;
        let analysis = analyze("store.js", "javascript", source).unwrap();
        assert_eq!(analysis.language, "javascript");
        assert_eq!(analysis.functions.len(), 1);
        assert!(analysis.functions[0].is_async);
        assert_eq!(analysis.classes.len(), 1);
        assert_eq!(analysis.classes[0].name, "UserStore");
        assert_eq!(analysis.classes[0].bases, vec!["BaseStore"]);
    }

    #[test]
    fn test_imports() {
        let source = r#"
import { useState } from 'react';
import 'polyfill';
const fs = require('fs');
"#;
        let analysis = analyze("app.jsx", "javascript", source).unwrap();
        assert_eq!(analysis.imports, vec!["react", "polyfill", "fs"]);
    }
}
