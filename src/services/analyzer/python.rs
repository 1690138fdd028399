//! Python 结构化提取
//!
//! 逐行扫描 + 签名解析。提取精确的参数列表（注解、默认值、仅关键字标记）、
//! 返回类型、装饰器、docstring、类属性与导入。签名可以跨多行，
//! 收集到括号配平为止；到文件末尾仍未配平视为解析失败。
//!
//! 参数顺序与源码文本顺序严格一致，这是生成阶段不可违背的事实锚点。

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::{ClassInfo, Confidence, FileAnalysis, FunctionInfo, ParamInfo};
use super::{split_once_top_level, split_top_level};
use crate::error::{SyncError, SyncResult};

// 预编译正则表达式
static RE_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^class\s+(\w+)\s*(?:\(([^)]*)\))?\s*:").unwrap());
static RE_DEF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(async\s+)?def\s+(\w+)\s*\(").unwrap());
static RE_DECORATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^@\s*([\w.]+)").unwrap());
static RE_IMPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^import\s+(.+)$").unwrap());
static RE_FROM_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^from\s+([\w.]+)\s+import\s+(.+)$").unwrap());
static RE_CLASS_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\w+)\s*(?::[^=]+)?=[^=]").unwrap());
static RE_SELF_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"self\.(\w+)\s*(?::[^=]+)?=[^=]").unwrap());

/// 分析 Python 源文件
pub fn analyze(path: &str, content: &str) -> SyncResult<FileAnalysis> {
    let lines: Vec<&str> = content.lines().collect();
    let module_docstring = module_docstring(&lines);

    let mut functions: Vec<FunctionInfo> = Vec::new();
    let mut classes: Vec<ClassInfo> = Vec::new();
    let mut imports: Vec<String> = Vec::new();
    let mut pending_decorators: Vec<String> = Vec::new();
    let mut in_triple: Option<String> = None;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let stripped = line.trim();

        // 跳过三引号字符串块，避免把 docstring 里的示例代码当成定义
        if let Some(delim) = &in_triple {
            if stripped.contains(delim.as_str()) {
                in_triple = None;
            }
            i += 1;
            continue;
        }
        if stripped.starts_with("\"\"\"") || stripped.starts_with("'''") {
            let delim = &stripped[..3];
            if !stripped[3..].contains(delim) {
                in_triple = Some(delim.to_string());
            }
            i += 1;
            continue;
        }

        if stripped.is_empty() || stripped.starts_with('#') {
            i += 1;
            continue;
        }

        if indent_of(line) == 0 {
            if let Some(caps) = RE_DECORATOR.captures(stripped) {
                pending_decorators.push(caps[1].to_string());
                i += 1;
                continue;
            }

            if RE_DEF.is_match(stripped) {
                let (mut func, next) = parse_function(path, &lines, i)?;
                func.decorators = std::mem::take(&mut pending_decorators);
                functions.push(func);
                i = next;
                continue;
            }

            if let Some(caps) = RE_CLASS.captures(stripped) {
                pending_decorators.clear();
                let (class_info, next) = parse_class(path, &lines, i, &caps)?;
                classes.push(class_info);
                i = next;
                continue;
            }

            pending_decorators.clear();
            collect_imports(stripped, &mut imports);
        }

        i += 1;
    }

    Ok(FileAnalysis {
        path: path.to_string(),
        language: "python".to_string(),
        confidence: Confidence::Structured,
        module_docstring,
        functions,
        classes,
        imports,
    })
}

/// 收集 import / from-import 语句
fn collect_imports(stripped: &str, imports: &mut Vec<String>) {
    if let Some(caps) = RE_FROM_IMPORT.captures(stripped) {
        let module = caps[1].to_string();
        let names = caps[2].trim_start_matches('(').trim_end_matches(')');
        for name in names.split(',') {
            let name = strip_alias(name);
            if !name.is_empty() {
                imports.push(format!("from {} import {}", module, name));
            }
        }
    } else if let Some(caps) = RE_IMPORT.captures(stripped) {
        for name in caps[1].split(',') {
            let name = strip_alias(name);
            if !name.is_empty() {
                imports.push(format!("import {}", name));
            }
        }
    }
}

/// 去掉 "x as y" 的别名部分
fn strip_alias(name: &str) -> &str {
    name.trim().split_whitespace().next().unwrap_or("")
}

/// 行首缩进宽度
fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// 解析函数定义，返回 (函数信息, 签名结束后的行号)
fn parse_function(path: &str, lines: &[&str], start: usize) -> SyncResult<(FunctionInfo, usize)> {
    let def_indent = indent_of(lines[start]);

    // 收集签名直到括号配平，行内注释截断
    let mut sig = String::new();
    let mut depth: i32 = 0;
    let mut in_str: Option<char> = None;
    let mut escaped = false;
    let mut seen_open = false;
    let mut sig_end: Option<usize> = None;

    let mut idx = start;
    while idx < lines.len() {
        for ch in lines[idx].chars() {
            if let Some(quote) = in_str {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == quote {
                    in_str = None;
                }
                sig.push(ch);
                continue;
            }
            match ch {
                '\'' | '"' => {
                    in_str = Some(ch);
                    sig.push(ch);
                }
                '(' | '[' | '{' => {
                    depth += 1;
                    seen_open = true;
                    sig.push(ch);
                }
                ')' | ']' | '}' => {
                    depth -= 1;
                    sig.push(ch);
                }
                '#' => break,
                _ => sig.push(ch),
            }
        }
        sig.push(' ');
        if seen_open && depth == 0 {
            sig_end = Some(idx);
            break;
        }
        idx += 1;
    }

    let sig_end = sig_end.ok_or_else(|| SyncError::Parse {
        path: path.to_string(),
        reason: format!("第 {} 行的函数签名括号不配对", start + 1),
    })?;

    let header = sig.trim_start();
    let caps = RE_DEF.captures(header).ok_or_else(|| SyncError::Parse {
        path: path.to_string(),
        reason: format!("第 {} 行不是有效的函数定义", start + 1),
    })?;
    let is_async = caps.get(1).is_some();
    let name = caps[2].to_string();

    // 定位参数括号区间
    let open = sig.find('(').ok_or_else(|| SyncError::Parse {
        path: path.to_string(),
        reason: format!("第 {} 行缺少参数括号", start + 1),
    })?;
    let tail = &sig[open..];
    let mut depth: i32 = 0;
    let mut in_str: Option<char> = None;
    let mut escaped = false;
    let mut close_rel: Option<usize> = None;
    for (pos, ch) in tail.char_indices() {
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
            ')' | ']' | '}' => {
                depth -= 1;
                if depth == 0 {
                    close_rel = Some(pos);
                    break;
                }
            }
            _ => {}
        }
    }
    let close_rel = close_rel.ok_or_else(|| SyncError::Parse {
        path: path.to_string(),
        reason: format!("第 {} 行的参数列表未闭合", start + 1),
    })?;

    let params = parse_params(&tail[1..close_rel]);

    // 返回类型注解：")" 之后、冒号之前
    let rest = &tail[close_rel + 1..];
    let return_type = rest.find("->").and_then(|pos| {
        let after = &rest[pos + 2..];
        let end = after.find(':').unwrap_or(after.len());
        let annotation = after[..end].trim();
        if annotation.is_empty() {
            None
        } else {
            Some(annotation.to_string())
        }
    });

    let docstring = docstring_after(lines, sig_end + 1, def_indent);

    Ok((
        FunctionInfo {
            name,
            params,
            return_type,
            docstring,
            decorators: Vec::new(),
            is_async,
        },
        sig_end + 1,
    ))
}

/// 解析参数列表文本
///
/// 裸 * 之后以及 *args 之后的参数均为仅关键字参数；/ 仅是位置标记，本身不产出参数。
fn parse_params(text: &str) -> Vec<ParamInfo> {
    let mut params = Vec::new();
    let mut keyword_only = false;

    for raw in split_top_level(text, ',') {
        let piece = raw.trim();
        if piece.is_empty() || piece == "/" {
            continue;
        }
        if piece == "*" {
            keyword_only = true;
            continue;
        }

        let (head, default) = split_once_top_level(piece, '=');
        let (name_part, annotation) = split_once_top_level(head.trim(), ':');
        let name = name_part.trim().to_string();
        let is_vararg = name.starts_with('*');

        params.push(ParamInfo {
            name: name.clone(),
            annotation: annotation
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty()),
            default: default
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            keyword_only: keyword_only && !is_vararg,
        });

        // *args 之后的普通参数都是仅关键字参数
        if is_vararg && !name.starts_with("**") {
            keyword_only = true;
        }
    }

    params
}

/// 解析类定义，返回 (类信息, 类体结束后的行号)
fn parse_class(
    path: &str,
    lines: &[&str],
    start: usize,
    caps: &regex::Captures<'_>,
) -> SyncResult<(ClassInfo, usize)> {
    let class_indent = indent_of(lines[start]);
    let name = caps[1].to_string();
    let bases: Vec<String> = caps
        .get(2)
        .map(|m| m.as_str())
        .unwrap_or("")
        .split(',')
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .collect();

    let docstring = docstring_after(lines, start + 1, class_indent);

    let mut methods: Vec<FunctionInfo> = Vec::new();
    let mut attributes: Vec<String> = Vec::new();
    let mut pending_decorators: Vec<String> = Vec::new();
    let mut body_indent: Option<usize> = None;

    let mut i = start + 1;
    while i < lines.len() {
        let line = lines[i];
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            i += 1;
            continue;
        }

        let indent = indent_of(line);
        if indent <= class_indent {
            break; // 类体结束
        }
        let bi = *body_indent.get_or_insert(indent);

        if indent == bi {
            if let Some(caps) = RE_DECORATOR.captures(stripped) {
                pending_decorators.push(caps[1].to_string());
                i += 1;
                continue;
            }
            if RE_DEF.is_match(stripped) {
                let (mut func, next) = parse_function(path, lines, i)?;
                func.decorators = std::mem::take(&mut pending_decorators);
                methods.push(func);
                i = next;
                continue;
            }
            pending_decorators.clear();
            if let Some(caps) = RE_CLASS_ATTR.captures(stripped) {
                push_unique(&mut attributes, &caps[1]);
            }
        }

        // 方法体内的 self.x 赋值也计入属性
        if let Some(caps) = RE_SELF_ATTR.captures(stripped) {
            push_unique(&mut attributes, &caps[1]);
        }

        i += 1;
    }

    Ok((
        ClassInfo {
            name,
            bases,
            docstring,
            methods,
            attributes,
        },
        i,
    ))
}

fn push_unique(items: &mut Vec<String>, value: &str) {
    if !items.iter().any(|v| v == value) {
        items.push(value.to_string());
    }
}

/// 模块级 docstring
fn module_docstring(lines: &[&str]) -> Option<String> {
    let mut i = 0;
    while i < lines.len() {
        let stripped = lines[i].trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            i += 1;
            continue;
        }
        return parse_triple_quoted(lines, i);
    }
    None
}

/// 定义体开头的 docstring（首个非空行必须比父级缩进更深）
fn docstring_after(lines: &[&str], from: usize, parent_indent: usize) -> Option<String> {
    let mut i = from;
    while i < lines.len() {
        let stripped = lines[i].trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            i += 1;
            continue;
        }
        if indent_of(lines[i]) <= parent_indent {
            return None;
        }
        return parse_triple_quoted(lines, i);
    }
    None
}

/// 解析从第 i 行开始的三引号字符串
fn parse_triple_quoted(lines: &[&str], i: usize) -> Option<String> {
    let stripped = lines[i].trim();
    let delim = if stripped.starts_with("\"\"\"") {
        "\"\"\""
    } else if stripped.starts_with("'''") {
        "'''"
    } else {
        return None;
    };

    let after = &stripped[3..];
    if let Some(pos) = after.find(delim) {
        return non_empty(after[..pos].trim());
    }

    let mut parts = vec![after.to_string()];
    for line in &lines[i + 1..] {
        if let Some(pos) = line.find(delim) {
            parts.push(line[..pos].trim_end().to_string());
            let joined = parts.join("\n");
            return non_empty(joined.trim());
        }
        parts.push(line.trim_end().to_string());
    }

    None // 未闭合，按无 docstring 处理
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
