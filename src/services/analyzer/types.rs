//! 代码结构类型定义
//!
//! 提取结果是生成阶段的事实锚点：参数顺序与源码顺序严格一致，
//! 置信度标记区分语法级提取与文本模式匹配。

use serde::Serialize;

/// 提取置信度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// 语法级提取，签名信息精确可信
    Structured,
    /// 文本模式匹配，尽力而为，下游必须弱化表述
    PatternBased,
}

/// 函数参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamInfo {
    /// 参数名（vararg 保留 * / ** 前缀）
    pub name: String,
    /// 类型注解
    pub annotation: Option<String>,
    /// 默认值（源码文本）
    pub default: Option<String>,
    /// 仅关键字参数
    pub keyword_only: bool,
}

impl ParamInfo {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotation: None,
            default: None,
            keyword_only: false,
        }
    }
}

/// 函数/方法信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionInfo {
    pub name: String,
    /// 参数列表，顺序与源码文本顺序完全一致
    pub params: Vec<ParamInfo>,
    pub return_type: Option<String>,
    pub docstring: Option<String>,
    /// 装饰器名称，按出现顺序
    pub decorators: Vec<String>,
    pub is_async: bool,
}

impl FunctionInfo {
    /// 渲染成单行签名，用于 prompt 的结构段
    pub fn signature(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut star_emitted = false;

        for param in &self.params {
            if param.name.starts_with('*') {
                star_emitted = true;
            } else if param.keyword_only && !star_emitted {
                // 源码中以裸 * 分隔的仅关键字参数
                parts.push("*".to_string());
                star_emitted = true;
            }

            let mut piece = param.name.clone();
            if let Some(annotation) = &param.annotation {
                piece.push_str(&format!(": {}", annotation));
            }
            if let Some(default) = &param.default {
                if param.annotation.is_some() {
                    piece.push_str(&format!(" = {}", default));
                } else {
                    piece.push_str(&format!("={}", default));
                }
            }
            parts.push(piece);
        }

        let prefix = if self.is_async { "async " } else { "" };
        let ret = self
            .return_type
            .as_ref()
            .map(|r| format!(" -> {}", r))
            .unwrap_or_default();

        format!("{}{}({}){}", prefix, self.name, parts.join(", "), ret)
    }
}

/// 类信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassInfo {
    pub name: String,
    /// 基类名，按出现顺序
    pub bases: Vec<String>,
    pub docstring: Option<String>,
    /// 方法列表，按出现顺序
    pub methods: Vec<FunctionInfo>,
    /// 属性名，尽力而为，按首次出现顺序
    pub attributes: Vec<String>,
}

/// 单个源文件的完整分析结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAnalysis {
    pub path: String,
    pub language: String,
    pub confidence: Confidence,
    pub module_docstring: Option<String>,
    pub functions: Vec<FunctionInfo>,
    pub classes: Vec<ClassInfo>,
    pub imports: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_rendering() {
        let func = FunctionInfo {
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
        };

        assert_eq!(
            func.signature(),
            "add(a: int, b: int, *, round_result: bool = False) -> int"
        );
    }

    #[test]
    fn test_signature_async_and_vararg() {
        let func = FunctionInfo {
            name: "run".to_string(),
            params: vec![
                ParamInfo::plain("self"),
                ParamInfo::plain("*args"),
                ParamInfo {
                    name: "timeout".to_string(),
                    annotation: None,
                    default: Some("10".to_string()),
                    keyword_only: true,
                },
            ],
            return_type: None,
            docstring: None,
            decorators: vec![],
            is_async: true,
        };

        // *args 之后的仅关键字参数不再需要裸 * 分隔符
        assert_eq!(func.signature(), "async run(self, *args, timeout=10)");
    }
}
