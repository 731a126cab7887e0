//! # VASP INCAR / KPOINTS 解析器
//!
//! 只用于比较缺陷计算与体相计算的参数是否一致，因此只做轻量的规范化：
//! INCAR 转为 `TAG -> 值` 映射，KPOINTS 去掉注释行并压缩空白。
//!
//! ## 依赖关系
//! - 被 `analysis/metadata.rs` 使用

use super::read_text;
use crate::error::Result;
use std::collections::BTreeMap;
use std::path::Path;

/// 解析 INCAR 文件
pub fn parse_incar(path: &Path) -> Result<BTreeMap<String, String>> {
    Ok(parse_incar_content(&read_text(path)?))
}

/// 从字符串解析 INCAR：标签大写，值去除多余空白；`#` 和 `!` 之后为注释
pub fn parse_incar_content(content: &str) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();

    for line in content.lines() {
        let line = line.split(['#', '!']).next().unwrap_or("");
        for statement in line.split(';') {
            let Some((tag, value)) = statement.split_once('=') else {
                continue;
            };
            let tag = tag.trim().to_uppercase();
            if tag.is_empty() {
                continue;
            }
            tags.insert(tag, normalize_value(value));
        }
    }
    tags
}

/// 规范化标签值：压缩空白，`.TRUE.`/`T` 统一为 `True`
fn normalize_value(value: &str) -> String {
    let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
    match value.to_uppercase().as_str() {
        ".TRUE." | "T" | "TRUE" => "True".to_string(),
        ".FALSE." | "F" | "FALSE" => "False".to_string(),
        _ => value,
    }
}

/// 解析 KPOINTS 文件，返回规范化文本
pub fn parse_kpoints(path: &Path) -> Result<String> {
    Ok(normalize_kpoints(&read_text(path)?))
}

/// 去掉第一行注释，其余各行压缩空白后以 `; ` 连接
pub fn normalize_kpoints(content: &str) -> String {
    content
        .lines()
        .skip(1)
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}
