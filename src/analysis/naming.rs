//! # 缺陷条目命名
//!
//! 由目录名推断条目名称，必要时使用规范的未弛豫名称；名称冲突时按
//! 位点对称性 -> 最近邻 -> 字母序号 逐级细化。
//!
//! ## 功能
//! - 目录名电荷后缀的解析（`_+1`、`_-2`、`_0`）
//! - 常见缺陷命名格式的识别（v_X、X_i、X_Y、X_on_Y 等）
//! - 冲突条目的规范重命名
//!
//! ## 依赖关系
//! - 被 `analysis/defect_parser.rs` 与 `analysis/defects_parser.rs` 使用
//! - 使用 `regex` 识别名称格式

use crate::error::{DefectError, Result};
use crate::models::{format_charge, DefectEntry, DefectType};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

/// 目录名电荷后缀允许的最大绝对值
const MAX_FOLDER_CHARGE: i32 = 7;

fn charge_suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_([+-]?\d+)$").unwrap())
}

fn defect_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"^(?:",
            r"(?:v|V|Va)_[A-Z][a-z]?",
            r"|[A-Z][a-z]?_i",
            r"|Int_[A-Z][a-z]?",
            r"|[A-Z][a-z]?_(?:on_)?[A-Z][a-z]?",
            r")(?:_[A-Za-z0-9.]+)*?_[+-]?\d+$"
        ))
        .unwrap()
    })
}

/// 从目录名后缀推断电荷态：后缀必须带正负号（0 除外）且 |q| < 7
pub fn charge_from_folder_name(name: &str) -> Option<i32> {
    let captures = charge_suffix_regex().captures(name)?;
    let suffix = captures.get(1)?.as_str();
    let charge: i32 = suffix.parse().ok()?;
    let signed = suffix.starts_with('+') || suffix.starts_with('-') || charge == 0;
    (signed && charge.abs() < MAX_FOLDER_CHARGE).then_some(charge)
}

/// 名称是否已经以该电荷态后缀结尾（正电荷允许省略 `+`）
pub fn has_charge_suffix(name: &str, charge: i32) -> bool {
    if name.ends_with(&format!("_{}", format_charge(charge))) {
        return true;
    }
    charge > 0 && name.ends_with(&format!("_{}", charge))
}

/// 是否为可识别的缺陷名称（含电荷后缀）
pub fn is_recognised_defect_name(name: &str) -> bool {
    defect_name_regex().is_match(name)
}

/// 计算目录对应的条目目录名：`vasp_*` 子目录取其上级目录名
pub fn folder_display_name(path: &std::path::Path) -> String {
    let name = |p: &std::path::Path| {
        p.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    };
    let own = name(path);
    if own.contains("vasp") {
        path.parent().map(name).unwrap_or(own)
    } else {
        own
    }
}

/// 条目的候选名称
///
/// 目录名缺少电荷后缀时补上；不是可识别的缺陷名称时使用完整的未弛豫名称。
pub fn entry_name(folder_name: &str, charge: i32, full_unrelaxed_name: &str) -> String {
    let candidate = if has_charge_suffix(folder_name, charge) {
        folder_name.to_string()
    } else {
        format!("{}_{}", folder_name, format_charge(charge))
    };
    if is_recognised_defect_name(&candidate) {
        candidate
    } else {
        full_unrelaxed_name.to_string()
    }
}

/// 完整的未弛豫名称：v_O_Oh_+2
pub fn full_unrelaxed_name(defect_name: &str, site_symmetry: &str, charge: i32) -> String {
    format!("{}_{}_{}", defect_name, site_symmetry, format_charge(charge))
}

/// 去掉电荷后缀的名称
pub fn strip_charge(name: &str) -> &str {
    match name.rsplit_once('_') {
        Some((base, suffix)) if suffix.trim_start_matches(['+', '-']).parse::<u32>().is_ok() => {
            base
        }
        _ => name,
    }
}

// ─────────────────────────────────────────────────────────────
// 规范重命名
// ─────────────────────────────────────────────────────────────

/// 未弛豫位点最近邻原子的标签，如 "O2.10"
fn neighbour_label(entry: &DefectEntry) -> String {
    let crystal = &entry.unrelaxed_supercell;
    // 未弛豫结构中的间隙原子位于弛豫位置
    let site = match entry.defect.defect_type {
        DefectType::Interstitial => entry.metadata.defect_site,
        _ => entry.metadata.bulk_site,
    };
    crystal
        .atoms
        .iter()
        .map(|a| (a, crystal.lattice.distance(&a.position, &site)))
        .filter(|(_, d)| *d > 0.01)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(a, d)| format!("{}{:.2}", a.element, d))
        .unwrap_or_default()
}

/// 对共享名称的条目按逐级细化的规则重命名
///
/// 同名条目以及与其去掉电荷后同名的条目一起参与重命名，使同一位点的不同电荷态
/// 得到相同的基础名称。重命名后仍有冲突时返回 `NameCollision`。
pub fn resolve_name_collisions(entries: &mut [DefectEntry]) -> Result<()> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in entries.iter() {
        *counts.entry(entry.name.as_str()).or_default() += 1;
    }
    let colliding_bases: BTreeSet<String> = counts
        .iter()
        .filter(|(_, &n)| n > 1)
        .map(|(name, _)| strip_charge(name).to_string())
        .collect();
    if colliding_bases.is_empty() {
        return Ok(());
    }

    let mut to_rename: Vec<usize> = (0..entries.len())
        .filter(|&i| colliding_bases.contains(strip_charge(&entries[i].name)))
        .collect();
    to_rename.sort_by(|&a, &b| {
        let (ea, eb) = (&entries[a], &entries[b]);
        (ea.charge_state, &ea.metadata.folder).cmp(&(eb.charge_state, &eb.metadata.folder))
    });

    // 第一级：缺陷名 + 位点对称性
    let mut bases: Vec<String> = to_rename
        .iter()
        .map(|&i| {
            let e = &entries[i];
            format!("{}_{}", e.defect.name(), e.metadata.bulk_site_symmetry)
        })
        .collect();

    // 第二级：加上最近邻标签
    if has_duplicates(&to_rename, &bases, entries) {
        for (k, &i) in to_rename.iter().enumerate() {
            let label = neighbour_label(&entries[i]);
            if !label.is_empty() {
                bases[k] = format!("{}_{}", bases[k], label);
            }
        }
    }

    // 第三级：同一 (名称, 电荷) 组内按目录顺序追加字母
    if has_duplicates(&to_rename, &bases, entries) {
        let mut seen: BTreeMap<(String, i32), usize> = BTreeMap::new();
        let mut lettered = bases.clone();
        for (k, &i) in to_rename.iter().enumerate() {
            let n = seen
                .entry((bases[k].clone(), entries[i].charge_state))
                .or_default();
            lettered[k] = format!("{}{}", bases[k], letter(*n));
            *n += 1;
        }
        bases = lettered;
    }

    for (k, &i) in to_rename.iter().enumerate() {
        entries[i].name = format!("{}_{}", bases[k], format_charge(entries[i].charge_state));
    }

    let mut owners: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for entry in entries.iter() {
        owners
            .entry(entry.name.as_str())
            .or_default()
            .push(entry.metadata.folder.as_str());
    }
    if let Some((name, folders)) = owners.into_iter().find(|(_, f)| f.len() > 1) {
        return Err(DefectError::NameCollision {
            name: name.to_string(),
            folders: folders.join(", "),
        });
    }
    Ok(())
}

fn has_duplicates(indices: &[usize], bases: &[String], entries: &[DefectEntry]) -> bool {
    let mut keys = BTreeSet::new();
    !indices
        .iter()
        .zip(bases)
        .all(|(&i, base)| keys.insert((base.clone(), entries[i].charge_state)))
}

/// 0 -> a, 1 -> b, ..., 25 -> z, 26 -> aa
fn letter(index: usize) -> String {
    let mut n = index;
    let mut out = Vec::new();
    loop {
        out.push((b'a' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    out.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::entry::fixtures::sample_entry;

    #[test]
    fn test_charge_from_folder_name() {
        assert_eq!(charge_from_folder_name("v_O_+2"), Some(2));
        assert_eq!(charge_from_folder_name("Mg_i_C3v_-1"), Some(-1));
        assert_eq!(charge_from_folder_name("V_O_0"), Some(0));
        // 没有正负号的正整数可能是目录编号
        assert_eq!(charge_from_folder_name("defect_2"), None);
        assert_eq!(charge_from_folder_name("v_O_+8"), None);
        assert_eq!(charge_from_folder_name("bulk"), None);
    }

    #[test]
    fn test_recognised_names() {
        for name in [
            "v_O_+2",
            "V_O_0",
            "Va_Mg_-2",
            "Li_i_+1",
            "Int_Li_1",
            "Al_Mg_+1",
            "Al_on_Mg_0",
            "v_O_Oh_+2",
            "Li_i_C3v_Li2.50_+1",
        ] {
            assert!(is_recognised_defect_name(name), "{}", name);
        }
        for name in ["defect1_+1", "V_O_+1_dup_+1", "bulk_0", "v_O"] {
            assert!(!is_recognised_defect_name(name), "{}", name);
        }
    }

    #[test]
    fn test_entry_name() {
        assert_eq!(entry_name("V_O_+1", 1, "v_O_Oh_+1"), "V_O_+1");
        assert_eq!(entry_name("V_O_1", 1, "v_O_Oh_+1"), "V_O_1");
        assert_eq!(entry_name("v_O", -1, "v_O_Oh_-1"), "v_O_-1");
        assert_eq!(entry_name("V_O_+1_dup", 1, "v_O_Oh_+1"), "v_O_Oh_+1");
        assert_eq!(entry_name("run3", 0, "Li_i_Td_0"), "Li_i_Td_0");
    }

    #[test]
    fn test_strip_charge_and_folder_name() {
        assert_eq!(strip_charge("v_O_Oh_+2"), "v_O_Oh");
        assert_eq!(strip_charge("v_O_-1"), "v_O");
        assert_eq!(strip_charge("Li_i"), "Li_i");
        assert_eq!(
            folder_display_name(std::path::Path::new("/calc/v_O_+1/vasp_std")),
            "v_O_+1"
        );
        assert_eq!(folder_display_name(std::path::Path::new("/calc/v_O_+1")), "v_O_+1");
    }

    fn colliding(folder: &str, charge: i32, symmetry: &str, site: [f64; 3]) -> DefectEntry {
        let mut entry = sample_entry(charge, -15.0);
        entry.name = format!("v_O_{}", format_charge(charge));
        entry.metadata.folder = folder.to_string();
        entry.metadata.bulk_site_symmetry = symmetry.to_string();
        entry.metadata.bulk_site = site;
        entry
    }

    fn names(entries: &[DefectEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_collisions_resolved_by_site_symmetry() {
        let mut entries = vec![
            colliding("v_O_b", 1, "C4v", [0.5, 0.5, 0.5]),
            colliding("v_O_a", 1, "Oh", [0.5, 0.5, 0.5]),
            colliding("v_O_c", 2, "Oh", [0.5, 0.5, 0.5]),
        ];
        resolve_name_collisions(&mut entries).unwrap();
        // 同一基名的其他电荷态也使用规范名称
        assert_eq!(names(&entries), ["v_O_C4v_+1", "v_O_Oh_+1", "v_O_Oh_+2"]);
    }

    #[test]
    fn test_collisions_resolved_by_neighbour_label() {
        let mut entries = vec![
            colliding("v_O_a", 1, "Oh", [0.5, 0.5, 0.5]),
            colliding("v_O_b", 1, "Oh", [0.5, 0.0, 0.0]),
        ];
        resolve_name_collisions(&mut entries).unwrap();
        assert_eq!(names(&entries), ["v_O_Oh_Mg3.64_+1", "v_O_Oh_Mg2.10_+1"]);
    }

    #[test]
    fn test_collisions_resolved_by_letters_in_folder_order() {
        let mut entries = vec![
            colliding("v_O_b", 1, "Oh", [0.5, 0.5, 0.5]),
            colliding("v_O_a", 1, "Oh", [0.5, 0.5, 0.5]),
        ];
        resolve_name_collisions(&mut entries).unwrap();
        assert_eq!(names(&entries), ["v_O_Oh_Mg3.64b_+1", "v_O_Oh_Mg3.64a_+1"]);
    }

    #[test]
    fn test_unique_names_untouched() {
        let mut entries = vec![
            colliding("v_O_a", 1, "C4v", [0.5, 0.5, 0.5]),
            colliding("v_O_b", 2, "Oh", [0.5, 0.5, 0.5]),
        ];
        resolve_name_collisions(&mut entries).unwrap();
        assert_eq!(names(&entries), ["v_O_+1", "v_O_+2"]);
    }

    #[test]
    fn test_collision_after_rename_is_fatal() {
        let mut existing = colliding("v_O_c", 1, "Oh", [0.5, 0.5, 0.5]);
        existing.name = "v_O_Oh_+1".to_string();
        let mut entries = vec![
            colliding("v_O_a", 1, "Oh", [0.5, 0.5, 0.5]),
            colliding("v_O_b", 1, "C4v", [0.5, 0.5, 0.5]),
            existing,
        ];

        match resolve_name_collisions(&mut entries) {
            Err(DefectError::NameCollision { name, folders }) => {
                assert_eq!(name, "v_O_Oh_+1");
                assert_eq!(folders, "v_O_a, v_O_c");
            }
            other => panic!("expected a name collision, got {:?}", other),
        }
    }

    #[test]
    fn test_letters() {
        assert_eq!(letter(0), "a");
        assert_eq!(letter(25), "z");
        assert_eq!(letter(26), "aa");
    }
}
