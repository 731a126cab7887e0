//! # 计算参数一致性检查
//!
//! 比较缺陷计算与体相计算的 INCAR 标签、KPOINTS 与 POTCAR，参数不一致会直接
//! 影响能量差，因此记录在条目元数据中，由编排器统一汇总提示。
//!
//! ## 依赖关系
//! - 被 `analysis/defect_parser.rs` 使用
//! - 使用 `parsers/incar.rs`

use crate::error::Result;
use crate::models::ParameterMismatch;
use crate::parsers::incar::{parse_incar, parse_kpoints};
use crate::parsers::{locate_file, LocatedFile};
use std::collections::BTreeMap;
use std::path::Path;

/// 影响总能量、需要在缺陷与体相计算间保持一致的 INCAR 标签
const ENERGY_TAGS: &[&str] = &[
    "ADDGRID", "AEXX", "AGGAC", "AGGAX", "ALDAC", "ENCUT", "ENAUG", "GGA", "HFSCREEN", "ISPIN",
    "IVDW", "LASPH", "LHFCALC", "LMAXMIX", "LREAL", "LSORBIT", "METAGGA", "NKRED", "NKREDX",
    "NKREDY", "NKREDZ", "PREC", "PRECFOCK", "ROPT",
];

/// 以该前缀开头的标签一律比较（DFT+U 参数）
const LDAU_PREFIX: &str = "LDAU";

/// 数值比较的相对容差
const NUMERIC_RTOL: f64 = 1e-3;

/// 体积相对差超过该值时提示
pub const VOLUME_RTOL: f64 = 1e-2;

/// 一次计算的输入参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunConfiguration {
    pub incar: Option<BTreeMap<String, String>>,
    pub kpoints: Option<String>,
    /// 元素 -> POTCAR TITEL
    pub potcars: BTreeMap<String, String>,
}

impl RunConfiguration {
    /// 读取目录中的 INCAR 与 KPOINTS（均可缺失），POTCAR 信息来自 OUTCAR
    ///
    /// 返回值的第二项是存在多个候选文件时的定位结果，供调用方提示。
    pub fn load(
        dir: &Path,
        potcars: BTreeMap<String, String>,
    ) -> Result<(Self, Vec<(&'static str, LocatedFile)>)> {
        let mut ambiguous = Vec::new();

        let incar = match locate_file(dir, "INCAR")? {
            Some(found) => {
                let tags = parse_incar(&found.path)?;
                if found.is_ambiguous() {
                    ambiguous.push(("INCAR", found));
                }
                Some(tags)
            }
            None => None,
        };
        let kpoints = match locate_file(dir, "KPOINTS")? {
            Some(found) => {
                let text = parse_kpoints(&found.path)?;
                if found.is_ambiguous() {
                    ambiguous.push(("KPOINTS", found));
                }
                Some(text)
            }
            None => None,
        };

        Ok((
            RunConfiguration {
                incar,
                kpoints,
                potcars,
            },
            ambiguous,
        ))
    }

    /// 与体相计算比较，返回全部不一致项
    pub fn compare(&self, bulk: &RunConfiguration) -> Vec<ParameterMismatch> {
        let mut mismatches = Vec::new();
        if let (Some(defect), Some(bulk)) = (&self.incar, &bulk.incar) {
            mismatches.extend(compare_incar_tags(defect, bulk));
        }
        if let (Some(defect), Some(bulk)) = (&self.kpoints, &bulk.kpoints) {
            if defect != bulk {
                mismatches.push(ParameterMismatch::Kpoints {
                    defect: defect.clone(),
                    bulk: bulk.clone(),
                });
            }
        }
        mismatches.extend(compare_potcars(&self.potcars, &bulk.potcars));
        mismatches
    }
}

/// 标签是否参与比较
fn is_energy_tag(tag: &str) -> bool {
    tag.starts_with(LDAU_PREFIX) || ENERGY_TAGS.contains(&tag)
}

/// 比较 INCAR 中影响能量的标签；缺失的标签记为 "Not set"
pub fn compare_incar_tags(
    defect: &BTreeMap<String, String>,
    bulk: &BTreeMap<String, String>,
) -> Vec<ParameterMismatch> {
    let mut tags: Vec<&String> = defect
        .keys()
        .chain(bulk.keys())
        .filter(|t| is_energy_tag(t))
        .collect();
    tags.sort();
    tags.dedup();

    tags.into_iter()
        .filter_map(|tag| {
            let d = defect.get(tag);
            let b = bulk.get(tag);
            let same = match (d, b) {
                (Some(d), Some(b)) => values_match(d, b),
                (None, None) => true,
                _ => false,
            };
            (!same).then(|| ParameterMismatch::Incar {
                tag: tag.clone(),
                defect: d.cloned().unwrap_or_else(|| "Not set".to_string()),
                bulk: b.cloned().unwrap_or_else(|| "Not set".to_string()),
            })
        })
        .collect()
}

/// 数值列表逐项按相对容差比较，其余情况忽略大小写比较
fn values_match(a: &str, b: &str) -> bool {
    let numbers = |s: &str| -> Option<Vec<f64>> {
        s.split_whitespace().map(|t| t.parse::<f64>().ok()).collect()
    };
    match (numbers(a), numbers(b)) {
        (Some(x), Some(y)) if !x.is_empty() && x.len() == y.len() => x
            .iter()
            .zip(&y)
            .all(|(p, q)| (p - q).abs() <= NUMERIC_RTOL * p.abs().max(q.abs()).max(1e-12)),
        _ => a.eq_ignore_ascii_case(b),
    }
}

/// 比较两组 POTCAR（只比较两边都有的元素）
pub fn compare_potcars(
    defect: &BTreeMap<String, String>,
    bulk: &BTreeMap<String, String>,
) -> Vec<ParameterMismatch> {
    defect
        .iter()
        .filter_map(|(element, d)| {
            let b = bulk.get(element)?;
            (symbol(d) != symbol(b)).then(|| ParameterMismatch::Potcar {
                element: element.clone(),
                defect: d.clone(),
                bulk: b.clone(),
            })
        })
        .collect()
}

/// TITEL 中的赝势符号，如 "PAW_PBE Mg_pv 13Apr2007" -> "Mg_pv"
fn symbol(title: &str) -> &str {
    title.split_whitespace().nth(1).unwrap_or(title)
}

/// 缺陷与体相超胞体积是否相差超过 1%
pub fn volumes_differ(defect: f64, bulk: f64) -> bool {
    (defect - bulk).abs() > VOLUME_RTOL * bulk.abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_incar_mismatch_detection() {
        let defect = tags(&[
            ("ENCUT", "520"),
            ("NSW", "200"),
            ("LDAUU", "5 0"),
            ("LASPH", "True"),
        ]);
        let bulk = tags(&[
            ("ENCUT", "520.0"),
            ("NSW", "0"),
            ("LDAUU", "4 0"),
            ("AEXX", "0.25"),
        ]);

        let mismatches = compare_incar_tags(&defect, &bulk);
        let names: Vec<String> = mismatches
            .iter()
            .map(|m| match m {
                ParameterMismatch::Incar { tag, .. } => tag.clone(),
                _ => String::new(),
            })
            .collect();
        // NSW 不影响能量，ENCUT 数值相同
        assert_eq!(names, vec!["AEXX", "LASPH", "LDAUU"]);
        assert_eq!(
            mismatches[0],
            ParameterMismatch::Incar {
                tag: "AEXX".to_string(),
                defect: "Not set".to_string(),
                bulk: "0.25".to_string(),
            }
        );
    }

    #[test]
    fn test_potcar_and_kpoints() {
        let defect = RunConfiguration {
            incar: None,
            kpoints: Some("0; Gamma; 2 2 2".to_string()),
            potcars: tags(&[("Mg", "PAW_PBE Mg_pv 13Apr2007"), ("O", "PAW_PBE O 08Apr2002")]),
        };
        let bulk = RunConfiguration {
            incar: None,
            kpoints: Some("0; Gamma; 1 1 1".to_string()),
            potcars: tags(&[("Mg", "PAW_PBE Mg 13Apr2007"), ("O", "PAW_PBE O 08Apr2002")]),
        };
        let mismatches = defect.compare(&bulk);
        assert_eq!(mismatches.len(), 2);
        assert!(matches!(mismatches[0], ParameterMismatch::Kpoints { .. }));
        assert!(matches!(&mismatches[1], ParameterMismatch::Potcar { element, .. } if element == "Mg"));
    }

    #[test]
    fn test_load_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("INCAR"), "ENCUT = 400\n").unwrap();
        std::fs::write(dir.path().join("INCAR.bak"), "ENCUT = 300\n").unwrap();

        let (config, ambiguous) = RunConfiguration::load(dir.path(), BTreeMap::new()).unwrap();
        assert_eq!(
            config.incar.unwrap().get("ENCUT").map(String::as_str),
            Some("400")
        );
        assert!(config.kpoints.is_none());
        assert_eq!(ambiguous.len(), 1);
        assert_eq!(ambiguous[0].0, "INCAR");
    }

    #[test]
    fn test_volumes_differ() {
        assert!(!volumes_differ(592.7, 592.704));
        assert!(volumes_differ(600.0, 592.704));
    }
}
