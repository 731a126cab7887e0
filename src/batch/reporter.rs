//! # 提示信息汇总
//!
//! 收集每个目录解析时产生的提示与错误，在批处理结束后合并输出，避免 N 个相似目录
//! 产生 N 份重复的提示。
//!
//! ## 功能
//! - 解析失败按错误信息分组
//! - 多个候选文件的提示按文件类型合并
//! - 多个目录遇到的相同提示只输出一次，并列出受影响的目录
//! - 批处理级别的提示（重复条目、误差超限、修正方案混用、计算参数不一致）
//!
//! ## 依赖关系
//! - 被 `analysis/defect_parser.rs` 与 `analysis/defects_parser.rs` 使用

use crate::corrections::{format_error, CorrectionWarning};
use crate::models::{CorrectionScheme, ParameterMismatch};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ─────────────────────────────────────────────────────────────
// 单目录提示
// ─────────────────────────────────────────────────────────────

/// 解析单个目录时产生的提示
#[derive(Debug, Clone, PartialEq)]
pub enum ParseWarning {
    /// 目录解析失败，该目录被跳过
    ParsingFailed { error: String },
    /// 目录中有多个同类文件
    MultipleFiles {
        file_type: String,
        directory: String,
        chosen: String,
    },
    /// 带电缺陷但没有介电常数
    NoDielectric { charge: i32 },
    /// 缺陷位点与体相晶格基矢可能不一致
    BasisMismatch(String),
    /// 缺陷与体相超胞体积不同
    VolumeMismatch { defect: f64, bulk: f64 },
    /// 电荷修正相关提示
    Correction(CorrectionWarning),
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseWarning::ParsingFailed { error } => write!(f, "Parsing failed: {}", error),
            ParseWarning::MultipleFiles {
                file_type,
                directory,
                chosen,
            } => write!(
                f,
                "Multiple `{}` files found in directory: {}. Using {} to parse the calculation.",
                file_type, directory, chosen
            ),
            ParseWarning::NoDielectric { charge } => write!(
                f,
                "The dielectric constant is needed to compute finite-size charge corrections for \
                 charge state {}, but none was provided, so charge corrections will not be applied. \
                 Supply it with `--dielectric`.",
                charge
            ),
            ParseWarning::BasisMismatch(reason) => f.write_str(reason),
            ParseWarning::VolumeMismatch { defect, bulk } => write!(
                f,
                "The defect and bulk supercells are not the same size, having volumes of {:.1} and \
                 {:.1} Å^3 respectively. This may cause errors in the parsed energies; the same \
                 fixed supercell should be used for both the defect and bulk calculations.",
                defect, bulk
            ),
            ParseWarning::Correction(w) => write!(f, "{}", w),
        }
    }
}

impl ParseWarning {
    /// 在批处理中另行汇总、不逐目录输出的提示
    fn is_batched(&self) -> bool {
        matches!(
            self,
            ParseWarning::Correction(CorrectionWarning::ErrorAboveTolerance { .. })
        )
    }
}

// ─────────────────────────────────────────────────────────────
// 批处理级别提示
// ─────────────────────────────────────────────────────────────

/// 整个批处理结束后给出的提示
#[derive(Debug, Clone, PartialEq)]
pub enum BatchWarning {
    /// 超胞能量完全相同的条目组，每组第一个被保留
    DuplicateEntries { groups: Vec<Vec<(String, String)>> },
    /// 修正误差超过容差的条目
    ErrorAboveTolerance {
        scheme: CorrectionScheme,
        tolerance: f64,
        entries: Vec<(String, f64)>,
    },
    /// 批处理中使用了不同的电荷修正方案
    MixedSchemes { keys: Vec<String> },
    /// INCAR 标签不一致
    IncarMismatch {
        entries: Vec<(String, Vec<ParameterMismatch>)>,
    },
    /// KPOINTS 不一致
    KpointsMismatch {
        entries: Vec<(String, Vec<ParameterMismatch>)>,
    },
    /// POTCAR 不一致
    PotcarMismatch {
        entries: Vec<(String, Vec<ParameterMismatch>)>,
    },
}

fn join_mismatches(entries: &[(String, Vec<ParameterMismatch>)]) -> String {
    entries
        .iter()
        .map(|(name, mismatches)| {
            let items: Vec<String> = mismatches.iter().map(|m| m.to_string()).collect();
            format!("{}: {}", name, items.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl fmt::Display for BatchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchWarning::DuplicateEntries { groups } => {
                let groups: Vec<String> = groups
                    .iter()
                    .map(|group| {
                        let items: Vec<String> = group
                            .iter()
                            .map(|(name, folder)| format!("{} ({})", name, folder))
                            .collect();
                        format!("[{}]", items.join(", "))
                    })
                    .collect();
                write!(
                    f,
                    "The following parsed defect entries were found to be duplicates (exact same \
                     defect supercell energies). The first of each duplicate group shown will be \
                     kept and the other duplicate entries omitted:\n{}",
                    groups.join("\n")
                )
            }
            BatchWarning::ErrorAboveTolerance {
                scheme,
                tolerance,
                entries,
            } => {
                let lines: Vec<String> = entries
                    .iter()
                    .map(|(name, error)| format!("{}: {} eV", name, format_error(*error, *tolerance)))
                    .collect();
                write!(
                    f,
                    "Estimated error in the {} charge correction for certain defects is greater than \
                     the `error_tolerance` (= {} eV):\n{}\nYou may want to check the accuracy of the \
                     correction plots, as a large error may be caused by shallow or unstable charge \
                     states, or a supercell that is too small.",
                    scheme.label(),
                    format_error(*tolerance, *tolerance),
                    lines.join("\n")
                )
            }
            BatchWarning::MixedSchemes { keys } => write!(
                f,
                "Multiple types of charge correction have been applied to the parsed defect entries \
                 ({}). Energies corrected with different schemes may not be directly comparable.",
                keys.join(", ")
            ),
            BatchWarning::IncarMismatch { entries } => write!(
                f,
                "There are mismatching INCAR tags for (some of) your defect and bulk calculations \
                 which are likely to cause errors in the parsed results (energies). Found the \
                 following differences:\n(in the format: 'Defect: TAG: defect value vs bulk value'):\n\
                 {}\nIn general, the same INCAR settings should be used in all final calculations \
                 for these tags which can affect energies!",
                join_mismatches(entries)
            ),
            BatchWarning::KpointsMismatch { entries } => write!(
                f,
                "There are mismatching KPOINTS for (some of) your defect and bulk calculations which \
                 are likely to cause errors in the parsed results (energies). Found the following \
                 differences:\n{}\nIn general, the same KPOINTS settings should be used for all \
                 final calculations for accurate results!",
                join_mismatches(entries)
            ),
            BatchWarning::PotcarMismatch { entries } => write!(
                f,
                "There are mismatching POTCAR symbols for (some of) your defect and bulk \
                 calculations which are likely to cause severe errors in the parsed results \
                 (energies). Found the following differences:\n{}\nIn general, the same POTCAR \
                 settings should be used for all calculations for accurate results!",
                join_mismatches(entries)
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────
// 汇总器
// ─────────────────────────────────────────────────────────────

/// 批处理期间持有全部提示的汇总器
#[derive(Debug, Default)]
pub struct WarningReporter {
    /// 目录 -> 提示，按目录名排序
    per_folder: BTreeMap<String, Vec<ParseWarning>>,
    batch: Vec<BatchWarning>,
}

impl WarningReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一个目录的全部提示
    pub fn record(&mut self, folder: &str, warnings: Vec<ParseWarning>) {
        if warnings.is_empty() {
            return;
        }
        self.per_folder
            .entry(folder.to_string())
            .or_default()
            .extend(warnings);
    }

    /// 记录批处理级别的提示
    pub fn push(&mut self, warning: BatchWarning) {
        self.batch.push(warning);
    }

    /// 解析失败的目录数
    pub fn failure_count(&self) -> usize {
        self.per_folder
            .values()
            .filter(|ws| ws.iter().any(|w| matches!(w, ParseWarning::ParsingFailed { .. })))
            .count()
    }

    /// 所有解析失败的说明，用于致命错误信息
    pub fn failure_details(&self) -> String {
        self.per_folder
            .iter()
            .flat_map(|(folder, ws)| {
                ws.iter().filter_map(move |w| match w {
                    ParseWarning::ParsingFailed { error } => Some(format!("{}: {}", folder, error)),
                    _ => None,
                })
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 合并后的提示信息
    pub fn summarize(&self) -> Vec<String> {
        let mut messages = Vec::new();

        // 解析失败按错误分组
        let mut failures: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        // 多个候选文件按文件类型分组
        let mut multiple_files: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();
        // 其余提示：信息 -> 目录
        let mut advisories: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();

        for (folder, warnings) in &self.per_folder {
            for warning in warnings {
                match warning {
                    ParseWarning::ParsingFailed { error } => {
                        failures.entry(error.as_str()).or_default().push(folder);
                    }
                    ParseWarning::MultipleFiles {
                        file_type,
                        directory,
                        chosen,
                    } => {
                        multiple_files
                            .entry(file_type.as_str())
                            .or_default()
                            .push((directory.as_str(), chosen.as_str()));
                    }
                    w if w.is_batched() => {}
                    w => {
                        advisories.entry(w.to_string()).or_default().insert(folder);
                    }
                }
            }
        }

        for (error, folders) in &failures {
            if folders.len() > 1 {
                messages.push(format!(
                    "Parsing failed for defects: [{}] with the same error:\n{}",
                    folders.join(", "),
                    error
                ));
            } else {
                messages.push(format!(
                    "Parsing failed for defect {} with error:\n{}",
                    folders[0], error
                ));
            }
        }

        for (file_type, entries) in &multiple_files {
            let lines: Vec<String> = entries
                .iter()
                .map(|(directory, chosen)| format!("{}: {}", directory, chosen))
                .collect();
            messages.push(format!(
                "Multiple `{}` files found in certain defect directories:\n\
                 (directory: chosen file for parsing):\n{}",
                file_type,
                lines.join("\n")
            ));
        }

        // 只出现在一个目录中的提示按目录合并
        let mut unique: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        let mut repeated = Vec::new();
        for (message, folders) in &advisories {
            if folders.len() > 1 {
                repeated.push((message, folders));
            } else if let Some(folder) = folders.iter().next() {
                unique.entry(*folder).or_default().push(message);
            }
        }
        for (folder, lines) in &unique {
            messages.push(format!(
                "Warning(s) encountered when parsing {}:\n\n{}",
                folder,
                lines.join("\n")
            ));
        }
        for (message, folders) in repeated {
            let names: Vec<&str> = folders.iter().copied().collect();
            messages.push(format!(
                "Defects: {{{}}} each encountered the same warning:\n{}",
                names.join(", "),
                message
            ));
        }

        messages.extend(self.batch.iter().map(|w| w.to_string()));
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_grouped_by_error() {
        let mut reporter = WarningReporter::new();
        let failed = |e: &str| {
            vec![ParseWarning::ParsingFailed {
                error: e.to_string(),
            }]
        };
        reporter.record("v_O_0", failed("No OUTCAR file found"));
        reporter.record("v_O_+1", failed("No OUTCAR file found"));
        reporter.record("Mg_i_+2", failed("bad CONTCAR"));

        let messages = reporter.summarize();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with("Parsing failed for defects: [v_O_+1, v_O_0]"));
        assert_eq!(
            messages[1],
            "Parsing failed for defect Mg_i_+2 with error:\nbad CONTCAR"
        );
        assert_eq!(reporter.failure_count(), 3);
    }

    #[test]
    fn test_repeated_advisory_reported_once() {
        let mut reporter = WarningReporter::new();
        for folder in ["v_O_+1", "v_O_+2", "Mg_i_+1"] {
            reporter.record(folder, vec![ParseWarning::NoDielectric { charge: 1 }]);
        }
        reporter.record(
            "v_O_+2",
            vec![ParseWarning::VolumeMismatch {
                defect: 600.0,
                bulk: 592.7,
            }],
        );

        let messages = reporter.summarize();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with("Warning(s) encountered when parsing v_O_+2"));
        assert!(messages[1].starts_with("Defects: {Mg_i_+1, v_O_+1, v_O_+2} each encountered"));
    }

    #[test]
    fn test_multiple_files_merged_and_tolerance_batched() {
        let mut reporter = WarningReporter::new();
        for folder in ["a", "b"] {
            reporter.record(
                folder,
                vec![
                    ParseWarning::MultipleFiles {
                        file_type: "OUTCAR".to_string(),
                        directory: format!("{}/vasp_std", folder),
                        chosen: "OUTCAR".to_string(),
                    },
                    ParseWarning::Correction(CorrectionWarning::ErrorAboveTolerance {
                        scheme: CorrectionScheme::Kumagai,
                        name: folder.to_string(),
                        error: 0.2,
                        tolerance: 0.05,
                    }),
                ],
            );
        }
        reporter.push(BatchWarning::ErrorAboveTolerance {
            scheme: CorrectionScheme::Kumagai,
            tolerance: 0.05,
            entries: vec![("a".to_string(), 0.2), ("b".to_string(), 0.2)],
        });

        let messages = reporter.summarize();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("a/vasp_std: OUTCAR\nb/vasp_std: OUTCAR"));
        assert!(messages[1].contains("(= 0.050 eV):\na: 0.200 eV\nb: 0.200 eV"));
    }
}
