//! # 批量缺陷解析
//!
//! 从根目录发现体相与缺陷计算，并行解析所有缺陷目录，去重、统一命名，
//! 汇总提示信息，最后按需保存档案。
//!
//! ## 功能
//! - 目录发现与运行子目录投票（`batch/collector.rs`）
//! - 先单独解析一个带电缺陷，再预加载体相电势，其余目录进入线程池
//! - 超胞能量完全相同的条目视为重复，只保留一个
//! - 名称冲突时规范重命名，重命名后仍冲突则报错
//! - 批处理级别提示：误差超限、修正方案混用、计算参数不一致
//!
//! ## 依赖关系
//! - 被 `commands/parse.rs` 调用
//! - 使用 `analysis/defect_parser.rs` 解析单个目录
//! - 使用 `batch/` 的收集器、执行器与提示汇总器

use super::defect_parser::{BulkData, DefectParser, ParsedDefect};
use super::naming::{folder_display_name, resolve_name_collisions};
use super::{ArchiveTarget, ParserConfig};
use crate::batch::{
    BatchResult, BatchRunner, BatchWarning, FolderCollector, ParseWarning, ProcessResult,
    WarningReporter,
};
use crate::error::{DefectError, Result};
use crate::models::{
    BandEdges, CorrectionScheme, DefectArchive, DefectEntry, ParameterMismatch,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// 批量解析结果
#[derive(Debug, Clone)]
pub struct ParsedBatch {
    /// 名称 -> 缺陷条目
    pub entries: BTreeMap<String, DefectEntry>,
    /// 汇总后的提示信息
    pub warnings: Vec<String>,
    /// 实际使用的体相计算目录
    pub bulk_path: PathBuf,
    /// 运行子目录，"." 表示目录本身
    pub subfolder: String,
    /// 档案保存位置
    pub archive_path: Option<PathBuf>,
    /// 体相 VBM / CBM / 带隙
    pub band_edges: Option<BandEdges>,
}

impl ParsedBatch {
    pub fn archive(&self) -> DefectArchive {
        DefectArchive::new(self.entries.clone())
    }
}

/// 批量缺陷解析器
pub struct DefectsParser {
    root: PathBuf,
    config: ParserConfig,
}

impl DefectsParser {
    pub fn new(root: impl Into<PathBuf>, config: ParserConfig) -> Self {
        DefectsParser {
            root: root.into(),
            config,
        }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// 解析根目录下的全部缺陷计算
    pub fn parse(&self) -> Result<ParsedBatch> {
        let config = &self.config;
        let collected = FolderCollector::new(self.root.clone(), config.backend.main_output())?
            .with_bulk_path(config.bulk_path.clone())
            .with_subfolder(config.subfolder.clone())
            .collect()?;
        if collected.defect_folders.is_empty() {
            return Err(DefectError::NoDefectFolders {
                path: collected.root.display().to_string(),
            });
        }

        let mut reporter = WarningReporter::new();
        let bulk = BulkData::load(&collected.bulk_dir, config)?;
        reporter.record(&folder_display_name(&bulk.path), bulk.notices.clone());

        let parser = DefectParser::new(&bulk, config);
        let parse_folder = |folder: &String| -> ProcessResult<(String, ParsedDefect)> {
            match parser.parse(folder, &collected.calculation_dir(folder)) {
                Ok(parsed) => ProcessResult::Success((folder.clone(), parsed)),
                Err(e) => ProcessResult::Failed(folder.clone(), e.to_string()),
            }
        };

        let folders = &collected.defect_folders;
        let jobs = config
            .processes
            .unwrap_or_else(|| BatchRunner::default_jobs(folders.len()));
        let runner = BatchRunner::new(jobs).with_progress(config.show_progress);
        let pb = runner.progress_bar(folders.len() as u64, "Parsing defect calculations");

        // 先单独解析一个带电缺陷，确认修正设置可用，并让体相电势只加载一次
        let mut results = BatchResult::default();
        let representative = representative_charged_folder(folders);
        if let Some(folder) = representative {
            pb.set_message(format!("Parsing {}", folder));
            results.merge(parse_folder(folder));
            pb.inc(1);
        }
        bulk.prewarm();

        let remaining: Vec<String> = folders
            .iter()
            .filter(|f| Some(*f) != representative)
            .cloned()
            .collect();
        let pooled = runner.run(&remaining, &pb, |f| f.clone(), parse_folder)?;
        pb.finish_and_clear();
        results.outputs.extend(pooled.outputs);
        results.failures.extend(pooled.failures);

        for (folder, error) in &results.failures {
            reporter.record(
                folder,
                vec![ParseWarning::ParsingFailed {
                    error: error.clone(),
                }],
            );
        }
        let mut parsed_entries = Vec::with_capacity(results.outputs.len());
        let mut folder_warnings = BTreeMap::new();
        for (folder, parsed) in results.outputs {
            folder_warnings.insert(folder, parsed.warnings);
            parsed_entries.push(parsed.entry);
        }

        if parsed_entries.is_empty() {
            return Err(DefectError::NoEntriesParsed {
                path: collected.root.display().to_string(),
                details: reporter.failure_details(),
            });
        }

        let (mut entries, duplicates) = deduplicate(parsed_entries);
        record_kept_warnings(&mut reporter, folder_warnings, &entries);
        if !duplicates.is_empty() {
            reporter.push(BatchWarning::DuplicateEntries { groups: duplicates });
        }
        resolve_name_collisions(&mut entries)?;

        for warning in batch_warnings(&entries, config.corrections.error_tolerance) {
            reporter.push(warning);
        }

        let entries: BTreeMap<String, DefectEntry> =
            entries.into_iter().map(|e| (e.name.clone(), e)).collect();

        let archive_path = match &config.archive {
            ArchiveTarget::Disabled => None,
            ArchiveTarget::Path(path) => Some(path.clone()),
            ArchiveTarget::Default => Some(default_archive_path(&self.root, &bulk)),
        };
        if let Some(path) = &archive_path {
            DefectArchive::new(entries.clone()).save(path)?;
        }

        Ok(ParsedBatch {
            entries,
            warnings: reporter.summarize(),
            bulk_path: bulk.path.clone(),
            subfolder: collected.subfolder.clone(),
            archive_path,
            band_edges: bulk.band_edges,
        })
    }
}

/// 默认档案路径：`{约化化学式}_defect_dict.json.gz`
pub fn default_archive_path(root: &Path, bulk: &BulkData) -> PathBuf {
    root.join(format!(
        "{}_defect_dict.json.gz",
        bulk.symmetry.primitive.reduced_formula()
    ))
}

/// 目录名以非零数字结尾的最后一个目录
fn representative_charged_folder(folders: &[String]) -> Option<&String> {
    folders.iter().rev().find(|f| {
        f.chars()
            .last()
            .is_some_and(|c| c.is_ascii_digit() && c != '0')
    })
}

// ─────────────────────────────────────────────────────────────
// 去重
// ─────────────────────────────────────────────────────────────

fn dedup_key(entry: &DefectEntry) -> (usize, &str, usize, &str) {
    (
        entry.name.len(),
        entry.name.as_str(),
        entry.metadata.folder.len(),
        entry.metadata.folder.as_str(),
    )
}

/// 按超胞能量去重，返回保留的条目与重复组（每组第一个被保留）
fn deduplicate(parsed: Vec<DefectEntry>) -> (Vec<DefectEntry>, Vec<Vec<(String, String)>>) {
    let mut by_energy: BTreeMap<u64, Vec<DefectEntry>> = BTreeMap::new();
    for entry in parsed {
        by_energy
            .entry(entry.supercell_energy.to_bits())
            .or_default()
            .push(entry);
    }

    let mut kept = Vec::new();
    let mut groups = Vec::new();
    for (_, mut group) in by_energy {
        group.sort_by(|a, b| dedup_key(a).cmp(&dedup_key(b)));
        if group.len() > 1 {
            groups.push(
                group
                    .iter()
                    .map(|e| (e.name.clone(), e.metadata.folder.clone()))
                    .collect(),
            );
        }
        kept.extend(group.into_iter().next());
    }

    kept.sort_by(|a, b| a.metadata.folder.cmp(&b.metadata.folder));
    groups.sort();
    (kept, groups)
}

/// 只记录去重后保留的目录的提示，被丢弃的重复目录不再报告
fn record_kept_warnings(
    reporter: &mut WarningReporter,
    mut per_folder: BTreeMap<String, Vec<ParseWarning>>,
    kept: &[DefectEntry],
) {
    for entry in kept {
        let folder = &entry.metadata.folder;
        if let Some(warnings) = per_folder.remove(folder) {
            reporter.record(folder, warnings);
        }
    }
}

// ─────────────────────────────────────────────────────────────
// 批处理级别提示
// ─────────────────────────────────────────────────────────────

fn batch_warnings(entries: &[DefectEntry], tolerance: f64) -> Vec<BatchWarning> {
    let mut warnings = Vec::new();

    let mut above: BTreeMap<CorrectionScheme, Vec<(String, f64)>> = BTreeMap::new();
    for entry in entries {
        if let Some(result) = entry.charge_correction() {
            if result.estimated_error > tolerance {
                above
                    .entry(result.scheme)
                    .or_default()
                    .push((entry.name.clone(), result.estimated_error));
            }
        }
    }
    for (scheme, mut list) in above {
        list.sort_by(|a, b| a.0.cmp(&b.0));
        warnings.push(BatchWarning::ErrorAboveTolerance {
            scheme,
            tolerance,
            entries: list,
        });
    }

    let keys: BTreeSet<&str> = entries
        .iter()
        .flat_map(|e| e.corrections.keys())
        .map(String::as_str)
        .filter(|k| k.ends_with("_charge_correction"))
        .collect();
    if keys.len() > 1 {
        warnings.push(BatchWarning::MixedSchemes {
            keys: keys.into_iter().map(str::to_string).collect(),
        });
    }

    let incar = mismatches(entries, |m| matches!(m, ParameterMismatch::Incar { .. }));
    if !incar.is_empty() {
        warnings.push(BatchWarning::IncarMismatch { entries: incar });
    }
    let kpoints = mismatches(entries, |m| matches!(m, ParameterMismatch::Kpoints { .. }));
    if !kpoints.is_empty() {
        warnings.push(BatchWarning::KpointsMismatch { entries: kpoints });
    }
    let potcar = mismatches(entries, |m| matches!(m, ParameterMismatch::Potcar { .. }));
    if !potcar.is_empty() {
        warnings.push(BatchWarning::PotcarMismatch { entries: potcar });
    }

    warnings
}

/// 某类参数不一致的条目，按 (不一致数, 名称) 降序
fn mismatches<F>(entries: &[DefectEntry], kind: F) -> Vec<(String, Vec<ParameterMismatch>)>
where
    F: Fn(&ParameterMismatch) -> bool,
{
    let mut found: Vec<(String, Vec<ParameterMismatch>)> = entries
        .iter()
        .filter_map(|e| {
            let list: Vec<ParameterMismatch> = e
                .metadata
                .parameter_mismatches
                .iter()
                .filter(|m| kind(m))
                .cloned()
                .collect();
            (!list.is_empty()).then(|| (e.name.clone(), list))
        })
        .collect();
    found.sort_by(|a, b| (b.1.len(), &b.0).cmp(&(a.1.len(), &a.0)));
    found
}
