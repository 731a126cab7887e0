//! # summary 命令实现
//!
//! 读取 `parse` 保存的档案，以表格显示每个条目的能量差与电荷修正，可选导出 CSV。
//!
//! ## 依赖关系
//! - 使用 `cli/summary.rs` 定义的参数
//! - 使用 `models/entry.rs` 的 `DefectArchive`
//! - 使用 `utils/output.rs`, `utils/progress.rs`

use crate::cli::summary::SummaryArgs;
use crate::error::{DefectError, Result};
use crate::models::{DefectArchive, DefectEntry};
use crate::utils::{output, progress};

use std::path::Path;
use tabled::{Table, Tabled};

/// 表格行
#[derive(Debug, Clone, Tabled)]
struct SummaryRow {
    #[tabled(rename = "Defect")]
    name: String,
    #[tabled(rename = "q")]
    charge: String,
    #[tabled(rename = "ΔE (eV)")]
    energy_difference: String,
    #[tabled(rename = "Correction (eV)")]
    correction: String,
    #[tabled(rename = "Error (eV)")]
    error: String,
    #[tabled(rename = "Scheme")]
    scheme: String,
}

impl SummaryRow {
    fn from_entry(entry: &DefectEntry) -> Self {
        let correction = entry.charge_correction();
        SummaryRow {
            name: entry.name.clone(),
            charge: format!("{:+}", entry.charge_state),
            energy_difference: format!("{:.4}", entry.energy_difference()),
            correction: format!("{:.4}", entry.total_correction()),
            error: correction
                .map(|c| format!("{:.4}", c.estimated_error))
                .unwrap_or_else(|| "-".to_string()),
            scheme: correction
                .map(|c| c.scheme.label().to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// 执行 summary 命令
pub fn execute(args: SummaryArgs) -> Result<()> {
    output::print_header("Defect Archive Summary");

    if !args.archive.is_file() {
        return Err(DefectError::FileNotFound {
            kind: "archive".to_string(),
            dir: args.archive.display().to_string(),
        });
    }

    let spinner = progress::create_spinner(&format!("Loading '{}'", args.archive.display()));
    let archive = DefectArchive::load(&args.archive);
    spinner.finish_and_clear();
    let archive = archive?;

    if archive.is_empty() {
        output::print_warning("The archive contains no defect entries.");
        return Ok(());
    }

    let rows: Vec<SummaryRow> = archive.entries.values().map(SummaryRow::from_entry).collect();
    println!("{}", Table::new(&rows));
    output::print_info(&format!("{} defect entries", archive.len()));

    if let Some(path) = &args.csv {
        save_summary_csv(&archive, path)?;
        output::print_success(&format!("Summary saved to '{}'", path.display()));
    }

    Ok(())
}

/// 保存为 CSV，数值保留完整精度
fn save_summary_csv(archive: &DefectArchive, output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;

    wtr.write_record([
        "name",
        "charge_state",
        "energy_difference_eV",
        "total_correction_eV",
        "estimated_error_eV",
        "scheme",
        "folder",
    ])?;

    for entry in archive.entries.values() {
        let correction = entry.charge_correction();
        wtr.write_record([
            entry.name.clone(),
            entry.charge_state.to_string(),
            format!("{:.10}", entry.energy_difference()),
            format!("{:.10}", entry.total_correction()),
            correction
                .map(|c| format!("{:.10}", c.estimated_error))
                .unwrap_or_default(),
            correction
                .map(|c| c.scheme.key().to_string())
                .unwrap_or_default(),
            entry.metadata.folder.clone(),
        ])?;
    }

    wtr.flush().map_err(|e| DefectError::FileWriteError {
        path: output_path.display().to_string(),
        source: e,
    })?;

    Ok(())
}
