//! # parse 命令实现
//!
//! 解析根目录下的全部缺陷计算，输出汇总后的提示并保存档案。
//!
//! ## 功能
//! - 命令行参数到 `ParserConfig` 的转换
//! - 提示信息逐条输出，并显示体相带边
//! - 可选导出猜测的未弛豫结构（POSCAR）
//!
//! ## 依赖关系
//! - 使用 `cli/parse.rs` 定义的参数
//! - 使用 `analysis/defects_parser.rs`
//! - 使用 `utils/output.rs`

use crate::analysis::{ArchiveTarget, DefectsParser, ParserConfig};
use crate::cli::parse::ParseArgs;
use crate::error::{DefectError, Result};
use crate::models::DefectEntry;
use crate::parsers::poscar::write_poscar_file;
use crate::utils::output;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// 执行 parse 命令
pub fn execute(args: ParseArgs) -> Result<()> {
    output::print_header("Parsing Defect Calculations");

    if !args.root.is_dir() {
        return Err(DefectError::DirectoryNotFound {
            path: args.root.display().to_string(),
        });
    }

    let config = build_config(&args);
    if config.dielectric.is_none() && !config.skip_corrections {
        output::print_info(
            "No dielectric constant given; charged defects will not be corrected",
        );
    }
    output::print_info(&format!(
        "Scanning '{}' for defect calculations...",
        args.root.display()
    ));

    let batch = DefectsParser::new(&args.root, config).parse()?;

    output::print_info(&format!(
        "Bulk calculation: {} (run subfolder: {})",
        batch.bulk_path.display(),
        batch.subfolder
    ));
    match &batch.band_edges {
        Some(edges) => output::print_info(&format!(
            "Bulk VBM = {:.4} eV, CBM = {:.4} eV, band gap = {:.4} eV",
            edges.vbm, edges.cbm, edges.band_gap
        )),
        None => output::print_skip("No eigenvalues in the bulk OUTCAR; band edges unavailable"),
    }
    for warning in &batch.warnings {
        output::print_warning(warning);
    }

    output::print_separator();
    for (name, entry) in &batch.entries {
        println!(
            "  {:<28} q = {:>+3}  ΔE = {:>12.4} eV  correction = {:>8.4} eV",
            name,
            entry.charge_state,
            entry.energy_difference(),
            entry.total_correction()
        );
    }
    output::print_separator();
    output::print_success(&format!("Parsed {} defect entries", batch.entries.len()));

    if let Some(dir) = &args.export_structures {
        let written = export_structures(&batch.entries, dir)?;
        output::print_success(&format!(
            "Wrote {} guessed unrelaxed structures to '{}'",
            written,
            dir.display()
        ));
    }

    match &batch.archive_path {
        Some(path) => output::print_done(&format!("Defect archive saved to '{}'", path.display())),
        None => output::print_skip("Archive not written"),
    }

    Ok(())
}

/// 命令行参数 -> 解析配置
fn build_config(args: &ParseArgs) -> ParserConfig {
    let mut config = ParserConfig::new()
        .with_skip_corrections(args.skip_corrections)
        .with_error_tolerance(args.error_tolerance)
        .with_progress(!args.no_progress);

    if let Some(bulk) = &args.bulk {
        config = config.with_bulk_path(bulk);
    }
    if let Some(subfolder) = &args.subfolder {
        config = config.with_subfolder(subfolder);
    }
    if let Some(dielectric) = args.dielectric {
        config = config.with_dielectric(dielectric);
    }
    if let Some(radius) = args.sampling_radius {
        config = config.with_sampling_radius(radius);
    }
    if let Some(processes) = args.processes {
        config = config.with_processes(processes);
    }
    for (folder, charge) in &args.charges {
        config = config.with_charge(folder, *charge);
    }
    for (element, state) in &args.oxidation_states {
        config = config.with_oxidation_state(element, *state);
    }

    let archive = if args.no_archive {
        ArchiveTarget::Disabled
    } else if let Some(path) = &args.output {
        ArchiveTarget::Path(path.clone())
    } else {
        ArchiveTarget::Default
    };
    config.with_archive(archive)
}

/// 写出每个条目的猜测初始结构，文件名为 `{条目名}_POSCAR`
fn export_structures(entries: &BTreeMap<String, DefectEntry>, dir: &Path) -> Result<usize> {
    fs::create_dir_all(dir).map_err(|e| DefectError::FileWriteError {
        path: dir.display().to_string(),
        source: e,
    })?;
    for (name, entry) in entries {
        write_poscar_file(
            &entry.guessed_initial_supercell,
            &dir.join(format!("{}_POSCAR", name)),
        )?;
    }
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;

    fn parse_args(extra: &[&str]) -> ParseArgs {
        let mut argv = vec!["defectkit", "parse", "calcs"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Parse(args) => args,
            _ => panic!("expected the parse command"),
        }
    }

    #[test]
    fn test_build_config() {
        let args = parse_args(&[
            "--charge",
            "v_O=+2",
            "--oxi-state",
            "Mg=2",
            "--error-tolerance",
            "0.1",
            "--output",
            "out.json",
            "--no-progress",
        ]);
        let config = build_config(&args);
        assert_eq!(config.charges.get("v_O"), Some(&2));
        assert_eq!(config.oxidation_states.get("Mg"), Some(&2));
        assert_eq!(config.corrections.error_tolerance, 0.1);
        assert_eq!(config.archive, ArchiveTarget::Path("out.json".into()));
        assert!(!config.show_progress);
    }

    #[test]
    fn test_archive_target_from_flags() {
        assert_eq!(build_config(&parse_args(&[])).archive, ArchiveTarget::Default);
        assert_eq!(
            build_config(&parse_args(&["--no-archive"])).archive,
            ArchiveTarget::Disabled
        );
    }
}
