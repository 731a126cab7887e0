//! # parse 子命令 CLI 定义
//!
//! 解析根目录下的体相与缺陷计算，应用电荷修正并保存档案。
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/parse.rs`

use crate::corrections::DEFAULT_ERROR_TOLERANCE;
use crate::models::Dielectric;
use clap::Args;
use std::path::PathBuf;
use std::str::FromStr;

/// parse 子命令参数
#[derive(Args, Debug)]
pub struct ParseArgs {
    /// Directory containing the bulk and defect calculation folders
    pub root: PathBuf,

    /// Bulk calculation folder (default: the unique folder with 'bulk' in its name)
    #[arg(long)]
    pub bulk: Option<PathBuf>,

    /// Run subfolder inside each defect folder, e.g. vasp_std (default: majority vote)
    #[arg(long)]
    pub subfolder: Option<String>,

    /// Dielectric constant: a scalar, three diagonal values or nine tensor elements
    #[arg(long, value_parser = parse_dielectric, allow_hyphen_values = true)]
    pub dielectric: Option<Dielectric>,

    /// Warn when the estimated charge-correction error exceeds this value (eV)
    #[arg(long, default_value_t = DEFAULT_ERROR_TOLERANCE)]
    pub error_tolerance: f64,

    /// Radius of the defect region excluded from potential alignment (Å)
    #[arg(long)]
    pub sampling_radius: Option<f64>,

    /// Number of parallel workers (default: CPU count - 1)
    #[arg(long, env = "DEFECTKIT_PROCESSES")]
    pub processes: Option<usize>,

    /// Explicit charge state for a folder, e.g. --charge v_O=+2 (repeatable)
    #[arg(long = "charge", value_name = "FOLDER=Q", value_parser = parse_assignment::<i32>)]
    pub charges: Vec<(String, i32)>,

    /// Oxidation state override for an element, e.g. --oxi-state Mg=2 (repeatable)
    #[arg(long = "oxi-state", value_name = "EL=N", value_parser = parse_assignment::<i32>)]
    pub oxidation_states: Vec<(String, i32)>,

    /// Do not apply finite-size charge corrections
    #[arg(long, default_value_t = false)]
    pub skip_corrections: bool,

    /// Archive file (default: <ROOT>/<formula>_defect_dict.json.gz)
    #[arg(long, conflicts_with = "no_archive")]
    pub output: Option<PathBuf>,

    /// Do not write an archive
    #[arg(long, default_value_t = false)]
    pub no_archive: bool,

    /// Write the guessed unrelaxed structure of each entry as POSCAR to this directory
    #[arg(long)]
    pub export_structures: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(long, default_value_t = false)]
    pub no_progress: bool,
}

fn parse_dielectric(s: &str) -> Result<Dielectric, String> {
    Dielectric::from_str(s).map_err(|e| e.to_string())
}

/// 解析 `KEY=VALUE`
fn parse_assignment<T>(s: &str) -> Result<(String, T), String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing name before '=' in '{}'", s));
    }
    let value = value
        .trim()
        .parse::<T>()
        .map_err(|e| format!("invalid value in '{}': {}", s, e))?;
    Ok((key.to_string(), value))
}
