//! # VASP OUTCAR 解析器
//!
//! 解析 VASP 计算输出文件 OUTCAR，提取缺陷分析需要的全部信息。
//!
//! ## 功能
//! - 完成标志与最终能量 (energy(sigma->0))
//! - NELECT、ZVAL、每种元素的离子数（用于推断电荷态）
//! - POTCAR TITEL（用于检查赝势是否一致）
//! - 最后一个离子步的原子位点静电势（eFNV 修正需要）
//! - 最后一个离子步的本征值与占据数（体相 VBM / CBM / 带隙）
//!
//! ## 依赖关系
//! - 被 `analysis/defect_parser.rs`、`analysis/defects_parser.rs` 使用
//! - 使用 `regex` 解析紧密排列的位点电势

use super::{parse_error, read_text};
use crate::error::Result;
use crate::models::BandEdges;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

/// 占据数高于该值的能级视为占据
const OCCUPATION_TOL: f64 = 1e-8;

/// OUTCAR 中提取的数据
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutcarData {
    /// 计算是否正常结束
    pub is_finished: bool,
    /// 最终能量 energy(sigma->0) (eV)
    pub energy: Option<f64>,
    /// 最终体积 (Å³)
    pub volume: Option<f64>,
    /// 总电子数
    pub nelect: Option<f64>,
    /// 每种元素的价电子数
    pub zvals: Vec<f64>,
    /// 每种元素的离子数
    pub ions_per_type: Vec<usize>,
    /// POTCAR TITEL 行，如 "PAW_PBE Mg_pv 13Apr2007"
    pub potcar_titles: Vec<String>,
    /// 原子位点的电子势能（OUTCAR 原始符号，单位 eV）
    pub site_potentials: Option<Vec<f64>>,
    /// 最后一个离子步所有 k 点与自旋的 (本征值 eV, 占据数)
    pub eigenvalues: Vec<(f64, f64)>,
}

impl OutcarData {
    /// 超胞总电荷 Σ ZVAL·n - NELECT
    pub fn total_charge(&self) -> Option<f64> {
        let nelect = self.nelect?;
        if self.zvals.is_empty() || self.zvals.len() != self.ions_per_type.len() {
            return None;
        }
        let valence: f64 = self
            .zvals
            .iter()
            .zip(&self.ions_per_type)
            .map(|(z, n)| z * *n as f64)
            .sum();
        Some(valence - nelect)
    }

    /// 元素 -> POTCAR TITEL
    pub fn potcar_by_element(&self) -> BTreeMap<String, String> {
        self.potcar_titles
            .iter()
            .filter_map(|title| {
                let symbol = title.split_whitespace().nth(1)?;
                let element = symbol.split(|c: char| c == '_' || c == '.').next()?;
                Some((element.to_string(), title.clone()))
            })
            .collect()
    }

    /// 由占据数确定的带边：VBM 为最高占据能级，CBM 为最低未占据能级
    pub fn band_edges(&self) -> Option<BandEdges> {
        let vbm = self
            .eigenvalues
            .iter()
            .filter(|(_, occ)| *occ > OCCUPATION_TOL)
            .map(|(e, _)| *e)
            .max_by(f64::total_cmp)?;
        let cbm = self
            .eigenvalues
            .iter()
            .filter(|(_, occ)| *occ <= OCCUPATION_TOL)
            .map(|(e, _)| *e)
            .min_by(f64::total_cmp)?;
        Some(BandEdges {
            vbm,
            cbm,
            band_gap: (cbm - vbm).max(0.0),
        })
    }

    /// 原子位点静电势（已取反，单位 V）
    pub fn electrostatic_site_potentials(&self) -> Option<Vec<f64>> {
        self.site_potentials
            .as_ref()
            .map(|p| p.iter().map(|v| -v).collect())
    }
}

fn site_potential_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+)\s*(-?\d+\.\d+)").unwrap_or_else(|e| panic!("invalid regex: {e}"))
    })
}

/// 解析 VASP OUTCAR 文件（支持 .gz）
pub fn parse_outcar(path: &Path) -> Result<OutcarData> {
    let content = read_text(path)?;
    let data = parse_outcar_content(&content);

    if data.energy.is_none() {
        return Err(parse_error("OUTCAR", path, "No final energy found"));
    }
    Ok(data)
}

/// 从字符串内容解析 OUTCAR
pub fn parse_outcar_content(content: &str) -> OutcarData {
    let mut data = OutcarData::default();
    let mut free_energy: Option<f64> = None;

    let lines: Vec<&str> = content.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_start();

        // 检查是否完成
        if line.contains("General timing and accounting informations for this job") {
            data.is_finished = true;
        }

        // "energy  without entropy=     -123.456789  energy(sigma->0) =     -123.456789"
        if line.contains("energy  without entropy") {
            if let Some(pos) = line.find("energy(sigma->0)") {
                if let Some(val) = extract_number_after(&line[pos..], "=") {
                    data.energy = Some(val);
                }
            }
        }

        // "free  energy   TOTEN  =      -123.456789 eV"
        if line.contains("free  energy   TOTEN") {
            if let Some(val) = extract_number_before(line, "eV") {
                free_energy = Some(val);
            }
        }

        // "  volume of cell :      123.456789"
        if line.contains("volume of cell") {
            if let Some(val) = extract_last_number(line) {
                data.volume = Some(val);
            }
        }

        // "   NELECT =     432.0000    total number of electrons"
        if trimmed.starts_with("NELECT") {
            if let Some(val) = extract_number_after(line, "=") {
                data.nelect = Some(val);
            }
        }

        // "  ZVAL   =   8.00  6.00"（Ionic Valenz 块）
        if trimmed.starts_with("ZVAL") {
            if let Some(pos) = line.find('=') {
                data.zvals = parse_numbers(&line[pos + 1..]);
            }
        }

        // "   ions per type =              32  31"
        if line.contains("ions per type") {
            if let Some(pos) = line.find('=') {
                data.ions_per_type = parse_numbers(&line[pos + 1..])
                    .into_iter()
                    .map(|n| n as usize)
                    .collect();
            }
        }

        // "   TITEL  = PAW_PBE Mg_pv 13Apr2007"
        if trimmed.starts_with("TITEL") {
            if let Some(pos) = line.find('=') {
                data.potcar_titles.push(line[pos + 1..].trim().to_string());
            }
        }

        // 新的本征值输出从 E-fermi 行开始
        if line.contains("E-fermi") {
            data.eigenvalues.clear();
        }

        // "  band No.  band energies     occupation"
        if trimmed.starts_with("band No.") {
            let (levels, next) = parse_band_block(&lines, i + 1);
            data.eigenvalues.extend(levels);
            i = next;
            continue;
        }

        // 每个离子步都会输出一次，保留最后一次
        if line.contains("average (electrostatic) potential at core") {
            let (potentials, next) = parse_site_potential_block(&lines, i + 1);
            if !potentials.is_empty() {
                data.site_potentials = Some(potentials);
            }
            i = next;
            continue;
        }

        i += 1;
    }

    if data.energy.is_none() {
        data.energy = free_energy;
    }
    data
}

/// 解析位点电势块，返回 (按原子序排列的电势, 块结束后的行号)
///
/// ```text
///  average (electrostatic) potential at core
///   the test charge radii are     0.7215  0.7215
///   (the norm of the test charge is              1.0000)
///        1 -39.6418       2 -39.6418       3 -39.6418
/// ```
fn parse_site_potential_block(lines: &[&str], start: usize) -> (Vec<f64>, usize) {
    let re = site_potential_regex();
    let mut pairs: Vec<(usize, f64)> = Vec::new();
    let mut i = start;
    let mut in_data = false;

    while i < lines.len() {
        let line = lines[i];
        if line.contains("test charge") {
            i += 1;
            continue;
        }
        if line.trim().is_empty() {
            if in_data {
                break;
            }
            i += 1;
            continue;
        }

        let captures: Vec<(usize, f64)> = re
            .captures_iter(line)
            .filter_map(|c| Some((c[1].parse().ok()?, c[2].parse().ok()?)))
            .collect();
        if captures.is_empty() {
            break;
        }
        in_data = true;
        pairs.extend(captures);
        i += 1;
    }

    pairs.sort_by_key(|(idx, _)| *idx);
    (pairs.into_iter().map(|(_, v)| v).collect(), i)
}

/// 解析一个 k 点的能级表，每行为 "序号 能量 占据数"
fn parse_band_block(lines: &[&str], start: usize) -> (Vec<(f64, f64)>, usize) {
    let mut levels = Vec::new();
    let mut i = start;
    while i < lines.len() {
        match parse_numbers(lines[i]).as_slice() {
            [_, energy, occupation] => levels.push((*energy, *occupation)),
            _ => break,
        }
        i += 1;
    }
    (levels, i)
}

/// 从字符串中提取指定标记之前的数字
fn extract_number_before(s: &str, marker: &str) -> Option<f64> {
    let pos = s.find(marker)?;
    s[..pos].split_whitespace().last()?.parse().ok()
}

/// 从字符串中提取指定标记之后的数字
fn extract_number_after(s: &str, marker: &str) -> Option<f64> {
    let pos = s.find(marker)?;
    s[pos + marker.len()..].split_whitespace().next()?.parse().ok()
}

/// 提取字符串中最后一个数字
fn extract_last_number(s: &str) -> Option<f64> {
    s.split_whitespace()
        .filter_map(|w| w.parse::<f64>().ok())
        .last()
}

fn parse_numbers(s: &str) -> Vec<f64> {
    s.split_whitespace()
        .map_while(|w| w.parse::<f64>().ok())
        .collect()
}
