//! # 缺陷条目数据模型
//!
//! `DefectEntry` 是每个计算目录解析后的聚合记录：缺陷、电荷态、超胞能量、
//! 体相参考能量、修正能量及其诊断信息、计算元数据。
//!
//! ## 功能
//! - 修正后能量与相对体相的能量差
//! - 有限尺寸修正键的检查（每个条目至多一个）
//! - 档案文件 (JSON，`.gz` 结尾时 gzip 压缩) 的保存与加载
//!
//! ## 依赖关系
//! - 被 `analysis/`、`corrections/`、`commands/` 使用
//! - 使用 `serde_json` 和 `flate2`

use super::defect::{format_charge, Defect};
use super::dielectric::Dielectric;
use super::structure::Crystal;
use crate::error::{DefectError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// 识别有限尺寸修正键的子串
const FINITE_SIZE_KEY_MARKERS: [&str; 5] = ["FNV", "freysoldt", "Freysoldt", "Kumagai", "kumagai"];

// ─────────────────────────────────────────────────────────────
// 电荷修正结果
// ─────────────────────────────────────────────────────────────

/// 电荷修正方案
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CorrectionScheme {
    /// 原子位点电势方案 (eFNV)
    Kumagai,
    /// 平面平均电势方案 (FNV)
    Freysoldt,
}

impl CorrectionScheme {
    /// 在 `DefectEntry::corrections` 中使用的键
    pub fn key(&self) -> &'static str {
        match self {
            CorrectionScheme::Kumagai => "kumagai_charge_correction",
            CorrectionScheme::Freysoldt => "freysoldt_charge_correction",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CorrectionScheme::Kumagai => "eFNV (Kumagai)",
            CorrectionScheme::Freysoldt => "FNV (Freysoldt)",
        }
    }
}

/// 单个原子位点的电势采样点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitePotential {
    pub element: String,
    /// 到缺陷的距离 (Å)
    pub distance: f64,
    /// 缺陷超胞与体相的电势差 Δφ (V)
    pub potential_difference: f64,
    /// 点电荷模型电势 (V)
    pub model_potential: f64,
    /// 是否位于采样区域内
    pub sampled: bool,
}

/// 单个方向的平面平均电势数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanarAxis {
    pub axis: usize,
    /// 平面坐标 (Å)，缺陷位于原点
    pub positions: Vec<f64>,
    /// 缺陷 - 体相的平面平均电势差 (V)
    pub potential_difference: Vec<f64>,
    /// 模型长程电势 (V)
    pub model_potential: Vec<f64>,
    /// 采样窗口 [start, end) 的格点索引
    pub sampling_window: (usize, usize),
    /// 该方向的电势对齐能量 (eV)
    pub alignment: f64,
}

/// 修正方案特有的诊断数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CorrectionDiagnostics {
    SitePotential {
        /// 点电荷能量 E_PC (eV)
        point_charge_energy: f64,
        /// 电势对齐能量 (eV)
        alignment_energy: f64,
        /// 缺陷区域半径 (Å)
        sampling_radius: f64,
        /// Madelung 电势 (V/e)
        madelung_potential: f64,
        sites: Vec<SitePotential>,
    },
    PlanarPotential {
        /// E_iso - E_per (eV)
        lattice_energy: f64,
        /// 实际使用的标量介电常数
        dielectric: f64,
        axes: Vec<PlanarAxis>,
    },
}

/// 电荷修正结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionResult {
    pub scheme: CorrectionScheme,
    /// 修正能量 (eV)
    pub correction_energy: f64,
    /// 修正误差估计 (eV)
    pub estimated_error: f64,
    pub diagnostics: CorrectionDiagnostics,
}

// ─────────────────────────────────────────────────────────────
// 计算元数据
// ─────────────────────────────────────────────────────────────

/// 电荷态的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeSource {
    /// 用户显式指定
    Config,
    /// 由 OUTCAR 中 NELECT 与 ZVAL 计算
    Outcar,
    /// 由目录名后缀推断
    FolderName,
}

/// 缺陷计算与体相计算之间的参数不一致
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterMismatch {
    Incar {
        tag: String,
        defect: String,
        bulk: String,
    },
    Kpoints {
        defect: String,
        bulk: String,
    },
    Potcar {
        element: String,
        defect: String,
        bulk: String,
    },
}

impl std::fmt::Display for ParameterMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterMismatch::Incar { tag, defect, bulk } => {
                write!(f, "{}: {} vs {} (bulk)", tag, defect, bulk)
            }
            ParameterMismatch::Kpoints { defect, bulk } => {
                write!(f, "KPOINTS: {} vs {} (bulk)", defect, bulk)
            }
            ParameterMismatch::Potcar {
                element,
                defect,
                bulk,
            } => write!(f, "POTCAR {}: {} vs {} (bulk)", element, defect, bulk),
        }
    }
}

/// 体相能带边 (eV)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandEdges {
    pub vbm: f64,
    pub cbm: f64,
    pub band_gap: f64,
}

/// 计算来源与缺陷定位信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationMetadata {
    /// 缺陷计算目录
    pub defect_path: String,
    /// 体相计算目录
    pub bulk_path: String,
    /// 缺陷计算所在的文件夹名（用于去重排序）
    pub folder: String,
    pub charge_source: ChargeSource,
    pub dielectric: Option<Dielectric>,
    /// 超胞中弛豫后的缺陷位点（空位为体相位点）
    pub defect_site: [f64; 3],
    /// 体相参考位点（间隙为 Voronoi 节点或弛豫位置）
    pub bulk_site: [f64; 3],
    /// 缺陷超胞中的位点索引（空位为 None）
    pub defect_site_index: Option<usize>,
    /// 体相超胞中的位点索引（间隙为 None）
    pub bulk_site_index: Option<usize>,
    /// 未弛豫位点的 Schoenflies 点群
    pub bulk_site_symmetry: String,
    /// 未弛豫位点到最近邻原子的距离 (Å)
    pub nearest_neighbour_distance: Option<f64>,
    /// 完整的未弛豫名称，如 v_O_Oh_+2
    pub full_unrelaxed_defect_name: String,
    pub defect_volume: f64,
    pub bulk_volume: f64,
    pub parameter_mismatches: Vec<ParameterMismatch>,
    /// 猜测初始位点到弛豫位点的距离 (Å)，空位为 None
    #[serde(default)]
    pub guessed_defect_displacement: Option<f64>,
    /// 体相计算的 VBM / CBM / 带隙
    #[serde(default)]
    pub bulk_band_edges: Option<BandEdges>,
}

// ─────────────────────────────────────────────────────────────
// 缺陷条目
// ─────────────────────────────────────────────────────────────

/// 缺陷条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectEntry {
    pub name: String,
    pub defect: Defect,
    pub charge_state: i32,
    /// 缺陷超胞总能量 (eV)
    pub supercell_energy: f64,
    /// 体相超胞总能量 (eV)
    pub bulk_energy: f64,
    /// 能量修正项 (eV)
    pub corrections: BTreeMap<String, f64>,
    /// 修正项的诊断数据
    pub corrections_metadata: BTreeMap<String, CorrectionResult>,
    pub metadata: CalculationMetadata,
    /// 弛豫后的缺陷超胞
    pub defect_supercell: Crystal,
    /// 未弛豫超胞（间隙原子在弛豫位置）
    pub unrelaxed_supercell: Crystal,
    /// 猜测的初始超胞（间隙原子在 Voronoi 节点）
    pub guessed_initial_supercell: Crystal,
}

impl DefectEntry {
    /// 修正后的超胞能量
    pub fn corrected_energy(&self) -> f64 {
        self.supercell_energy + self.corrections.values().sum::<f64>()
    }

    /// 修正后能量与体相能量之差（未包含化学势与费米能级项）
    pub fn energy_difference(&self) -> f64 {
        self.corrected_energy() - self.bulk_energy
    }

    pub fn total_correction(&self) -> f64 {
        self.corrections.values().sum()
    }

    /// 带电荷后缀的缺陷名，如 v_O_+2
    pub fn base_name_with_charge(&self) -> String {
        format!("{}_{}", self.defect.name(), format_charge(self.charge_state))
    }

    /// 名称属于有限尺寸修正的键
    pub fn finite_size_correction_keys(&self) -> Vec<&str> {
        self.corrections
            .keys()
            .filter(|k| FINITE_SIZE_KEY_MARKERS.iter().any(|m| k.contains(m)))
            .map(String::as_str)
            .collect()
    }

    /// 已应用的电荷修正结果
    pub fn charge_correction(&self) -> Option<&CorrectionResult> {
        self.corrections_metadata.values().next()
    }

    /// 应用一个修正结果（替换同方案的旧值）
    pub fn apply_correction(&mut self, result: CorrectionResult) {
        let key = result.scheme.key().to_string();
        self.corrections.insert(key.clone(), result.correction_energy);
        self.corrections_metadata.insert(key, result);
    }
}

// ─────────────────────────────────────────────────────────────
// 档案
// ─────────────────────────────────────────────────────────────

/// 名称 -> 缺陷条目 的集合，可持久化为单个档案文件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefectArchive {
    pub entries: BTreeMap<String, DefectEntry>,
}

impl DefectArchive {
    pub fn new(entries: BTreeMap<String, DefectEntry>) -> Self {
        DefectArchive { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 保存为 JSON，文件名以 `.gz` 结尾时压缩
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| DefectError::FileWriteError {
            path: path.display().to_string(),
            source: e,
        })?;
        let writer = BufWriter::new(file);

        if is_gzip(path) {
            let mut encoder = GzEncoder::new(writer, Compression::default());
            serde_json::to_writer(&mut encoder, self)?;
            encoder
                .finish()
                .and_then(|mut w| w.flush())
                .map_err(|e| DefectError::FileWriteError {
                    path: path.display().to_string(),
                    source: e,
                })?;
        } else {
            let mut writer = writer;
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush().map_err(|e| DefectError::FileWriteError {
                path: path.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// 从档案文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| DefectError::FileReadError {
            path: path.display().to_string(),
            source: e,
        })?;
        let reader = BufReader::new(file);

        let mut content = String::new();
        let read = if is_gzip(path) {
            GzDecoder::new(reader).read_to_string(&mut content)
        } else {
            let mut reader = reader;
            reader.read_to_string(&mut content)
        };
        read.map_err(|e| DefectError::FileReadError {
            path: path.display().to_string(),
            source: e,
        })?;

        Ok(serde_json::from_str(&content)?)
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}


#[cfg(test)]
mod tests {
    use super::fixtures::{sample_entry, with_correction};
    use super::*;

    #[test]
    fn test_corrected_energy() {
        let entry = with_correction(sample_entry(1, -15.5), 0.25);
        assert!((entry.corrected_energy() - (-15.25)).abs() < 1e-12);
        assert!((entry.energy_difference() - 4.75).abs() < 1e-12);
        assert_eq!(entry.base_name_with_charge(), "v_O_+1");
    }

    #[test]
    fn test_finite_size_keys() {
        let mut entry = with_correction(sample_entry(1, -15.5), 0.25);
        assert_eq!(entry.finite_size_correction_keys().len(), 1);
        entry
            .corrections
            .insert("kumagai_charge_correction".to_string(), 0.2);
        entry
            .corrections
            .insert("bandfilling_correction".to_string(), 0.0);
        assert_eq!(entry.finite_size_correction_keys().len(), 2);
    }

    #[test]
    fn test_archive_roundtrip_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MgO_defect_dict.json.gz");

        let mut entries = BTreeMap::new();
        let entry = with_correction(sample_entry(1, -15.5), 0.3141592653589793);
        entries.insert(entry.name.clone(), entry);
        let archive = DefectArchive::new(entries);

        archive.save(&path).unwrap();
        let loaded = DefectArchive::load(&path).unwrap();
        assert_eq!(loaded, archive);
    }

    #[test]
    fn test_archive_roundtrip_plain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("defects.json");

        let mut entries = BTreeMap::new();
        let entry = sample_entry(-2, -18.25);
        entries.insert(entry.name.clone(), entry);
        let archive = DefectArchive::new(entries);

        archive.save(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"v_O_-2\""));
        assert_eq!(DefectArchive::load(&path).unwrap(), archive);
    }
}
