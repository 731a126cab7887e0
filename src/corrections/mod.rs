//! # 有限尺寸电荷修正
//!
//! 带电缺陷在周期性超胞中的静电修正：原子位点电势方案 (eFNV, Kumagai) 与
//! 平面平均电势方案 (FNV, Freysoldt)，以及在两者之间选择的状态机。
//!
//! ## 功能
//! - `CorrectionEngine`：SitePotential -> PlanarPotential -> Applied | Skipped
//! - 各向异性介电张量在平面方案中退化为调和平均值
//! - 修正后的检查：误差超限、可疑的负修正、重复的有限尺寸修正键
//!
//! ## 依赖关系
//! - 被 `analysis/defect_parser.rs` 使用
//! - 子模块: ewald, freysoldt, kumagai, special

pub mod ewald;
pub mod freysoldt;
pub mod kumagai;
pub mod special;

use crate::error::Result;
use crate::models::{CorrectionResult, CorrectionScheme, Crystal, DefectEntry, Dielectric, Lattice};
use std::fmt;

pub use freysoldt::freysoldt_correction;
pub use kumagai::kumagai_correction;

/// 库仑常数 e²/(4πε₀) (eV·Å)
pub const COULOMB_CONSTANT: f64 = 14.399645;

/// 默认的修正误差容差 (eV)
pub const DEFAULT_ERROR_TOLERANCE: f64 = 0.05;

/// 平面方案默认的倒空间能量截断 (eV)
pub const DEFAULT_ENERGY_CUTOFF: f64 = 520.0;

/// 低于该值的修正总和对近各向同性介质可疑 (eV)
const NEGATIVE_CORRECTION_THRESHOLD: f64 = -0.08;

// ─────────────────────────────────────────────────────────────
// 输入
// ─────────────────────────────────────────────────────────────

/// 原子位点电势方案的输入
#[derive(Debug, Clone, Copy)]
pub struct SitePotentialData<'a> {
    pub bulk: &'a Crystal,
    pub defect: &'a Crystal,
    /// 体相各原子的静电势 (V)
    pub bulk_potentials: &'a [f64],
    /// 缺陷超胞各原子的静电势 (V)
    pub defect_potentials: &'a [f64],
    /// 缺陷原子索引 -> 体相原子索引
    pub mapping: &'a [Option<usize>],
    /// 缺陷位置（缺陷超胞分数坐标）
    pub defect_position: [f64; 3],
}

/// 平面平均电势方案的输入
#[derive(Debug, Clone)]
pub struct PlanarPotentialData<'a> {
    pub lattice: Lattice,
    /// 体相三个方向的平面平均静电势 (V)
    pub bulk: &'a [Vec<f64>; 3],
    /// 缺陷超胞三个方向的平面平均静电势 (V)
    pub defect: [Vec<f64>; 3],
    /// 缺陷位置（分数坐标）
    pub defect_position: [f64; 3],
}

/// 修正参数
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionSettings {
    /// 缺陷区域半径 (Å)；None 时取最大晶面间距的一半
    pub sampling_radius: Option<f64>,
    /// 不参与采样的缺陷超胞原子索引
    pub excluded_indices: Vec<usize>,
    /// 平面方案的能量截断 (eV)
    pub energy_cutoff: f64,
    /// 修正误差容差 (eV)
    pub error_tolerance: f64,
}

impl Default for CorrectionSettings {
    fn default() -> Self {
        CorrectionSettings {
            sampling_radius: None,
            excluded_indices: Vec::new(),
            energy_cutoff: DEFAULT_ENERGY_CUTOFF,
            error_tolerance: DEFAULT_ERROR_TOLERANCE,
        }
    }
}

// ─────────────────────────────────────────────────────────────
// 提示信息
// ─────────────────────────────────────────────────────────────

/// 修正过程中产生的非致命提示
#[derive(Debug, Clone, PartialEq)]
pub enum CorrectionWarning {
    /// 缺少两种方案所需的电势文件
    NoCorrectionPossible { charge: i32 },
    /// 某一方案失败
    SchemeFailed {
        scheme: CorrectionScheme,
        reason: String,
    },
    /// 各向异性介电张量被折算为调和平均值
    AnisotropicCollapsed { harmonic_mean: f64 },
    /// 修正误差超过容差
    ErrorAboveTolerance {
        scheme: CorrectionScheme,
        name: String,
        error: f64,
        tolerance: f64,
    },
    /// 近各向同性介质中出现可疑的负修正
    NegativeCorrection { name: String, total: f64 },
    /// 多个有限尺寸修正键
    MultipleFiniteSize { name: String, keys: Vec<String> },
}

impl fmt::Display for CorrectionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrectionWarning::NoCorrectionPossible { charge } => write!(
                f,
                "Charge state {} requires a finite-size charge correction, but neither site \
                 potentials (OUTCAR) nor planar-averaged potentials (LOCPOT) are available for \
                 both the defect and bulk calculations. Charge corrections will not be applied.",
                charge
            ),
            CorrectionWarning::SchemeFailed { scheme, reason } => write!(
                f,
                "The {} charge correction failed: {}",
                scheme.label(),
                reason
            ),
            CorrectionWarning::AnisotropicCollapsed { harmonic_mean } => write!(
                f,
                "The dielectric tensor is anisotropic but only planar-averaged potentials \
                 (LOCPOT) are available. The FNV correction is only valid for isotropic \
                 dielectrics, so the harmonic mean of the diagonal ({:.3}) is used as the \
                 effective dielectric constant. Provide site potentials (OUTCAR) for the eFNV \
                 correction instead.",
                harmonic_mean
            ),
            CorrectionWarning::ErrorAboveTolerance {
                scheme,
                name,
                error,
                tolerance,
            } => write!(
                f,
                "Estimated error in the {} charge correction for defect {} is {} eV, greater \
                 than the error tolerance of {} eV. Large errors often indicate shallow or \
                 unstable charge states, or a supercell that is too small.",
                scheme.label(),
                name,
                format_error(*error, *tolerance),
                format_error(*tolerance, *tolerance)
            ),
            CorrectionWarning::NegativeCorrection { name, total } => write!(
                f,
                "The finite-size charge corrections for defect {} sum to a negative value of \
                 {:.3} eV. For relatively isotropic dielectrics this is usually unphysical and \
                 can indicate delocalised charge or a mismatch between the defect and bulk \
                 calculations.",
                name, total
            ),
            CorrectionWarning::MultipleFiniteSize { name, keys } => write!(
                f,
                "Defect {} has multiple finite-size charge corrections ({}). Only one should \
                 be applied.",
                name,
                keys.join(", ")
            ),
        }
    }
}

/// 误差值的格式：容差 ≥ 0.01 eV 时保留三位小数，否则用科学计数法
pub fn format_error(value: f64, tolerance: f64) -> String {
    if tolerance >= 0.01 {
        format!("{:.3}", value)
    } else {
        format!("{:.2e}", value)
    }
}

// ─────────────────────────────────────────────────────────────
// 状态机
// ─────────────────────────────────────────────────────────────

/// 修正方案选择的状态
#[derive(Debug, Clone, PartialEq)]
enum CorrectionState {
    SitePotential,
    PlanarPotential,
    Applied(CorrectionResult),
    Skipped,
}

/// 状态机的最终结果
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionOutcome {
    /// 成功的修正（跳过时为 None）
    pub result: Option<CorrectionResult>,
    /// 应写回条目的介电张量（仅在调和平均路径成功时变化）
    pub effective_dielectric: Option<Dielectric>,
    pub warnings: Vec<CorrectionWarning>,
}

/// 电荷修正引擎
#[derive(Debug, Clone)]
pub struct CorrectionEngine<'s> {
    charge: i32,
    dielectric: Dielectric,
    settings: &'s CorrectionSettings,
}

impl<'s> CorrectionEngine<'s> {
    pub fn new(charge: i32, dielectric: Dielectric, settings: &'s CorrectionSettings) -> Self {
        CorrectionEngine {
            charge,
            dielectric,
            settings,
        }
    }

    /// 依次尝试原子位点方案与平面方案
    ///
    /// `planar` 只在需要时调用，返回 None 表示缺少平面电势文件。
    pub fn run<'a, F>(&self, site: Option<SitePotentialData<'a>>, planar: F) -> CorrectionOutcome
    where
        F: FnOnce() -> Option<Result<PlanarPotentialData<'a>>>,
    {
        let mut warnings = Vec::new();
        let mut effective_dielectric = None;

        if self.charge == 0 {
            return CorrectionOutcome {
                result: None,
                effective_dielectric,
                warnings,
            };
        }

        let mut planar = Some(planar);
        let mut planar_available = false;
        let mut state = CorrectionState::SitePotential;

        loop {
            state = match state {
                CorrectionState::SitePotential => match &site {
                    Some(data) => match kumagai_correction(
                        data,
                        self.charge,
                        &self.dielectric,
                        self.settings,
                    ) {
                        Ok(result) => CorrectionState::Applied(result),
                        Err(e) => {
                            warnings.push(CorrectionWarning::SchemeFailed {
                                scheme: CorrectionScheme::Kumagai,
                                reason: e.to_string(),
                            });
                            CorrectionState::PlanarPotential
                        }
                    },
                    None => CorrectionState::PlanarPotential,
                },
                CorrectionState::PlanarPotential => {
                    let loaded = planar.take().and_then(|load| load());
                    match loaded {
                        None => CorrectionState::Skipped,
                        Some(Err(e)) => {
                            planar_available = true;
                            warnings.push(CorrectionWarning::SchemeFailed {
                                scheme: CorrectionScheme::Freysoldt,
                                reason: e.to_string(),
                            });
                            CorrectionState::Skipped
                        }
                        Some(Ok(data)) => {
                            planar_available = true;
                            let scalar = if self.dielectric.is_isotropic() {
                                self.dielectric
                            } else {
                                let harmonic_mean = self.dielectric.harmonic_mean();
                                warnings
                                    .push(CorrectionWarning::AnisotropicCollapsed { harmonic_mean });
                                Dielectric::scalar(harmonic_mean)
                            };
                            match freysoldt_correction(&data, self.charge, &scalar, self.settings) {
                                Ok(result) => {
                                    if scalar != self.dielectric {
                                        effective_dielectric = Some(scalar);
                                    }
                                    CorrectionState::Applied(result)
                                }
                                Err(e) => {
                                    warnings.push(CorrectionWarning::SchemeFailed {
                                        scheme: CorrectionScheme::Freysoldt,
                                        reason: e.to_string(),
                                    });
                                    CorrectionState::Skipped
                                }
                            }
                        }
                    }
                }
                CorrectionState::Applied(result) => {
                    return CorrectionOutcome {
                        result: Some(result),
                        effective_dielectric,
                        warnings,
                    };
                }
                CorrectionState::Skipped => {
                    if site.is_none() && !planar_available {
                        warnings.push(CorrectionWarning::NoCorrectionPossible {
                            charge: self.charge,
                        });
                    }
                    return CorrectionOutcome {
                        result: None,
                        effective_dielectric: None,
                        warnings,
                    };
                }
            };
        }
    }
}

// ─────────────────────────────────────────────────────────────
// 修正后的检查
// ─────────────────────────────────────────────────────────────

/// 修正误差超过容差时给出提示
pub fn error_above_tolerance(entry: &DefectEntry, tolerance: f64) -> Option<CorrectionWarning> {
    let result = entry.charge_correction()?;
    (result.estimated_error > tolerance).then(|| CorrectionWarning::ErrorAboveTolerance {
        scheme: result.scheme,
        name: entry.name.clone(),
        error: result.estimated_error,
        tolerance,
    })
}

/// 对已应用修正的条目做一致性检查：可疑的负修正与重复的有限尺寸修正
pub fn check_entry(entry: &DefectEntry) -> Vec<CorrectionWarning> {
    let mut warnings = Vec::new();

    let summed: f64 = entry
        .corrections
        .iter()
        .filter(|(key, _)| {
            let key = key.to_lowercase();
            ["freysoldt", "kumagai", "fnv", "charge"]
                .iter()
                .any(|m| key.contains(m))
        })
        .map(|(_, v)| v)
        .sum();
    let near_isotropic = entry
        .metadata
        .dielectric
        .map(|d| d.is_near_isotropic())
        .unwrap_or(false);
    if summed < NEGATIVE_CORRECTION_THRESHOLD && near_isotropic {
        warnings.push(CorrectionWarning::NegativeCorrection {
            name: entry.name.clone(),
            total: summed,
        });
    }

    let keys = entry.finite_size_correction_keys();
    if keys.len() > 1 {
        warnings.push(CorrectionWarning::MultipleFiniteSize {
            name: entry.name.clone(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
        });
    }

    warnings
}

// ─────────────────────────────────────────────────────────────
// 统计工具
// ─────────────────────────────────────────────────────────────

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// 样本方差 (ddof = 1)；少于两个值时为 0
pub(crate) fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DefectError;
    use crate::models::{Atom, CorrectionDiagnostics};

    fn planar_stub<'a>(
        bulk: &'a [Vec<f64>; 3],
        defect: [Vec<f64>; 3],
    ) -> impl FnOnce() -> Option<Result<PlanarPotentialData<'a>>> {
        move || {
            Some(Ok(PlanarPotentialData {
                lattice: Lattice::cubic(10.0),
                bulk,
                defect,
                defect_position: [0.0, 0.0, 0.0],
            }))
        }
    }

    fn flat_planar() -> [Vec<f64>; 3] {
        [vec![0.0; 40], vec![0.0; 40], vec![0.0; 40]]
    }

    #[test]
    fn test_format_error() {
        assert_eq!(format_error(0.12, 0.05), "0.120");
        assert_eq!(format_error(0.0012, 0.001), "1.20e-3");
    }

    #[test]
    fn test_neutral_needs_no_correction() {
        let settings = CorrectionSettings::default();
        let engine = CorrectionEngine::new(0, Dielectric::scalar(10.0), &settings);
        let outcome = engine.run(None, || None);
        assert!(outcome.result.is_none());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_no_artifacts_skips_with_single_warning() {
        let settings = CorrectionSettings::default();
        let engine = CorrectionEngine::new(1, Dielectric::scalar(10.0), &settings);
        let outcome = engine.run(None, || None);
        assert!(outcome.result.is_none());
        assert_eq!(
            outcome.warnings,
            vec![CorrectionWarning::NoCorrectionPossible { charge: 1 }]
        );
    }

    #[test]
    fn test_planar_path_with_isotropic_dielectric() {
        let settings = CorrectionSettings::default();
        let bulk = flat_planar();
        let engine = CorrectionEngine::new(1, Dielectric::scalar(10.0), &settings);
        let outcome = engine.run(None, planar_stub(&bulk, flat_planar()));
        let result = outcome.result.unwrap();
        assert_eq!(result.scheme, CorrectionScheme::Freysoldt);
        assert!(outcome.effective_dielectric.is_none());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_anisotropic_planar_uses_harmonic_mean() {
        let settings = CorrectionSettings::default();
        let bulk = flat_planar();
        let dielectric = Dielectric::diagonal([5.0, 10.0, 20.0]);
        let engine = CorrectionEngine::new(-1, dielectric, &settings);
        let outcome = engine.run(None, planar_stub(&bulk, flat_planar()));

        let hm = 3.0 / (1.0 / 5.0 + 1.0 / 10.0 + 1.0 / 20.0);
        assert!(outcome.result.is_some());
        assert_eq!(outcome.effective_dielectric, Some(Dielectric::scalar(hm)));
        assert!(matches!(
            outcome.warnings.as_slice(),
            [CorrectionWarning::AnisotropicCollapsed { .. }]
        ));
        match outcome.result.unwrap().diagnostics {
            CorrectionDiagnostics::PlanarPotential { dielectric, .. } => {
                assert!((dielectric - hm).abs() < 1e-12)
            }
            other => panic!("unexpected diagnostics {:?}", other),
        }
    }

    #[test]
    fn test_failed_planar_keeps_stored_dielectric() {
        let settings = CorrectionSettings::default();
        let dielectric = Dielectric::diagonal([5.0, 10.0, 20.0]);
        let engine = CorrectionEngine::new(2, dielectric, &settings);
        let outcome = engine.run(None, || {
            Some(Err(DefectError::CorrectionFailed {
                scheme: "FNV".to_string(),
                reason: "grid mismatch".to_string(),
            }))
        });
        assert!(outcome.result.is_none());
        assert!(outcome.effective_dielectric.is_none());
        assert!(matches!(
            outcome.warnings.as_slice(),
            [CorrectionWarning::SchemeFailed {
                scheme: CorrectionScheme::Freysoldt,
                ..
            }]
        ));
    }

    #[test]
    fn test_site_failure_falls_back_to_planar() {
        let settings = CorrectionSettings::default();
        let crystal = Crystal::new(
            "Po",
            Lattice::cubic(10.0),
            vec![Atom::new("Po", [0.0, 0.0, 0.0])],
        );
        let site = SitePotentialData {
            bulk: &crystal,
            defect: &crystal,
            bulk_potentials: &[],
            defect_potentials: &[],
            mapping: &[Some(0)],
            defect_position: [0.5, 0.5, 0.5],
        };
        let bulk = flat_planar();
        let engine = CorrectionEngine::new(1, Dielectric::scalar(10.0), &settings);
        let outcome = engine.run(Some(site), planar_stub(&bulk, flat_planar()));
        assert_eq!(outcome.result.unwrap().scheme, CorrectionScheme::Freysoldt);
        assert!(matches!(
            outcome.warnings.as_slice(),
            [CorrectionWarning::SchemeFailed {
                scheme: CorrectionScheme::Kumagai,
                ..
            }]
        ));
    }

    #[test]
    fn test_sample_variance() {
        assert_eq!(sample_variance(&[1.0]), 0.0);
        assert!((sample_variance(&[1.0, 2.0, 3.0, 4.0]) - 5.0 / 3.0).abs() < 1e-12);
    }
}
