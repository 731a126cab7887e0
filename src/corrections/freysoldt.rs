//! # 平面平均电势修正 (FNV)
//!
//! Freysoldt-Neugebauer-Van de Walle 方案。模型电荷为宽度 1 bohr 的 Gaussian：
//!
//! ```text
//! ρ(g)  = exp(-g²β²/4)
//! E_iso = k_e q² / (π ε) ∫₀^gcut ρ(g)² dg
//! E_per = k_e q² / ε · [ (2π/V) Σ_{G≠0} ρ(G)²/G² + (4π/V)(-β²/4) ]
//! E_lat = E_iso - E_per
//! ```
//!
//! 每个方向上，平面平均电势差 (缺陷 - 体相) 减去模型长程电势后，在离缺陷最远处
//! 1 Å 宽的窗口内取平均得到对齐常数 C，对齐能量为 -q·C。
//! 只适用于各向同性的介电常数。
//!
//! ## 依赖关系
//! - 被 `corrections/mod.rs` 的状态机调用
//! - 使用 `corrections/special.rs` 中的 erf

use super::special::erf;
use super::{mean, sample_variance, CorrectionSettings, PlanarPotentialData, COULOMB_CONSTANT};
use crate::error::{DefectError, Result};
use crate::models::{
    CorrectionDiagnostics, CorrectionResult, CorrectionScheme, Dielectric, Lattice, PlanarAxis,
};
use nalgebra::Vector3;
use std::f64::consts::PI;

/// Gaussian 模型电荷宽度：1 bohr (Å)
const GAUSSIAN_WIDTH: f64 = 0.529177;

/// ħ²/2mₑ (eV·Å²)，用于能量截断与波矢截断的换算
const HBAR2_OVER_2M: f64 = 3.80998;

/// 对齐窗口的半宽 (Å)
const WINDOW_HALF_WIDTH: f64 = 0.5;

fn failure(reason: impl Into<String>) -> DefectError {
    DefectError::CorrectionFailed {
        scheme: CorrectionScheme::Freysoldt.label().to_string(),
        reason: reason.into(),
    }
}

fn rho_squared(g: f64) -> f64 {
    (-g * g * GAUSSIAN_WIDTH * GAUSSIAN_WIDTH / 2.0).exp()
}

/// 计算 FNV 修正；`dielectric` 必须已是各向同性
pub fn freysoldt_correction(
    data: &PlanarPotentialData<'_>,
    charge: i32,
    dielectric: &Dielectric,
    settings: &CorrectionSettings,
) -> Result<CorrectionResult> {
    let epsilon = dielectric
        .isotropic_value()
        .ok_or_else(|| failure("an isotropic dielectric constant is required"))?;
    for axis in 0..3 {
        let (b, d) = (data.bulk[axis].len(), data.defect[axis].len());
        if b != d {
            return Err(failure(format!(
                "bulk and defect LOCPOT grids differ along axis {} ({} vs {} points)",
                axis, b, d
            )));
        }
        if b < 2 {
            return Err(failure(format!("LOCPOT grid along axis {} is empty", axis)));
        }
    }

    let q = charge as f64;
    let lattice_energy = lattice_energy(&data.lattice, q, epsilon, settings.energy_cutoff);

    let mut axes = Vec::with_capacity(3);
    let mut errors = Vec::with_capacity(3);
    for axis in 0..3 {
        let (planar, error) = align_axis(data, axis, q, epsilon);
        axes.push(planar);
        errors.push(error);
    }

    let alignments: Vec<f64> = axes.iter().map(|a| a.alignment).collect();
    Ok(CorrectionResult {
        scheme: CorrectionScheme::Freysoldt,
        correction_energy: lattice_energy + mean(&alignments),
        estimated_error: mean(&errors) * q.abs(),
        diagnostics: CorrectionDiagnostics::PlanarPotential {
            lattice_energy,
            dielectric: epsilon,
            axes,
        },
    })
}

/// Gaussian 电荷阵列的静电能修正 E_iso - E_per (eV)
pub fn lattice_energy(lattice: &Lattice, q: f64, epsilon: f64, energy_cutoff: f64) -> f64 {
    let g_cut = (energy_cutoff / HBAR2_OVER_2M).sqrt();
    let volume = lattice.volume().abs();

    // ∫₀^gcut exp(-g²β²/2) dg
    let integral = (PI / 2.0).sqrt() / GAUSSIAN_WIDTH * erf(GAUSSIAN_WIDTH * g_cut / 2f64.sqrt());
    let e_iso = COULOMB_CONSTANT * q * q / (PI * epsilon) * integral;

    let reciprocal = lattice.reciprocal();
    let m_max = lattice.lengths().map(|a| (g_cut * a / (2.0 * PI)).ceil() as i32);
    let mut sum = 0.0;
    for i in -m_max[0]..=m_max[0] {
        for j in -m_max[1]..=m_max[1] {
            for k in -m_max[2]..=m_max[2] {
                if i == 0 && j == 0 && k == 0 {
                    continue;
                }
                let g = reciprocal.transpose() * Vector3::new(i as f64, j as f64, k as f64);
                let g2 = g.norm_squared();
                if g2 <= g_cut * g_cut {
                    sum += rho_squared(g.norm()) / g2;
                }
            }
        }
    }
    let limit0 = -GAUSSIAN_WIDTH * GAUSSIAN_WIDTH / 4.0;
    let e_per = COULOMB_CONSTANT * q * q / epsilon
        * (2.0 * PI / volume * sum + 4.0 * PI / volume * limit0);

    e_iso - e_per
}

/// 模型电荷沿某一方向的平面平均长程电势 (V)，缺陷位于第 0 个格点
pub fn model_potential(lattice: &Lattice, axis: usize, n: usize, q: f64, epsilon: f64) -> Vec<f64> {
    let length = lattice.lengths()[axis];
    let volume = lattice.volume().abs();
    let g_unit = 2.0 * PI / length;

    let mut coefficients = vec![0.0; n];
    coefficients[0] =
        4.0 * PI * COULOMB_CONSTANT * q * (-GAUSSIAN_WIDTH * GAUSSIAN_WIDTH / 4.0) / epsilon;
    for (m, c) in coefficients.iter_mut().enumerate().skip(1) {
        let index = if 2 * m < n { m as f64 } else { m as f64 - n as f64 };
        let g = index * g_unit;
        *c = 4.0 * PI * COULOMB_CONSTANT * q * rho_squared(g).sqrt() / (epsilon * g * g);
    }
    if n % 2 == 0 {
        coefficients[n / 2] = 0.0;
    }

    (0..n)
        .map(|j| {
            coefficients
                .iter()
                .enumerate()
                .map(|(m, c)| c * (2.0 * PI * (m * j) as f64 / n as f64).cos())
                .sum::<f64>()
                / volume
        })
        .collect()
}

/// 将缺陷所在平面移到第 0 个格点
fn roll_to_defect(values: &[f64], length: f64, frac: f64) -> Vec<f64> {
    let n = values.len();
    let position = frac.rem_euclid(1.0) * length;
    if position == 0.0 {
        return values.to_vec();
    }
    let step = length / n as f64;
    let shift = (0..n)
        .find(|&i| i as f64 * step > position)
        .unwrap_or(n - 1);
    let mut rolled = values.to_vec();
    rolled.rotate_left(shift);
    rolled
}

/// 单个方向的电势对齐，返回 (诊断数据, 窗口内标准差)
fn align_axis(data: &PlanarPotentialData<'_>, axis: usize, q: f64, epsilon: f64) -> (PlanarAxis, f64) {
    let n = data.bulk[axis].len();
    let length = data.lattice.lengths()[axis];
    let step = length / n as f64;

    let difference: Vec<f64> = data.defect[axis]
        .iter()
        .zip(&data.bulk[axis])
        .map(|(d, b)| d - b)
        .collect();
    let difference = roll_to_defect(&difference, length, data.defect_position[axis]);
    let model = model_potential(&data.lattice, axis, n, q, epsilon);

    let check = (WINDOW_HALF_WIDTH / step) as usize;
    let mid = n / 2;
    let start = mid.saturating_sub(check);
    let end = (mid + check + 1).min(n);

    let short_range: Vec<f64> = (start..end).map(|j| difference[j] - model[j]).collect();
    let offset = mean(&short_range);
    let spread = sample_variance(&short_range).sqrt();

    let planar = PlanarAxis {
        axis,
        positions: (0..n).map(|j| j as f64 * step).collect(),
        potential_difference: difference,
        model_potential: model,
        sampling_window: (start, end),
        alignment: -q * offset,
    };
    (planar, spread)
}
