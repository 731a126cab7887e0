//! # 原子位点电势修正 (eFNV)
//!
//! Kumagai & Oba 的扩展 FNV 方案：点电荷在各向异性介质中的 Ewald 能量，
//! 加上远离缺陷的原子位点上 (Δφ - φ_PC) 的平均值给出的电势对齐项。
//! 对各向同性和各向异性介电张量都适用。
//!
//! ```text
//! E_corr = -q²/2 · φ_M  -  q · ⟨Δφ - q·φ_Ewald(r)⟩_{|r| > R}
//! ```
//!
//! ## 依赖关系
//! - 被 `corrections/mod.rs` 的状态机调用
//! - 使用 `corrections/ewald.rs`

use super::ewald::Ewald;
use super::{mean, sample_variance, CorrectionSettings, SitePotentialData};
use crate::error::{DefectError, Result};
use crate::models::{
    CorrectionDiagnostics, CorrectionResult, CorrectionScheme, Dielectric, SitePotential,
};

fn failure(reason: impl Into<String>) -> DefectError {
    DefectError::CorrectionFailed {
        scheme: CorrectionScheme::Kumagai.label().to_string(),
        reason: reason.into(),
    }
}

/// 计算 eFNV 修正
pub fn kumagai_correction(
    data: &SitePotentialData<'_>,
    charge: i32,
    dielectric: &Dielectric,
    settings: &CorrectionSettings,
) -> Result<CorrectionResult> {
    if data.defect_potentials.len() != data.defect.len() {
        return Err(failure(format!(
            "defect OUTCAR lists {} site potentials for {} atoms",
            data.defect_potentials.len(),
            data.defect.len()
        )));
    }
    if data.bulk_potentials.len() != data.bulk.len() {
        return Err(failure(format!(
            "bulk OUTCAR lists {} site potentials for {} atoms",
            data.bulk_potentials.len(),
            data.bulk.len()
        )));
    }
    if data.mapping.len() != data.defect.len() {
        return Err(failure("site mapping does not cover the defect supercell"));
    }

    let lattice = &data.defect.lattice;
    let ewald = Ewald::new(lattice, dielectric)?;
    let q = charge as f64;

    let madelung_potential = ewald.madelung_potential();
    let point_charge_energy = -q * q / 2.0 * madelung_potential;
    let sampling_radius = settings
        .sampling_radius
        .unwrap_or_else(|| lattice.max_sphere_radius());

    let mut sites = Vec::with_capacity(data.defect.len());
    for (i, atom) in data.defect.atoms.iter().enumerate() {
        let Some(j) = data.mapping[i] else {
            continue;
        };
        if settings.excluded_indices.contains(&i) {
            continue;
        }
        let bulk_potential = *data
            .bulk_potentials
            .get(j)
            .ok_or_else(|| failure(format!("bulk site index {} out of range", j)))?;

        let r = lattice.min_image_vector(&data.defect_position, &atom.position);
        let distance = r.norm();
        sites.push(SitePotential {
            element: atom.element.clone(),
            distance,
            potential_difference: data.defect_potentials[i] - bulk_potential,
            model_potential: q * ewald.potential(&r),
            sampled: distance > sampling_radius,
        });
    }

    let sampled: Vec<&SitePotential> = sites.iter().filter(|s| s.sampled).collect();
    if sampled.is_empty() {
        return Err(failure(format!(
            "no atomic sites lie outside the defect region (radius {:.2} Å)",
            sampling_radius
        )));
    }

    let shifted: Vec<f64> = sampled
        .iter()
        .map(|s| s.potential_difference - s.model_potential)
        .collect();
    let alignment_energy = -q * mean(&shifted);

    let differences: Vec<f64> = sampled.iter().map(|s| s.potential_difference).collect();
    let standard_error = (sample_variance(&differences) / differences.len() as f64).sqrt();

    Ok(CorrectionResult {
        scheme: CorrectionScheme::Kumagai,
        correction_energy: point_charge_energy + alignment_energy,
        estimated_error: standard_error * q.abs(),
        diagnostics: CorrectionDiagnostics::SitePotential {
            point_charge_energy,
            alignment_energy,
            sampling_radius,
            madelung_potential,
            sites,
        },
    })
}
