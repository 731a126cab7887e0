//! # 各向异性介质中的 Ewald 求和
//!
//! 点电荷阵列（带均匀补偿背景）在介电张量 ε 描述的连续介质中的静电势。
//! 单位：Å、e、V；库仑常数 k_e = 14.399645 eV·Å。
//!
//! ```text
//! φ(r) = k_e [ Σ_R erfc(γ√(xᵀε⁻¹x)) / (√det ε · √(xᵀε⁻¹x))            x = r + R
//!            + (4π/V) Σ_{G≠0} exp(-GᵀεG / 4γ²) / (GᵀεG) · cos(G·r)
//!            - π / (V γ²) ]
//! ```
//!
//! Madelung 电势去掉 R = 0 项并减去自相互作用 2γ / (√π √det ε)。
//!
//! ## 依赖关系
//! - 被 `corrections/kumagai.rs` 使用

use super::special::erfc;
use super::COULOMB_CONSTANT;
use crate::error::{DefectError, Result};
use crate::models::{Dielectric, Lattice};
use nalgebra::{Matrix3, Vector3};
use std::f64::consts::PI;

/// erfc / exp 截断处的参数值（对应约 1e-12 的精度）
const REAL_SPACE_CUTOFF: f64 = 5.0;
const RECIPROCAL_CUTOFF: f64 = 5.3;

/// 预计算好实空间与倒空间格矢的 Ewald 求和器
#[derive(Debug, Clone)]
pub struct Ewald {
    volume: f64,
    epsilon_inv: Matrix3<f64>,
    sqrt_det: f64,
    gamma: f64,
    real_vectors: Vec<Vector3<f64>>,
    /// (G, exp(-GᵀεG/4γ²) / GᵀεG)
    reciprocal_terms: Vec<(Vector3<f64>, f64)>,
}

impl Ewald {
    /// 使用默认的 Ewald 参数 γ
    pub fn new(lattice: &Lattice, dielectric: &Dielectric) -> Result<Self> {
        let eps = dielectric.to_matrix();
        let det = eps.determinant();
        let volume = lattice.volume().abs();
        let gamma = PI.sqrt() / volume.cbrt() * det.powf(1.0 / 6.0);
        Self::with_gamma(lattice, dielectric, gamma)
    }

    /// 指定 Ewald 参数 γ (Å⁻¹)
    pub fn with_gamma(lattice: &Lattice, dielectric: &Dielectric, gamma: f64) -> Result<Self> {
        let eps = dielectric.to_matrix();
        let det = eps.determinant();
        let epsilon_inv = eps.try_inverse().filter(|_| det > 0.0).ok_or_else(|| {
            DefectError::InvalidDielectric("tensor is not positive definite".to_string())
        })?;

        let eigenvalues = eps.symmetric_eigen().eigenvalues;
        let eig_max = eigenvalues.max();
        let eig_min = eigenvalues.min();
        if eig_min <= 0.0 {
            return Err(DefectError::InvalidDielectric(
                "tensor is not positive definite".to_string(),
            ));
        }

        let volume = lattice.volume().abs();
        let m = lattice.to_matrix();
        let reciprocal = lattice.reciprocal();
        let lengths = lattice.lengths();
        let recip_lengths = [0, 1, 2].map(|i| reciprocal.row(i).norm());

        // xᵀε⁻¹x ≥ |x|²/λ_max：实空间截断半径，再加上晶胞内 r 的最大长度
        let r_max = REAL_SPACE_CUTOFF / gamma * eig_max.sqrt();
        let r_cover = r_max + lengths.iter().sum::<f64>() / 2.0;
        let n_max = recip_lengths.map(|b| (r_cover * b / (2.0 * PI)).ceil() as i32);
        let mut real_vectors = Vec::new();
        for i in -n_max[0]..=n_max[0] {
            for j in -n_max[1]..=n_max[1] {
                for k in -n_max[2]..=n_max[2] {
                    let n = Vector3::new(i as f64, j as f64, k as f64);
                    let r = m.transpose() * n;
                    if r.norm() <= r_cover {
                        real_vectors.push(r);
                    }
                }
            }
        }

        // GᵀεG ≥ λ_min |G|²：倒空间截断半径
        let g_max = 2.0 * gamma * RECIPROCAL_CUTOFF / eig_min.sqrt();
        let m_max = lengths.map(|a| (g_max * a / (2.0 * PI)).ceil() as i32);
        let mut reciprocal_terms = Vec::new();
        for i in -m_max[0]..=m_max[0] {
            for j in -m_max[1]..=m_max[1] {
                for k in -m_max[2]..=m_max[2] {
                    if i == 0 && j == 0 && k == 0 {
                        continue;
                    }
                    let g = reciprocal.transpose() * Vector3::new(i as f64, j as f64, k as f64);
                    if g.norm() > g_max {
                        continue;
                    }
                    let geg = (g.transpose() * eps * g)[(0, 0)];
                    reciprocal_terms.push((g, (-geg / (4.0 * gamma * gamma)).exp() / geg));
                }
            }
        }

        Ok(Ewald {
            volume,
            epsilon_inv,
            sqrt_det: det.sqrt(),
            gamma,
            real_vectors,
            reciprocal_terms,
        })
    }

    fn scaled_norm(&self, x: &Vector3<f64>) -> f64 {
        (x.transpose() * self.epsilon_inv * x)[(0, 0)].sqrt()
    }

    fn reciprocal_sum(&self, r: &Vector3<f64>) -> f64 {
        4.0 * PI / self.volume
            * self
                .reciprocal_terms
                .iter()
                .map(|(g, w)| w * g.dot(r).cos())
                .sum::<f64>()
    }

    fn background(&self) -> f64 {
        -PI / (self.volume * self.gamma * self.gamma)
    }

    /// 单位正电荷在 `r`（相对电荷位置的笛卡尔矢量，Å）处产生的电势 (V)
    pub fn potential(&self, r: &Vector3<f64>) -> f64 {
        let real: f64 = self
            .real_vectors
            .iter()
            .map(|lv| {
                let x = r + lv;
                let s = self.scaled_norm(&x);
                if s < 1e-10 {
                    0.0
                } else {
                    erfc(self.gamma * s) / (self.sqrt_det * s)
                }
            })
            .sum();
        COULOMB_CONSTANT * (real + self.reciprocal_sum(r) + self.background())
    }

    /// 单位正电荷阵列在电荷自身位置的 Madelung 电势 (V)
    pub fn madelung_potential(&self) -> f64 {
        let real: f64 = self
            .real_vectors
            .iter()
            .filter(|lv| lv.norm() > 1e-10)
            .map(|lv| {
                let s = self.scaled_norm(lv);
                erfc(self.gamma * s) / (self.sqrt_det * s)
            })
            .sum();
        let origin = Vector3::zeros();
        let self_term = 2.0 * self.gamma / (PI.sqrt() * self.sqrt_det);
        COULOMB_CONSTANT * (real + self.reciprocal_sum(&origin) + self.background() - self_term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 简单立方点电荷阵列的 Madelung 常数（含补偿背景）
    const SC_MADELUNG: f64 = -2.837_297_479;

    #[test]
    fn test_simple_cubic_madelung() {
        let l = 10.0;
        let ewald = Ewald::new(&Lattice::cubic(l), &Dielectric::scalar(1.0)).unwrap();
        let alpha = ewald.madelung_potential() * l / COULOMB_CONSTANT;
        assert!((alpha - SC_MADELUNG).abs() < 1e-5, "alpha = {}", alpha);
    }

    #[test]
    fn test_dielectric_scaling() {
        let lattice = Lattice::cubic(8.0);
        let vacuum = Ewald::new(&lattice, &Dielectric::scalar(1.0)).unwrap();
        let screened = Ewald::new(&lattice, &Dielectric::scalar(10.0)).unwrap();
        let ratio = screened.madelung_potential() / vacuum.madelung_potential();
        assert!((ratio - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_potential_independent_of_gamma() {
        let lattice = Lattice::from_vectors([[8.0, 0.0, 0.0], [1.0, 9.0, 0.0], [0.0, 0.5, 10.0]]);
        let dielectric = Dielectric::diagonal([6.0, 8.0, 12.0]);
        let a = Ewald::with_gamma(&lattice, &dielectric, 0.4).unwrap();
        let b = Ewald::with_gamma(&lattice, &dielectric, 0.7).unwrap();
        let r = Vector3::new(2.0, -1.5, 3.0);
        assert!((a.potential(&r) - b.potential(&r)).abs() < 1e-6);
        assert!((a.madelung_potential() - b.madelung_potential()).abs() < 1e-6);
    }
}
