//! # 介电张量
//!
//! 用户可以给出标量、3 维向量（对角元）或完整的 3x3 张量，统一转换为 3x3 矩阵。
//!
//! ## 功能
//! - 各向同性判断（对角元相对 ε₁₁ 偏差 ≤ 20%）
//! - 调和平均 / 算术平均的等效标量
//! - 近各向同性判断（对角元相对平均值偏差 ≤ 5%），用于负修正提示
//!
//! ## 依赖关系
//! - 被 `corrections/` 和 `analysis/` 使用

use crate::error::{DefectError, Result};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 各向同性判断的相对容差
const ISOTROPY_RTOL: f64 = 0.2;
const ISOTROPY_ATOL: f64 = 1e-8;

/// 负修正提示所用的"近各向同性"阈值
const NEAR_ISOTROPY_TOL: f64 = 0.05;

/// 3x3 介电张量（ε∞ + ε_ionic）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dielectric {
    pub tensor: [[f64; 3]; 3],
}

impl Dielectric {
    pub fn scalar(value: f64) -> Self {
        Dielectric::diagonal([value; 3])
    }

    pub fn diagonal(values: [f64; 3]) -> Self {
        let mut tensor = [[0.0; 3]; 3];
        for (i, v) in values.iter().enumerate() {
            tensor[i][i] = *v;
        }
        Dielectric { tensor }
    }

    /// 从 1、3 或 9 个数值创建
    pub fn from_values(values: &[f64]) -> Result<Self> {
        let dielectric = match values.len() {
            1 => Dielectric::scalar(values[0]),
            3 => Dielectric::diagonal([values[0], values[1], values[2]]),
            9 => Dielectric {
                tensor: [
                    [values[0], values[1], values[2]],
                    [values[3], values[4], values[5]],
                    [values[6], values[7], values[8]],
                ],
            },
            n => {
                return Err(DefectError::InvalidDielectric(format!(
                    "expected 1, 3 or 9 values, got {}",
                    n
                )))
            }
        };

        if dielectric.diagonal_values().iter().any(|d| *d <= 0.0) {
            return Err(DefectError::InvalidDielectric(
                "diagonal elements must be positive".to_string(),
            ));
        }
        Ok(dielectric)
    }

    pub fn to_matrix(&self) -> Matrix3<f64> {
        let t = &self.tensor;
        Matrix3::new(
            t[0][0], t[0][1], t[0][2], t[1][0], t[1][1], t[1][2], t[2][0], t[2][1], t[2][2],
        )
    }

    pub fn diagonal_values(&self) -> [f64; 3] {
        [self.tensor[0][0], self.tensor[1][1], self.tensor[2][2]]
    }

    /// 所有对角元是否都在 ε₁₁ 的 20% 以内
    pub fn is_isotropic(&self) -> bool {
        let diag = self.diagonal_values();
        let reference = diag[0];
        diag.iter()
            .all(|d| (d - reference).abs() <= ISOTROPY_ATOL + ISOTROPY_RTOL * reference.abs())
    }

    /// 所有对角元是否都在对角元平均值的 5% 以内
    pub fn is_near_isotropic(&self) -> bool {
        let mean = self.arithmetic_mean();
        self.diagonal_values()
            .iter()
            .all(|d| ((d - mean) / mean).abs() <= NEAR_ISOTROPY_TOL)
    }

    /// 对角元的调和平均 3 / Σ(1/εᵢ)
    pub fn harmonic_mean(&self) -> f64 {
        3.0 / self.diagonal_values().iter().map(|d| 1.0 / d).sum::<f64>()
    }

    pub fn arithmetic_mean(&self) -> f64 {
        self.diagonal_values().iter().sum::<f64>() / 3.0
    }

    /// 平面平均方法要求的标量介电常数；各向异性时返回 None
    pub fn isotropic_value(&self) -> Option<f64> {
        if self.is_isotropic() {
            Some(self.arithmetic_mean())
        } else {
            None
        }
    }
}

impl FromStr for Dielectric {
    type Err = DefectError;

    /// 解析 "10"、"10,11,12" 或 9 个以逗号/空白分隔的数
    fn from_str(s: &str) -> Result<Self> {
        let values: std::result::Result<Vec<f64>, _> = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(|t| t.parse::<f64>())
            .collect();
        let values =
            values.map_err(|e| DefectError::InvalidDielectric(format!("'{}': {}", s, e)))?;
        Dielectric::from_values(&values)
    }
}

impl fmt::Display for Dielectric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.diagonal_values();
        let off_diagonal = (0..3)
            .flat_map(|i| (0..3).map(move |j| (i, j)))
            .any(|(i, j)| i != j && self.tensor[i][j].abs() > 1e-12);

        if !off_diagonal && d.iter().all(|v| (v - d[0]).abs() < 1e-12) {
            write!(f, "{:.3}", d[0])
        } else if !off_diagonal {
            write!(f, "[{:.3}, {:.3}, {:.3}]", d[0], d[1], d[2])
        } else {
            write!(f, "{:?}", self.tensor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_variants() {
        let d: Dielectric = "10".parse().unwrap();
        assert_eq!(d.diagonal_values(), [10.0; 3]);

        let d: Dielectric = "8, 9,10".parse().unwrap();
        assert_eq!(d.diagonal_values(), [8.0, 9.0, 10.0]);

        let d: Dielectric = "1 0 0 0 2 0 0 0 3".parse().unwrap();
        assert_eq!(d.diagonal_values(), [1.0, 2.0, 3.0]);

        assert!("1,2".parse::<Dielectric>().is_err());
        assert!("-1".parse::<Dielectric>().is_err());
    }

    #[test]
    fn test_isotropy_threshold() {
        // 20% 偏差仍视为各向同性
        assert!(Dielectric::diagonal([10.0, 10.0, 12.0]).is_isotropic());
        assert!(Dielectric::diagonal([10.0, 8.0, 11.5]).is_isotropic());
        // 超过 20% 为各向异性
        assert!(!Dielectric::diagonal([10.0, 10.0, 12.5]).is_isotropic());
        assert!(Dielectric::diagonal([10.0, 10.0, 12.5]).isotropic_value().is_none());
    }

    #[test]
    fn test_harmonic_mean() {
        let d = Dielectric::diagonal([2.0, 4.0, 4.0]);
        // 3 / (0.5 + 0.25 + 0.25) = 3
        assert!((d.harmonic_mean() - 3.0).abs() < 1e-12);
        assert!(d.harmonic_mean() < d.arithmetic_mean());
    }

    #[test]
    fn test_near_isotropic() {
        assert!(Dielectric::scalar(5.0).is_near_isotropic());
        assert!(!Dielectric::diagonal([10.0, 10.0, 12.0]).is_near_isotropic());
    }

    #[test]
    fn test_display() {
        assert_eq!(Dielectric::scalar(9.5).to_string(), "9.500");
        assert_eq!(
            Dielectric::diagonal([1.0, 2.0, 3.0]).to_string(),
            "[1.000, 2.000, 3.000]"
        );
    }
}
