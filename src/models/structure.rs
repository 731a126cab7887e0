//! # 晶体结构数据模型
//!
//! 定义超胞结构的统一表示：晶格、原子（分数坐标）以及周期性几何工具。
//!
//! ## 功能
//! - 分数坐标 / 笛卡尔坐标互转
//! - 最小镜像距离
//! - 晶面间距与最大内切球半径（缺陷区域半径的默认值）
//! - 倒易晶格
//!
//! ## 依赖关系
//! - 被 `parsers/`、`geometry/`、`corrections/`、`analysis/` 使用
//! - 使用 `nalgebra` 做 3x3 线性代数

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;

/// 晶格参数表示
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    /// 晶格向量矩阵 (3x3)，行向量表示 a, b, c
    /// [[a1, a2, a3], [b1, b2, b3], [c1, c2, c3]]
    pub matrix: [[f64; 3]; 3],
}

impl Lattice {
    /// 从晶格向量矩阵创建
    pub fn from_vectors(matrix: [[f64; 3]; 3]) -> Self {
        Lattice { matrix }
    }

    /// 立方晶格
    pub fn cubic(a: f64) -> Self {
        Lattice::from_vectors([[a, 0.0, 0.0], [0.0, a, 0.0], [0.0, 0.0, a]])
    }

    /// 行向量矩阵（nalgebra 形式）
    pub fn to_matrix(&self) -> Matrix3<f64> {
        let m = &self.matrix;
        Matrix3::new(
            m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2],
        )
    }

    pub fn from_matrix(m: &Matrix3<f64>) -> Self {
        Lattice::from_vectors([
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ])
    }

    /// 第 i 个晶格向量
    pub fn vector(&self, i: usize) -> Vector3<f64> {
        Vector3::from(self.matrix[i])
    }

    /// 晶格常数 a, b, c
    pub fn lengths(&self) -> [f64; 3] {
        [0, 1, 2].map(|i| self.vector(i).norm())
    }

    /// 计算晶格体积（带符号的行列式）
    pub fn volume(&self) -> f64 {
        self.to_matrix().determinant()
    }

    /// 分数坐标 -> 笛卡尔坐标
    pub fn frac_to_cart(&self, frac: &[f64; 3]) -> Vector3<f64> {
        self.to_matrix().transpose() * Vector3::from(*frac)
    }

    /// 笛卡尔坐标 -> 分数坐标
    pub fn cart_to_frac(&self, cart: &Vector3<f64>) -> [f64; 3] {
        let inv = self
            .to_matrix()
            .transpose()
            .try_inverse()
            .unwrap_or_else(Matrix3::zeros);
        let f = inv * cart;
        [f.x, f.y, f.z]
    }

    /// 倒易晶格（行向量，含 2π 因子）
    pub fn reciprocal(&self) -> Matrix3<f64> {
        self.to_matrix()
            .try_inverse()
            .map(|inv| inv.transpose() * (2.0 * PI))
            .unwrap_or_else(Matrix3::zeros)
    }

    /// 三组平行晶面的间距 |V| / |a_j x a_k|
    pub fn plane_spacings(&self) -> [f64; 3] {
        let vol = self.volume().abs();
        [0, 1, 2].map(|i| {
            let cross = self.vector((i + 1) % 3).cross(&self.vector((i + 2) % 3));
            vol / cross.norm()
        })
    }

    /// 超胞中采样区域的默认半径：最大晶面间距的一半
    pub fn max_sphere_radius(&self) -> f64 {
        self.plane_spacings().into_iter().fold(0.0, f64::max) / 2.0
    }

    /// Wigner-Seitz 内切球半径：最小晶面间距的一半
    pub fn inscribed_radius(&self) -> f64 {
        self.plane_spacings()
            .into_iter()
            .fold(f64::INFINITY, f64::min)
            / 2.0
    }

    /// 最小镜像下的笛卡尔差矢量 (b - a)
    pub fn min_image_vector(&self, a: &[f64; 3], b: &[f64; 3]) -> Vector3<f64> {
        let d = [0, 1, 2].map(|i| {
            let x = b[i] - a[i];
            x - x.round()
        });

        // 斜晶胞中 round 后的镜像不一定最近，检查相邻镜像
        let mut best = self.frac_to_cart(&d);
        let mut best_norm = best.norm_squared();
        for i in -1..=1 {
            for j in -1..=1 {
                for k in -1..=1 {
                    if i == 0 && j == 0 && k == 0 {
                        continue;
                    }
                    let shifted = [d[0] + i as f64, d[1] + j as f64, d[2] + k as f64];
                    let v = self.frac_to_cart(&shifted);
                    let n = v.norm_squared();
                    if n < best_norm {
                        best = v;
                        best_norm = n;
                    }
                }
            }
        }
        best
    }

    /// 最小镜像距离
    pub fn distance(&self, a: &[f64; 3], b: &[f64; 3]) -> f64 {
        self.min_image_vector(a, b).norm()
    }

    /// 两点的周期性距离是否小于 `tol`（只适用于远小于晶格常数的容差）
    pub fn is_close(&self, a: &[f64; 3], b: &[f64; 3], tol: f64) -> bool {
        let d = [0, 1, 2].map(|i| {
            let x = b[i] - a[i];
            x - x.round()
        });
        self.frac_to_cart(&d).norm() < tol
    }

    /// 两个晶格是否在容差内相同
    pub fn approx_eq(&self, other: &Lattice, tol: f64) -> bool {
        self.matrix
            .iter()
            .flatten()
            .zip(other.matrix.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= tol)
    }
}

/// 将分数坐标折回 [0, 1)
pub fn wrap_frac(frac: &[f64; 3]) -> [f64; 3] {
    frac.map(|x| {
        let w = x - x.floor();
        // 1 - 1e-12 之类的值折回 0
        if (w - 1.0).abs() < 1e-10 {
            0.0
        } else {
            w
        }
    })
}

/// 原子信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    /// 元素符号
    pub element: String,

    /// 分数坐标 [x, y, z]
    pub position: [f64; 3],
}

impl Atom {
    pub fn new(element: impl Into<String>, position: [f64; 3]) -> Self {
        Atom {
            element: element.into(),
            position,
        }
    }
}

/// 晶体结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crystal {
    /// 结构名称
    pub name: String,

    /// 晶格
    pub lattice: Lattice,

    /// 原子列表
    pub atoms: Vec<Atom>,
}

impl Crystal {
    pub fn new(name: impl Into<String>, lattice: Lattice, atoms: Vec<Atom>) -> Self {
        Crystal {
            name: name.into(),
            lattice,
            atoms,
        }
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// 元素计数
    pub fn composition(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for atom in &self.atoms {
            *counts.entry(atom.element.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// 按首次出现顺序排列的元素
    pub fn species(&self) -> Vec<String> {
        let mut species: Vec<String> = Vec::new();
        for atom in &self.atoms {
            if !species.contains(&atom.element) {
                species.push(atom.element.clone());
            }
        }
        species
    }

    /// 计算化学式
    pub fn formula(&self) -> String {
        format_formula(&self.composition())
    }

    /// 约化化学式，如 Mg32O32 -> MgO
    pub fn reduced_formula(&self) -> String {
        let counts = self.composition();
        let divisor = counts.values().copied().fold(0, gcd).max(1);
        let reduced: BTreeMap<String, usize> = counts
            .into_iter()
            .map(|(el, n)| (el, n / divisor))
            .collect();
        format_formula(&reduced)
    }

    /// 第 i 个原子的笛卡尔坐标
    pub fn cart_coords(&self, i: usize) -> Vector3<f64> {
        self.lattice.frac_to_cart(&self.atoms[i].position)
    }

    /// 某元素原子到给定点的最小距离
    pub fn nearest_distance(&self, element: &str, frac: &[f64; 3]) -> Option<f64> {
        self.atoms
            .iter()
            .filter(|a| a.element == element)
            .map(|a| self.lattice.distance(&a.position, frac))
            .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |m| m.min(d))))
    }

    /// 所有原子中最近邻距离的最大值（用于判断位点是否"远离"所有原子）
    pub fn max_nearest_neighbour_distance(&self) -> f64 {
        let mut max_nn: f64 = 0.0;
        for (i, a) in self.atoms.iter().enumerate() {
            let nn = self
                .atoms
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, b)| self.lattice.distance(&a.position, &b.position))
                .fold(f64::INFINITY, f64::min);
            if nn.is_finite() {
                max_nn = max_nn.max(nn);
            }
        }
        max_nn
    }
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn format_formula(counts: &BTreeMap<String, usize>) -> String {
    counts
        .iter()
        .map(|(el, &count)| {
            if count == 1 {
                el.to_string()
            } else {
                format!("{}{}", el, count)
            }
        })
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rocksalt() -> Crystal {
        let atoms = vec![
            Atom::new("Na", [0.0, 0.0, 0.0]),
            Atom::new("Na", [0.5, 0.5, 0.0]),
            Atom::new("Na", [0.5, 0.0, 0.5]),
            Atom::new("Na", [0.0, 0.5, 0.5]),
            Atom::new("Cl", [0.5, 0.0, 0.0]),
            Atom::new("Cl", [0.0, 0.5, 0.0]),
            Atom::new("Cl", [0.0, 0.0, 0.5]),
            Atom::new("Cl", [0.5, 0.5, 0.5]),
        ];
        Crystal::new("NaCl", Lattice::cubic(5.0), atoms)
    }

    #[test]
    fn test_lattice_volume_cubic() {
        let lattice = Lattice::cubic(5.0);
        assert!((lattice.volume() - 125.0).abs() < 1e-6);
    }

    #[test]
    fn test_frac_cart_roundtrip() {
        let lattice = Lattice::from_vectors([[4.0, 0.0, 0.0], [2.0, 3.5, 0.0], [0.0, 0.0, 6.0]]);
        let cart = lattice.frac_to_cart(&[0.25, 0.5, 0.75]);
        let frac = lattice.cart_to_frac(&cart);
        assert!((frac[0] - 0.25).abs() < 1e-10);
        assert!((frac[1] - 0.5).abs() < 1e-10);
        assert!((frac[2] - 0.75).abs() < 1e-10);
    }

    #[test]
    fn test_min_image_distance_wraps() {
        let lattice = Lattice::cubic(10.0);
        let d = lattice.distance(&[0.05, 0.0, 0.0], &[0.95, 0.0, 0.0]);
        assert!((d - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_reciprocal_orthogonality() {
        let lattice = Lattice::from_vectors([[4.0, 0.0, 0.0], [2.0, 3.5, 0.0], [0.5, 0.3, 6.0]]);
        let b = lattice.reciprocal();
        let a = lattice.to_matrix();
        let prod = a * b.transpose();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 2.0 * PI } else { 0.0 };
                assert!((prod[(i, j)] - expected).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_max_sphere_radius_cubic() {
        let lattice = Lattice::cubic(8.0);
        assert!((lattice.max_sphere_radius() - 4.0).abs() < 1e-10);
        assert!((lattice.inscribed_radius() - 4.0).abs() < 1e-10);
    }

    #[test]
    fn test_crystal_formula() {
        let crystal = rocksalt();
        assert_eq!(crystal.formula(), "Cl4Na4");
        assert_eq!(crystal.reduced_formula(), "ClNa");
        assert_eq!(crystal.species(), vec!["Na".to_string(), "Cl".to_string()]);
    }

    #[test]
    fn test_wrap_frac() {
        let w = wrap_frac(&[-0.25, 1.5, 0.999_999_999_999_9]);
        assert!((w[0] - 0.75).abs() < 1e-12);
        assert!((w[1] - 0.5).abs() < 1e-12);
        assert_eq!(w[2], 0.0);
    }

    #[test]
    fn test_nearest_neighbour_distance() {
        let crystal = rocksalt();
        assert!((crystal.max_nearest_neighbour_distance() - 2.5).abs() < 1e-10);
        let d = crystal.nearest_distance("Cl", &[0.0, 0.0, 0.0]).unwrap();
        assert!((d - 2.5).abs() < 1e-10);
    }
}
