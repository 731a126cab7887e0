//! # 对称性工具
//!
//! 针对缺陷分析所需的最小对称性功能，在体相超胞上直接计算：
//!
//! ## 功能
//! - 超胞的纯平移（由原子数最少的元素搜索）
//! - 原胞约化：在平移与超胞基矢组合出的短矢量中选取体积为 V/|T| 的最短三元组
//! - 晶格旋转：把基矢映射到等长格点、det = ±1 且 WᵀGW ≈ G 的整数矩阵
//! - 空间群操作、对称等价位点、位点点群 (Schoenflies)
//! - 等价分数坐标的规范排序
//!
//! ## 依赖关系
//! - 被 `analysis/classifier.rs` 使用
//! - 使用 `nalgebra` 和 `models/structure.rs`

use super::matcher::indices_by_element;
use crate::error::{DefectError, Result};
use crate::models::{wrap_frac, Atom, Crystal, Lattice};
use nalgebra::{Matrix3, Vector3};

/// 默认对称性容差 (Å)
pub const DEFAULT_SYMPREC: f64 = 0.01;

/// 原胞基矢的候选短矢量数
const MAX_BASIS_CANDIDATES: usize = 40;

/// 空间群操作 x' = W x + t（分数坐标）
#[derive(Debug, Clone, PartialEq)]
pub struct SymmetryOperation {
    pub rotation: Matrix3<i32>,
    pub translation: [f64; 3],
}

impl SymmetryOperation {
    pub fn apply(&self, frac: &[f64; 3]) -> [f64; 3] {
        let w = self.rotation.map(|x| x as f64);
        let v = w * Vector3::from(*frac);
        [
            v.x + self.translation[0],
            v.y + self.translation[1],
            v.z + self.translation[2],
        ]
    }
}

/// 体相结构的对称性信息（原胞与空间群操作）
#[derive(Debug, Clone)]
pub struct SymmetryAnalyzer {
    pub primitive: Crystal,
    pub operations: Vec<SymmetryOperation>,
    pub symprec: f64,
}

impl SymmetryAnalyzer {
    /// 从体相超胞构建
    pub fn new(bulk: &Crystal, symprec: f64) -> Result<Self> {
        let primitive = primitive_cell(bulk, symprec)?;
        let operations = space_group_operations(&primitive, symprec);
        Ok(SymmetryAnalyzer {
            primitive,
            operations,
            symprec,
        })
    }

    /// 将超胞中的分数坐标折叠到原胞
    pub fn to_primitive_frac(&self, supercell: &Lattice, frac: &[f64; 3]) -> [f64; 3] {
        let cart = supercell.frac_to_cart(frac);
        wrap_frac(&self.primitive.lattice.cart_to_frac(&cart))
    }

    /// 原胞中与 `frac` 对称等价的所有位点，按规范顺序排序
    pub fn equivalent_sites(&self, frac: &[f64; 3]) -> Vec<[f64; 3]> {
        let lattice = &self.primitive.lattice;
        let mut sites: Vec<[f64; 3]> = Vec::new();
        for op in &self.operations {
            let image = wrap_frac(&op.apply(frac));
            if !sites
                .iter()
                .any(|s| lattice.is_close(s, &image, self.symprec))
            {
                sites.push(image);
            }
        }
        sort_canonical(&mut sites);
        sites
    }

    /// 将位点吸附到原胞中最近的同种原子上（空位与替位使用）
    pub fn snap_to_atom(&self, element: &str, frac: &[f64; 3]) -> [f64; 3] {
        let lattice = &self.primitive.lattice;
        self.primitive
            .atoms
            .iter()
            .filter(|a| a.element == element)
            .map(|a| (a.position, lattice.distance(&a.position, frac)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(p, _)| p)
            .unwrap_or(*frac)
    }

    /// 把近似对称的位点投影到容差 `tol` (Å) 内稳定子群的不动点上
    ///
    /// 对所有把位点映射到 `tol` 以内的操作取像点的平均，弛豫后略有偏移的间隙位点
    /// 因此回到理想的高对称位置。
    pub fn symmetrize_site(&self, frac: &[f64; 3], tol: f64) -> [f64; 3] {
        let lattice = &self.primitive.lattice;
        let mut shift = Vector3::zeros();
        let mut count = 0usize;
        for op in &self.operations {
            let d = lattice.min_image_vector(frac, &op.apply(frac));
            if d.norm() < tol {
                shift += d;
                count += 1;
            }
        }
        if count == 0 {
            return wrap_frac(frac);
        }
        let cart = lattice.frac_to_cart(frac) + shift / count as f64;
        wrap_frac(&lattice.cart_to_frac(&cart))
    }

    /// 位点的点群 (Schoenflies 符号)
    pub fn site_symmetry(&self, frac: &[f64; 3]) -> String {
        let lattice = &self.primitive.lattice;
        let stabilizer: Vec<&Matrix3<i32>> = self
            .operations
            .iter()
            .filter(|op| lattice.is_close(&op.apply(frac), frac, self.symprec))
            .map(|op| &op.rotation)
            .collect();
        schoenflies(&stabilizer).to_string()
    }
}

// ─────────────────────────────────────────────────────────────
// 原胞约化
// ─────────────────────────────────────────────────────────────

/// 超胞的所有纯平移（分数坐标，含零平移）
pub fn pure_translations(crystal: &Crystal, symprec: f64) -> Vec<[f64; 3]> {
    let groups = indices_by_element(crystal);
    let Some(reference_group) = groups.values().min_by_key(|g| g.len()) else {
        return vec![[0.0; 3]];
    };
    let origin = crystal.atoms[reference_group[0]].position;

    let mut translations = Vec::new();
    for &idx in reference_group {
        let p = crystal.atoms[idx].position;
        let t = wrap_frac(&[p[0] - origin[0], p[1] - origin[1], p[2] - origin[2]]);
        if maps_onto_itself(crystal, &Matrix3::identity(), &t, symprec) {
            translations.push(t);
        }
    }
    sort_canonical(&mut translations);
    translations
}

/// 由超胞约化出原胞；超胞本身即为原胞时返回其副本
pub fn primitive_cell(crystal: &Crystal, symprec: f64) -> Result<Crystal> {
    if crystal.is_empty() {
        return Err(DefectError::InvalidStructure(
            "cannot reduce an empty structure".to_string(),
        ));
    }

    let translations = pure_translations(crystal, symprec);
    let n_cells = translations.len();
    if n_cells <= 1 {
        let mut primitive = crystal.clone();
        primitive.atoms = primitive
            .atoms
            .into_iter()
            .map(|a| Atom::new(a.element, wrap_frac(&a.position)))
            .collect();
        return Ok(primitive);
    }

    let lattice = &crystal.lattice;
    let target_volume = lattice.volume().abs() / n_cells as f64;

    // 候选矢量：平移 + 相邻镜像，以及超胞基矢
    let mut candidates: Vec<Vector3<f64>> = Vec::new();
    for t in &translations {
        for shift in neighbour_shifts() {
            let f = [
                t[0] + shift[0] as f64,
                t[1] + shift[1] as f64,
                t[2] + shift[2] as f64,
            ];
            let v = lattice.frac_to_cart(&f);
            if v.norm() > symprec {
                candidates.push(v);
            }
        }
    }
    candidates.sort_by(|a, b| a.norm().total_cmp(&b.norm()));
    candidates.dedup_by(|a, b| (*a - *b).norm() < symprec);
    candidates.truncate(MAX_BASIS_CANDIDATES);

    let mut best: Option<(f64, Matrix3<f64>)> = None;
    for i in 0..candidates.len() {
        for j in (i + 1)..candidates.len() {
            for k in (j + 1)..candidates.len() {
                let m = Matrix3::from_rows(&[
                    candidates[i].transpose(),
                    candidates[j].transpose(),
                    candidates[k].transpose(),
                ]);
                let volume = m.determinant();
                if ((volume.abs() - target_volume) / target_volume).abs() > 1e-3 {
                    continue;
                }
                let total = candidates[i].norm() + candidates[j].norm() + candidates[k].norm();
                if best.as_ref().map_or(true, |(b, _)| total < *b - 1e-8) {
                    // 保持右手系
                    let m = if volume < 0.0 {
                        Matrix3::from_rows(&[
                            -m.row(0).into_owned(),
                            m.row(1).into_owned(),
                            m.row(2).into_owned(),
                        ])
                    } else {
                        m
                    };
                    best = Some((total, m));
                }
            }
        }
    }

    let (_, basis) = best.ok_or_else(|| {
        DefectError::InvalidStructure(format!(
            "could not find a primitive basis for {} lattice points",
            n_cells
        ))
    })?;
    let prim_lattice = Lattice::from_matrix(&basis);

    let mut atoms: Vec<Atom> = Vec::new();
    for atom in &crystal.atoms {
        let cart = lattice.frac_to_cart(&atom.position);
        let frac = wrap_frac(&prim_lattice.cart_to_frac(&cart));
        if !atoms
            .iter()
            .any(|a| a.element == atom.element && prim_lattice.is_close(&a.position, &frac, symprec))
        {
            atoms.push(Atom::new(atom.element.clone(), frac));
        }
    }

    if atoms.len() * n_cells != crystal.len() {
        return Err(DefectError::InvalidStructure(format!(
            "primitive cell reduction gave {} atoms for {} lattice points of a {}-atom supercell",
            atoms.len(),
            n_cells,
            crystal.len()
        )));
    }

    Ok(Crystal::new(crystal.reduced_formula(), prim_lattice, atoms))
}

fn neighbour_shifts() -> impl Iterator<Item = [i32; 3]> {
    (-1..=1).flat_map(|i| (-1..=1).flat_map(move |j| (-1..=1).map(move |k| [i, j, k])))
}

// ─────────────────────────────────────────────────────────────
// 空间群
// ─────────────────────────────────────────────────────────────

/// 保持度规张量不变的整数矩阵
///
/// W 的第 i 列是基矢 a_i 的像在原基矢下的整数坐标，候选像为长度相同的格点。
pub fn lattice_rotations(lattice: &Lattice, symprec: f64) -> Vec<Matrix3<i32>> {
    let m = lattice.to_matrix();
    let metric = m * m.transpose();
    let lengths = lattice.lengths();

    let mut points: Vec<Vector3<i32>> = Vec::new();
    for i in -2..=2 {
        for j in -2..=2 {
            for k in -2..=2 {
                points.push(Vector3::new(i, j, k));
            }
        }
    }
    let images: Vec<Vec<Vector3<i32>>> = (0..3)
        .map(|axis| {
            points
                .iter()
                .filter(|n| {
                    let cart = m.transpose() * n.map(|x| x as f64);
                    (cart.norm() - lengths[axis]).abs() < symprec
                })
                .copied()
                .collect()
        })
        .collect();

    let mut rotations = Vec::new();
    for c0 in &images[0] {
        for c1 in &images[1] {
            for c2 in &images[2] {
                let w = Matrix3::from_columns(&[*c0, *c1, *c2]);
                let wf = w.map(|x| x as f64);
                if wf.determinant().round().abs() as i32 != 1 {
                    continue;
                }
                let transformed = wf.transpose() * metric * wf;
                let preserved = (0..3).all(|i| {
                    (0..3).all(|j| {
                        let tol = 2.0 * symprec * lengths[i].max(lengths[j]);
                        (transformed[(i, j)] - metric[(i, j)]).abs() <= tol
                    })
                });
                if preserved {
                    rotations.push(w);
                }
            }
        }
    }
    rotations
}

/// 原胞的空间群操作
pub fn space_group_operations(primitive: &Crystal, symprec: f64) -> Vec<SymmetryOperation> {
    let groups = indices_by_element(primitive);
    let Some(reference_group) = groups.values().min_by_key(|g| g.len()) else {
        return Vec::new();
    };
    let origin = primitive.atoms[reference_group[0]].position;

    let mut operations = Vec::new();
    for rotation in lattice_rotations(&primitive.lattice, symprec) {
        let rotated = SymmetryOperation {
            rotation,
            translation: [0.0; 3],
        }
        .apply(&origin);

        for &idx in reference_group {
            let p = primitive.atoms[idx].position;
            let t = wrap_frac(&[p[0] - rotated[0], p[1] - rotated[1], p[2] - rotated[2]]);
            if maps_onto_itself(primitive, &rotation, &t, symprec) {
                operations.push(SymmetryOperation {
                    rotation,
                    translation: t,
                });
                // 原胞中每个旋转至多对应一个平移
                break;
            }
        }
    }
    operations
}

/// x -> W x + t 是否把结构映射到自身
fn maps_onto_itself(crystal: &Crystal, rotation: &Matrix3<i32>, t: &[f64; 3], symprec: f64) -> bool {
    let op = SymmetryOperation {
        rotation: *rotation,
        translation: *t,
    };
    crystal.atoms.iter().all(|atom| {
        let image = op.apply(&atom.position);
        crystal
            .atoms
            .iter()
            .any(|b| b.element == atom.element && crystal.lattice.is_close(&b.position, &image, symprec))
    })
}

// ─────────────────────────────────────────────────────────────
// 点群
// ─────────────────────────────────────────────────────────────

/// 旋转类型：[-6, -4, -3, -2, -1, 1, 2, 3, 4, 6] 中的索引
fn rotation_type_index(w: &Matrix3<i32>) -> Option<usize> {
    let trace = w.trace();
    let det = w.map(|x| x as f64).determinant().round() as i32;
    match (det, trace) {
        (1, 3) => Some(5),
        (1, -1) => Some(6),
        (1, 0) => Some(7),
        (1, 1) => Some(8),
        (1, 2) => Some(9),
        (-1, -3) => Some(4),
        (-1, 1) => Some(3),
        (-1, 0) => Some(2),
        (-1, -1) => Some(1),
        (-1, -2) => Some(0),
        _ => None,
    }
}

/// 32 个晶体学点群的旋转类型计数表
const POINT_GROUP_TABLE: [(&str, [usize; 10]); 32] = [
    ("C1", [0, 0, 0, 0, 0, 1, 0, 0, 0, 0]),
    ("Ci", [0, 0, 0, 0, 1, 1, 0, 0, 0, 0]),
    ("C2", [0, 0, 0, 0, 0, 1, 1, 0, 0, 0]),
    ("Cs", [0, 0, 0, 1, 0, 1, 0, 0, 0, 0]),
    ("C2h", [0, 0, 0, 1, 1, 1, 1, 0, 0, 0]),
    ("D2", [0, 0, 0, 0, 0, 1, 3, 0, 0, 0]),
    ("C2v", [0, 0, 0, 2, 0, 1, 1, 0, 0, 0]),
    ("D2h", [0, 0, 0, 3, 1, 1, 3, 0, 0, 0]),
    ("C4", [0, 0, 0, 0, 0, 1, 1, 0, 2, 0]),
    ("S4", [0, 2, 0, 0, 0, 1, 1, 0, 0, 0]),
    ("C4h", [0, 2, 0, 1, 1, 1, 1, 0, 2, 0]),
    ("D4", [0, 0, 0, 0, 0, 1, 5, 0, 2, 0]),
    ("C4v", [0, 0, 0, 4, 0, 1, 1, 0, 2, 0]),
    ("D2d", [0, 2, 0, 2, 0, 1, 3, 0, 0, 0]),
    ("D4h", [0, 2, 0, 5, 1, 1, 5, 0, 2, 0]),
    ("C3", [0, 0, 0, 0, 0, 1, 0, 2, 0, 0]),
    ("C3i", [0, 0, 2, 0, 1, 1, 0, 2, 0, 0]),
    ("D3", [0, 0, 0, 0, 0, 1, 3, 2, 0, 0]),
    ("C3v", [0, 0, 0, 3, 0, 1, 0, 2, 0, 0]),
    ("D3d", [0, 0, 2, 3, 1, 1, 3, 2, 0, 0]),
    ("C6", [0, 0, 0, 0, 0, 1, 1, 2, 0, 2]),
    ("C3h", [2, 0, 0, 1, 0, 1, 0, 2, 0, 0]),
    ("C6h", [2, 0, 2, 1, 1, 1, 1, 2, 0, 2]),
    ("D6", [0, 0, 0, 0, 0, 1, 7, 2, 0, 2]),
    ("C6v", [0, 0, 0, 6, 0, 1, 1, 2, 0, 2]),
    ("D3h", [2, 0, 0, 4, 0, 1, 3, 2, 0, 0]),
    ("D6h", [2, 0, 2, 7, 1, 1, 7, 2, 0, 2]),
    ("T", [0, 0, 0, 0, 0, 1, 3, 8, 0, 0]),
    ("Th", [0, 0, 8, 3, 1, 1, 3, 8, 0, 0]),
    ("O", [0, 0, 0, 0, 0, 1, 9, 8, 6, 0]),
    ("Td", [0, 6, 0, 6, 0, 1, 3, 8, 0, 0]),
    ("Oh", [0, 6, 8, 9, 1, 1, 9, 8, 6, 0]),
];

/// 由旋转部分识别 Schoenflies 点群；无法识别时返回 C1
pub fn schoenflies(rotations: &[&Matrix3<i32>]) -> &'static str {
    let mut counts = [0usize; 10];
    let mut unique: Vec<&Matrix3<i32>> = Vec::new();
    for w in rotations {
        if unique.contains(w) {
            continue;
        }
        unique.push(*w);
        if let Some(idx) = rotation_type_index(w) {
            counts[idx] += 1;
        }
    }
    POINT_GROUP_TABLE
        .iter()
        .find(|(_, table)| *table == counts)
        .map(|(name, _)| *name)
        .unwrap_or("C1")
}

// ─────────────────────────────────────────────────────────────
// 规范排序
// ─────────────────────────────────────────────────────────────

fn round4(x: f64) -> i64 {
    (x * 1e4).round() as i64
}

/// 规范排序键：重复坐标值多者优先，其次模长小者优先，再按坐标绝对值
fn canonical_key(frac: &[f64; 3]) -> (i64, i64, i64, i64, i64) {
    let c = frac.map(|x| (round4(x).rem_euclid(10_000)) as f64 / 1e4);
    let mut equal_pairs = 0;
    for i in 0..3 {
        for j in (i + 1)..3 {
            if round4(c[i]) == round4(c[j]) {
                equal_pairs += 1;
            }
        }
    }
    let magnitude = round4((c[0] * c[0] + c[1] * c[1] + c[2] * c[2]).sqrt());
    (
        -equal_pairs,
        magnitude,
        round4(c[0].abs()),
        round4(c[1].abs()),
        round4(c[2].abs()),
    )
}

/// 对分数坐标列表按规范顺序排序
pub fn sort_canonical(sites: &mut [[f64; 3]]) {
    sites.sort_by_key(canonical_key);
}
