//! # Voronoi 节点定位
//!
//! 在给定点附近做局部 Delaunay 搜索：取最近的若干原子，枚举四元组的外接球球心，
//! 保留内部没有其他原子的空球球心（即 Voronoi 节点），返回离给定点最近的一个。
//! 用于猜测间隙原子弛豫前的位置。
//!
//! ## 依赖关系
//! - 被 `analysis/classifier.rs` 使用
//! - 使用 `nalgebra` 求解外接球球心

use crate::models::{wrap_frac, Crystal};
use nalgebra::{Matrix3, Vector3};

/// 参与四元组枚举的最近邻原子数
const NEIGHBOUR_COUNT: usize = 14;

/// 邻居搜索半径 (Å)
const SEARCH_RADIUS: f64 = 8.0;

/// 空球判断的容差 (Å)
const EMPTY_SPHERE_TOL: f64 = 1e-3;

/// 返回 `crystal` 中离分数坐标 `frac` 最近的 Voronoi 节点（分数坐标，已折回晶胞）
pub fn nearest_voronoi_node(crystal: &Crystal, frac: &[f64; 3]) -> Option<[f64; 3]> {
    let lattice = &crystal.lattice;
    let centre = lattice.frac_to_cart(frac);
    let neighbours = periodic_neighbours(crystal, &centre, SEARCH_RADIUS);
    if neighbours.len() < 4 {
        return None;
    }
    let nearest: Vec<Vector3<f64>> = neighbours.iter().take(NEIGHBOUR_COUNT).copied().collect();

    let mut best: Option<(f64, Vector3<f64>)> = None;
    let n = nearest.len();
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                for l in (k + 1)..n {
                    let Some(node) = circumcentre(&nearest[i], &nearest[j], &nearest[k], &nearest[l])
                    else {
                        continue;
                    };
                    let radius = (node - nearest[i]).norm();
                    let offset = (node - centre).norm();
                    // 邻居列表必须覆盖整个外接球才能判断是否为空球
                    if offset + radius > SEARCH_RADIUS {
                        continue;
                    }
                    if best.as_ref().is_some_and(|(d, _)| offset >= *d) {
                        continue;
                    }
                    let empty = neighbours
                        .iter()
                        .all(|p| (p - node).norm() >= radius - EMPTY_SPHERE_TOL);
                    if empty {
                        best = Some((offset, node));
                    }
                }
            }
        }
    }

    best.map(|(_, node)| wrap_frac(&lattice.cart_to_frac(&node)))
}

/// 在 `radius` 内的所有周期性原子镜像（笛卡尔坐标），按距离排序
fn periodic_neighbours(crystal: &Crystal, centre: &Vector3<f64>, radius: f64) -> Vec<Vector3<f64>> {
    let lattice = &crystal.lattice;
    let spacings = lattice.plane_spacings();
    let ranges = spacings.map(|s| (radius / s).ceil() as i32 + 1);

    let mut points: Vec<(f64, Vector3<f64>)> = Vec::new();
    for atom in &crystal.atoms {
        let p = wrap_frac(&atom.position);
        for i in -ranges[0]..=ranges[0] {
            for j in -ranges[1]..=ranges[1] {
                for k in -ranges[2]..=ranges[2] {
                    let cart =
                        lattice.frac_to_cart(&[p[0] + i as f64, p[1] + j as f64, p[2] + k as f64]);
                    let d = (cart - centre).norm();
                    if d <= radius {
                        points.push((d, cart));
                    }
                }
            }
        }
    }
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    points.into_iter().map(|(_, p)| p).collect()
}

/// 四点外接球球心；四点共面时返回 None
fn circumcentre(
    p0: &Vector3<f64>,
    p1: &Vector3<f64>,
    p2: &Vector3<f64>,
    p3: &Vector3<f64>,
) -> Option<Vector3<f64>> {
    let a = Matrix3::from_rows(&[
        (p1 - p0).transpose() * 2.0,
        (p2 - p0).transpose() * 2.0,
        (p3 - p0).transpose() * 2.0,
    ]);
    if a.determinant().abs() < 1e-8 {
        return None;
    }
    let b = Vector3::new(
        p1.norm_squared() - p0.norm_squared(),
        p2.norm_squared() - p0.norm_squared(),
        p3.norm_squared() - p0.norm_squared(),
    );
    a.lu().solve(&b)
}
