//! # 结构匹配与缺陷位点定位
//!
//! 比较体相超胞与缺陷超胞：由组分差异判断缺陷类型，再用周期性最近邻匹配
//! 找出被移除 / 新增 / 被替换的位点，并建立其余原子的一一对应。
//!
//! ## 功能
//! - 空位：体相中离同种缺陷原子最远的位点
//! - 间隙：缺陷超胞中离同种体相原子最远的位点
//! - 替位：以上两者的组合
//! - 晶格基矢不一致的提示（远场平均位移 > 0.5 Å，或候选位点远离所有原子）
//!
//! ## 依赖关系
//! - 被 `analysis/classifier.rs` 使用
//! - 使用 `models/structure.rs`

use crate::error::{DefectError, Result};
use crate::models::{Crystal, DefectType};
use std::collections::BTreeMap;

/// 默认的原子位移容差 (Å)
pub const DEFAULT_STOL: f64 = 1.0;

/// 晶格常数的最大相对差异
const LATTICE_RTOL: f64 = 0.1;

/// 远场平均位移阈值 (Å)
const FAR_FIELD_DISPLACEMENT_TOL: f64 = 0.5;

/// 候选位点远离所有原子的判据：最大最近邻距离的倍数
const ISOLATED_SITE_FACTOR: f64 = 1.5;

/// 定位结果
#[derive(Debug, Clone, PartialEq)]
pub struct SiteMatch {
    pub defect_type: DefectType,
    /// 缺陷位点上的元素（空位为被移除的元素）
    pub element: String,
    /// 被替换的元素（仅替位）
    pub host_element: Option<String>,
    /// 缺陷超胞中的位点索引（空位为 None）
    pub defect_index: Option<usize>,
    /// 体相超胞中的位点索引（间隙为 None）
    pub bulk_index: Option<usize>,
    /// 缺陷原子索引 -> 体相原子索引（缺陷位点本身为 None）
    pub mapping: Vec<Option<usize>>,
    /// 晶格基矢可能不一致的提示
    pub basis_warning: Option<String>,
}

/// 周期性最近邻结构匹配器
#[derive(Debug, Clone)]
pub struct StructureMatcher {
    /// 原子位移容差 (Å)
    pub stol: f64,
}

impl Default for StructureMatcher {
    fn default() -> Self {
        StructureMatcher { stol: DEFAULT_STOL }
    }
}

impl StructureMatcher {
    pub fn new(stol: f64) -> Self {
        StructureMatcher { stol }
    }

    /// 定位缺陷位点
    pub fn locate(&self, bulk: &Crystal, defect: &Crystal) -> Result<SiteMatch> {
        check_lattices(bulk, defect)?;

        let (added, removed) = composition_difference(bulk, defect);
        let (defect_type, element, host_element) = match (added.as_slice(), removed.as_slice()) {
            ([(el, 1)], []) => (DefectType::Interstitial, el.clone(), None),
            ([], [(el, 1)]) => (DefectType::Vacancy, el.clone(), None),
            ([(dopant, 1)], [(host, 1)]) => {
                (DefectType::Substitution, dopant.clone(), Some(host.clone()))
            }
            _ => {
                return Err(DefectError::SiteCorrespondence {
                    reason: format!(
                        "composition difference (added {:?}, removed {:?}) is not a single \
                         vacancy, interstitial or substitution",
                        added, removed
                    ),
                })
            }
        };

        let (defect_index, bulk_index) = match defect_type {
            DefectType::Vacancy => (None, Some(farthest_site(bulk, defect, &element)?)),
            DefectType::Interstitial => (Some(farthest_site(defect, bulk, &element)?), None),
            DefectType::Substitution => {
                let host = host_element.as_deref().unwrap_or_default();
                (
                    Some(farthest_site(defect, bulk, &element)?),
                    Some(farthest_site(bulk, defect, host)?),
                )
            }
        };

        let mapping = self.map_atoms(bulk, defect, defect_index, bulk_index)?;
        let basis_warning = basis_mismatch(bulk, defect, &mapping, defect_index, bulk_index);

        Ok(SiteMatch {
            defect_type,
            element,
            host_element,
            defect_index,
            bulk_index,
            mapping,
            basis_warning,
        })
    }

    /// 将缺陷超胞中除缺陷位点以外的原子映射到最近的同种体相原子
    fn map_atoms(
        &self,
        bulk: &Crystal,
        defect: &Crystal,
        defect_index: Option<usize>,
        bulk_index: Option<usize>,
    ) -> Result<Vec<Option<usize>>> {
        let lattice = &bulk.lattice;
        let mut mapping = vec![None; defect.len()];
        let mut unmatched = 0usize;

        for (i, atom) in defect.atoms.iter().enumerate() {
            if Some(i) == defect_index {
                continue;
            }
            let nearest = bulk
                .atoms
                .iter()
                .enumerate()
                .filter(|(j, b)| Some(*j) != bulk_index && b.element == atom.element)
                .map(|(j, b)| (j, lattice.distance(&b.position, &atom.position)))
                .min_by(|a, b| a.1.total_cmp(&b.1));

            match nearest {
                Some((j, d)) => {
                    if d > self.stol {
                        unmatched += 1;
                    }
                    mapping[i] = Some(j);
                }
                None => unmatched += 1,
            }
        }

        if unmatched * 2 > defect.len() {
            return Err(DefectError::SiteCorrespondence {
                reason: format!(
                    "{} of {} atoms are displaced by more than {:.2} Å from any bulk atom",
                    unmatched,
                    defect.len(),
                    self.stol
                ),
            });
        }
        Ok(mapping)
    }
}

/// 两个超胞的晶格必须基本一致
fn check_lattices(bulk: &Crystal, defect: &Crystal) -> Result<()> {
    let lb = bulk.lattice.lengths();
    let ld = defect.lattice.lengths();
    for i in 0..3 {
        if ((lb[i] - ld[i]) / lb[i]).abs() > LATTICE_RTOL {
            return Err(DefectError::SiteCorrespondence {
                reason: format!(
                    "lattice vector {} differs ({:.3} Å in bulk vs {:.3} Å in defect)",
                    i + 1,
                    lb[i],
                    ld[i]
                ),
            });
        }
    }
    Ok(())
}

/// 组分差异：(缺陷中多出的元素, 缺陷中缺少的元素)
fn composition_difference(
    bulk: &Crystal,
    defect: &Crystal,
) -> (Vec<(String, usize)>, Vec<(String, usize)>) {
    let cb = bulk.composition();
    let cd = defect.composition();
    let mut elements: Vec<&String> = cb.keys().chain(cd.keys()).collect();
    elements.sort();
    elements.dedup();

    let mut added = Vec::new();
    let mut removed = Vec::new();
    for el in elements {
        let nb = cb.get(el).copied().unwrap_or(0);
        let nd = cd.get(el).copied().unwrap_or(0);
        if nd > nb {
            added.push((el.clone(), nd - nb));
        } else if nb > nd {
            removed.push((el.clone(), nb - nd));
        }
    }
    (added, removed)
}

/// `source` 中 `element` 原子里，离 `other` 中同种原子最远的那个
fn farthest_site(source: &Crystal, other: &Crystal, element: &str) -> Result<usize> {
    let lattice = &source.lattice;
    source
        .atoms
        .iter()
        .enumerate()
        .filter(|(_, a)| a.element == element)
        .map(|(i, a)| {
            let nearest = other
                .atoms
                .iter()
                .filter(|b| b.element == element)
                .map(|b| lattice.distance(&a.position, &b.position))
                .fold(f64::INFINITY, f64::min);
            (i, nearest)
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
        .ok_or_else(|| DefectError::SiteCorrespondence {
            reason: format!("no {} atoms to compare", element),
        })
}

/// 检查晶格基矢是否可能不一致，返回提示文本
fn basis_mismatch(
    bulk: &Crystal,
    defect: &Crystal,
    mapping: &[Option<usize>],
    defect_index: Option<usize>,
    bulk_index: Option<usize>,
) -> Option<String> {
    let lattice = &bulk.lattice;
    let site = match (defect_index, bulk_index) {
        (Some(i), _) => defect.atoms[i].position,
        (None, Some(j)) => bulk.atoms[j].position,
        (None, None) => return None,
    };

    // 候选位点到对方结构中所有原子的最小距离
    let isolation = match defect_index {
        Some(_) => bulk
            .atoms
            .iter()
            .enumerate()
            .filter(|(j, _)| Some(*j) != bulk_index)
            .map(|(_, a)| lattice.distance(&a.position, &site))
            .fold(f64::INFINITY, f64::min),
        None => defect
            .atoms
            .iter()
            .map(|a| lattice.distance(&a.position, &site))
            .fold(f64::INFINITY, f64::min),
    };
    let max_nn = bulk.max_nearest_neighbour_distance();
    if max_nn > 0.0 && isolation.is_finite() && isolation > ISOLATED_SITE_FACTOR * max_nn {
        return Some(format!(
            "The detected defect site is {:.2} Å from the nearest atom of the other structure \
             (largest bulk nearest-neighbour distance {:.2} Å). The bulk and defect supercells \
             may not share the same lattice basis.",
            isolation, max_nn
        ));
    }

    // 远场原子的平均位移
    let radius = lattice.inscribed_radius();
    let mut displacements: Vec<f64> = Vec::new();
    for (i, mapped) in mapping.iter().enumerate() {
        let Some(j) = mapped else { continue };
        let pos = defect.atoms[i].position;
        if lattice.distance(&pos, &site) > radius {
            displacements.push(lattice.distance(&pos, &bulk.atoms[*j].position));
        }
    }
    if displacements.is_empty() {
        return None;
    }
    let mean = displacements.iter().sum::<f64>() / displacements.len() as f64;
    if mean > FAR_FIELD_DISPLACEMENT_TOL {
        return Some(format!(
            "Atoms far from the defect are displaced by {:.2} Å on average relative to the bulk \
             supercell. The bulk and defect supercells may not share the same lattice basis.",
            mean
        ));
    }
    None
}

/// 按元素分组的原子索引（供其他几何工具使用）
pub fn indices_by_element(crystal: &Crystal) -> BTreeMap<String, Vec<usize>> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, atom) in crystal.atoms.iter().enumerate() {
        groups.entry(atom.element.clone()).or_default().push(i);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Atom, Lattice};

    /// 2x2x2 常规岩盐 MgO 超胞（32 Mg + 32 O，a = 8.4 Å）
    fn rocksalt_supercell() -> Crystal {
        let mut atoms = Vec::new();
        for i in 0..4 {
            for j in 0..4 {
                for k in 0..4 {
                    let el = if (i + j + k) % 2 == 0 { "Mg" } else { "O" };
                    atoms.push(Atom::new(
                        el,
                        [i as f64 / 4.0, j as f64 / 4.0, k as f64 / 4.0],
                    ));
                }
            }
        }
        Crystal::new("MgO", Lattice::cubic(8.4), atoms)
    }

    #[test]
    fn test_vacancy_located() {
        let bulk = rocksalt_supercell();
        let mut defect = bulk.clone();
        let removed = defect.atoms.remove(1);
        assert_eq!(removed.element, "O");

        let m = StructureMatcher::default().locate(&bulk, &defect).unwrap();
        assert_eq!(m.defect_type, DefectType::Vacancy);
        assert_eq!(m.element, "O");
        assert_eq!(m.defect_index, None);
        assert_eq!(m.bulk_index, Some(1));
        assert!(m.basis_warning.is_none());
    }

    #[test]
    fn test_substitution_located() {
        let bulk = rocksalt_supercell();
        let mut defect = bulk.clone();
        defect.atoms[0].element = "Al".to_string();

        let m = StructureMatcher::default().locate(&bulk, &defect).unwrap();
        assert_eq!(m.defect_type, DefectType::Substitution);
        assert_eq!(m.element, "Al");
        assert_eq!(m.host_element.as_deref(), Some("Mg"));
        assert_eq!(m.defect_index, Some(0));
        assert_eq!(m.bulk_index, Some(0));
        assert_eq!(bulk.atoms[0].position, defect.atoms[0].position);
        assert_ne!(bulk.atoms[0].element, defect.atoms[0].element);
    }

    #[test]
    fn test_interstitial_located_with_relaxation() {
        let bulk = rocksalt_supercell();
        let mut defect = bulk.clone();
        // 周围原子轻微位移
        for atom in defect.atoms.iter_mut().take(4) {
            atom.position[0] += 0.005;
        }
        defect.atoms.push(Atom::new("Mg", [0.125, 0.125, 0.125]));

        let m = StructureMatcher::default().locate(&bulk, &defect).unwrap();
        assert_eq!(m.defect_type, DefectType::Interstitial);
        assert_eq!(m.defect_index, Some(64));
        assert_eq!(m.bulk_index, None);
        assert_eq!(m.mapping[1], Some(1));
    }

    #[test]
    fn test_incompatible_composition_fails() {
        let bulk = rocksalt_supercell();
        let mut defect = bulk.clone();
        defect.atoms.remove(1);
        defect.atoms.remove(1);

        let err = StructureMatcher::default().locate(&bulk, &defect).unwrap_err();
        assert!(matches!(err, DefectError::SiteCorrespondence { .. }));
    }

    #[test]
    fn test_shifted_basis_fails() {
        let bulk = rocksalt_supercell();
        let mut defect = bulk.clone();
        defect.atoms.remove(1);
        // 原点平移 1/8 晶格矢量：所有原子都不再与体相重合
        for atom in defect.atoms.iter_mut() {
            atom.position[0] += 0.125;
            atom.position[1] += 0.125;
        }
        let err = StructureMatcher::default().locate(&bulk, &defect).unwrap_err();
        assert!(matches!(err, DefectError::SiteCorrespondence { .. }));
    }
}
