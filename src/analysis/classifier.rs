//! # 缺陷识别
//!
//! 由结构匹配结果构建抽象的点缺陷：类型、原胞中的规范位点、等价位点、多重度、
//! 氧化态，以及未弛豫 / 猜测初始结构。
//!
//! ## 功能
//! - 间隙原子的初始位置：离弛豫位置最近的体相 Voronoi 节点（1 Å 以内才采用）
//! - 位点折叠到原胞并按规范顺序排序等价位点，间隙位点先在 0.2 Å 内对称化
//! - 空位与替位的位点吸附到原胞原子上
//!
//! ## 依赖关系
//! - 被 `analysis/defect_parser.rs` 调用
//! - 使用 `geometry/` 的匹配、对称性与 Voronoi 工具

use super::oxidation::defect_oxidation_state;
use crate::error::Result;
use crate::geometry::{nearest_voronoi_node, StructureMatcher, SymmetryAnalyzer};
use crate::models::{Atom, Crystal, Defect, DefectType};
use std::collections::BTreeMap;

/// Voronoi 节点被接受为初始位置的最大距离 (Å)
const VORONOI_ACCEPT_DISTANCE: f64 = 1.0;

/// 间隙位点对称化时的容差 (Å)
const INTERSTITIAL_SYMMETRIZE_TOL: f64 = 0.2;

/// 与位点重合的原子在最近邻统计中被忽略 (Å)
const COINCIDENT_TOL: f64 = 0.01;

/// 识别结果
#[derive(Debug, Clone)]
pub struct Classification {
    pub defect: Defect,
    /// 缺陷超胞中的缺陷位点（空位取体相位点）
    pub defect_site: [f64; 3],
    /// 体相参考位点（间隙取接受的 Voronoi 节点或弛豫位置）
    pub bulk_site: [f64; 3],
    pub defect_index: Option<usize>,
    pub bulk_index: Option<usize>,
    /// 缺陷原子索引 -> 体相原子索引
    pub mapping: Vec<Option<usize>>,
    /// 未弛豫位点的点群
    pub site_symmetry: String,
    pub nearest_neighbour_distance: Option<f64>,
    /// 未弛豫结构（间隙原子在弛豫位置）
    pub unrelaxed: Crystal,
    /// 猜测的初始结构（间隙原子在 Voronoi 节点）
    pub guessed_initial: Crystal,
    /// 猜测初始位点到弛豫位点的距离 (Å)，空位为 None
    pub guessed_displacement: Option<f64>,
    pub basis_warning: Option<String>,
}

/// 缺陷识别器，持有体相的对称性信息与氧化态
pub struct DefectClassifier<'a> {
    matcher: StructureMatcher,
    symmetry: &'a SymmetryAnalyzer,
    oxidation_states: Option<&'a BTreeMap<String, i32>>,
}

impl<'a> DefectClassifier<'a> {
    pub fn new(
        matcher: StructureMatcher,
        symmetry: &'a SymmetryAnalyzer,
        oxidation_states: Option<&'a BTreeMap<String, i32>>,
    ) -> Self {
        DefectClassifier {
            matcher,
            symmetry,
            oxidation_states,
        }
    }

    /// 比较体相与缺陷超胞，识别缺陷
    pub fn classify(&self, bulk: &Crystal, defect: &Crystal) -> Result<Classification> {
        let site_match = self.matcher.locate(bulk, defect)?;
        let element = site_match.element.clone();

        let (defect_site, bulk_site, guessed_site) = match site_match.defect_type {
            DefectType::Vacancy => {
                let j = site_match.bulk_index.unwrap_or_default();
                let site = bulk.atoms[j].position;
                (site, site, site)
            }
            DefectType::Substitution => {
                let i = site_match.defect_index.unwrap_or_default();
                let j = site_match.bulk_index.unwrap_or_default();
                let site = bulk.atoms[j].position;
                (defect.atoms[i].position, site, site)
            }
            DefectType::Interstitial => {
                let i = site_match.defect_index.unwrap_or_default();
                let relaxed = defect.atoms[i].position;
                let node = nearest_voronoi_node(bulk, &relaxed);
                let accepted = node
                    .filter(|n| bulk.lattice.distance(n, &relaxed) <= VORONOI_ACCEPT_DISTANCE)
                    .unwrap_or(relaxed);
                (relaxed, accepted, node.unwrap_or(relaxed))
            }
        };

        let build = |site: [f64; 3]| {
            unrelaxed_structure(
                bulk,
                site_match.defect_type,
                &element,
                site_match.bulk_index,
                site_match.defect_index,
                site,
            )
        };
        let unrelaxed = build(defect_site);
        let guessed_initial = build(guessed_site);
        let guessed_displacement = match site_match.defect_type {
            DefectType::Vacancy => None,
            _ => Some(bulk.lattice.distance(&defect_site, &guessed_site)),
        };

        // 原胞中的规范位点
        let primitive_site = match site_match.defect_type {
            DefectType::Vacancy => {
                let folded = self.symmetry.to_primitive_frac(&bulk.lattice, &bulk_site);
                self.symmetry.snap_to_atom(&element, &folded)
            }
            DefectType::Substitution => {
                let folded = self.symmetry.to_primitive_frac(&bulk.lattice, &bulk_site);
                let host = site_match.host_element.as_deref().unwrap_or_default();
                self.symmetry.snap_to_atom(host, &folded)
            }
            DefectType::Interstitial => {
                let folded = self.symmetry.to_primitive_frac(&bulk.lattice, &defect_site);
                self.symmetry.symmetrize_site(&folded, INTERSTITIAL_SYMMETRIZE_TOL)
            }
        };
        let equivalent_sites = self.symmetry.equivalent_sites(&primitive_site);
        let site = equivalent_sites.first().copied().unwrap_or(primitive_site);
        let site_symmetry = self.symmetry.site_symmetry(&primitive_site);

        let skip = match site_match.defect_type {
            DefectType::Interstitial => None,
            _ => site_match.bulk_index,
        };
        let nearest_neighbour_distance = nearest_neighbour(bulk, &bulk_site, skip);

        let oxidation_state = defect_oxidation_state(
            site_match.defect_type,
            &element,
            site_match.host_element.as_deref(),
            self.oxidation_states,
        );

        let defect_record = Defect {
            defect_type: site_match.defect_type,
            element,
            host_element: site_match.host_element.clone(),
            site,
            multiplicity: equivalent_sites.len().max(1),
            equivalent_sites,
            oxidation_state,
            primitive: self.symmetry.primitive.clone(),
        };

        Ok(Classification {
            defect: defect_record,
            defect_site,
            bulk_site,
            defect_index: site_match.defect_index,
            bulk_index: site_match.bulk_index,
            mapping: site_match.mapping,
            site_symmetry,
            nearest_neighbour_distance,
            unrelaxed,
            guessed_initial,
            guessed_displacement,
            basis_warning: site_match.basis_warning,
        })
    }
}

/// 由体相超胞构建未弛豫的缺陷超胞
fn unrelaxed_structure(
    bulk: &Crystal,
    defect_type: DefectType,
    element: &str,
    bulk_index: Option<usize>,
    defect_index: Option<usize>,
    site: [f64; 3],
) -> Crystal {
    let mut atoms = bulk.atoms.clone();
    match defect_type {
        DefectType::Vacancy => {
            if let Some(j) = bulk_index {
                atoms.remove(j);
            }
        }
        DefectType::Substitution => {
            if let Some(j) = bulk_index {
                atoms[j].element = element.to_string();
            }
        }
        DefectType::Interstitial => {
            let at = defect_index.unwrap_or(atoms.len()).min(atoms.len());
            atoms.insert(at, Atom::new(element, site));
        }
    }
    let mut crystal = Crystal::new(bulk.name.clone(), bulk.lattice.clone(), atoms);
    crystal.name = crystal.formula();
    crystal
}

/// 位点到最近原子的距离，忽略索引 `skip` 与重合的原子
fn nearest_neighbour(crystal: &Crystal, site: &[f64; 3], skip: Option<usize>) -> Option<f64> {
    crystal
        .atoms
        .iter()
        .enumerate()
        .filter(|(j, _)| Some(*j) != skip)
        .map(|(_, a)| crystal.lattice.distance(&a.position, site))
        .filter(|d| *d > COINCIDENT_TOL)
        .min_by(|a, b| a.total_cmp(b))
}
