//! # 点缺陷数据模型
//!
//! 抽象的点缺陷：类型、位点（原胞中的分数坐标）、多重度、等价位点以及氧化态。
//!
//! ## 依赖关系
//! - 被 `analysis/classifier.rs` 创建
//! - 被 `models/entry.rs` 持有

use super::structure::Crystal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 点缺陷类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefectType {
    Vacancy,
    Substitution,
    Interstitial,
}

impl fmt::Display for DefectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefectType::Vacancy => write!(f, "Vacancy"),
            DefectType::Substitution => write!(f, "Substitution"),
            DefectType::Interstitial => write!(f, "Interstitial"),
        }
    }
}

/// 点缺陷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defect {
    pub defect_type: DefectType,

    /// 缺陷位点上的元素（空位为被移除的元素）
    pub element: String,

    /// 被替换的主体元素（仅替位缺陷）
    pub host_element: Option<String>,

    /// 原胞中的规范位点（分数坐标）
    pub site: [f64; 3],

    /// 原胞中的所有对称等价位点，已按规范顺序排序
    pub equivalent_sites: Vec<[f64; 3]>,

    /// 原胞中的多重度（等价位点数）
    pub multiplicity: usize,

    /// 缺陷的形式氧化态
    pub oxidation_state: Option<i32>,

    /// 缺陷所在的原胞
    pub primitive: Crystal,
}

impl Defect {
    /// 缺陷名称：v_O、Mg_Al、Li_i
    pub fn name(&self) -> String {
        match self.defect_type {
            DefectType::Vacancy => format!("v_{}", self.element),
            DefectType::Substitution => format!(
                "{}_{}",
                self.element,
                self.host_element.as_deref().unwrap_or("X")
            ),
            DefectType::Interstitial => format!("{}_i", self.element),
        }
    }

    /// 位点密度（每 Å³），multiplicity / 原胞体积
    pub fn site_density(&self) -> f64 {
        self.multiplicity as f64 / self.primitive.lattice.volume().abs()
    }
}

/// 带符号的电荷后缀：+1、-2、0
pub fn format_charge(charge: i32) -> String {
    if charge > 0 {
        format!("+{}", charge)
    } else {
        charge.to_string()
    }
}
