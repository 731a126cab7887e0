//! # 几何模块
//!
//! 周期性结构的匹配、对称性与 Voronoi 节点工具。
//!
//! ## 依赖关系
//! - 被 `analysis/classifier.rs` 使用
//! - 使用 `models/structure.rs`
//! - 子模块: matcher, symmetry, voronoi

pub mod matcher;
pub mod symmetry;
pub mod voronoi;

pub use matcher::{SiteMatch, StructureMatcher};
pub use symmetry::{sort_canonical, SymmetryAnalyzer, DEFAULT_SYMPREC};
pub use voronoi::nearest_voronoi_node;
