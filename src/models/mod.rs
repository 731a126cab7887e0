//! # 数据模型模块
//!
//! 定义超胞结构、介电张量、点缺陷与缺陷条目的数据模型。
//!
//! ## 依赖关系
//! - 被 `parsers/`、`geometry/`、`corrections/`、`analysis/`、`commands/` 使用
//! - 子模块: structure, dielectric, defect, entry

pub mod defect;
pub mod dielectric;
pub mod entry;
pub mod structure;

pub use defect::{format_charge, Defect, DefectType};
pub use dielectric::Dielectric;
pub use entry::{
    BandEdges, CalculationMetadata, ChargeSource, CorrectionDiagnostics, CorrectionResult, CorrectionScheme,
    DefectArchive, DefectEntry, ParameterMismatch, PlanarAxis, SitePotential,
};
pub use structure::{wrap_frac, Atom, Crystal, Lattice};
