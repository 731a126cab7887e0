//! # 单目录缺陷解析
//!
//! 解析一个缺陷计算目录，生成一个 `DefectEntry`：读取能量与结构、识别缺陷、
//! 确定电荷态与名称、比较计算参数，最后运行电荷修正状态机。
//!
//! ## 功能
//! - `BulkData`：体相计算的只读共享数据，平面平均电势按需加载一次
//! - 电荷态来源：显式指定 > OUTCAR (ΣZVAL·n - NELECT) > 目录名后缀
//! - 所有非致命问题以 `ParseWarning` 返回，由调用方汇总
//!
//! ## 依赖关系
//! - 被 `analysis/defects_parser.rs` 调用
//! - 使用 `analysis/classifier.rs`、`analysis/naming.rs`、`analysis/metadata.rs`
//! - 使用 `corrections/` 的修正引擎

use super::classifier::DefectClassifier;
use super::metadata::{volumes_differ, RunConfiguration};
use super::naming::{charge_from_folder_name, entry_name, full_unrelaxed_name};
use super::oxidation::guess_oxidation_states;
use super::ParserConfig;
use crate::batch::ParseWarning;
use crate::corrections::{
    check_entry, error_above_tolerance, CorrectionEngine, PlanarPotentialData, SitePotentialData,
};
use crate::error::{DefectError, Result};
use crate::geometry::{StructureMatcher, SymmetryAnalyzer};
use crate::models::{
    BandEdges, CalculationMetadata, ChargeSource, Crystal, DefectEntry, Dielectric, Lattice,
};
use crate::parsers::locpot::parse_locpot;
use crate::parsers::outcar::{parse_outcar, OutcarData};
use crate::parsers::poscar::parse_poscar_file;
use crate::parsers::{locate_file, parse_error, require_file, CodeBackend, LocatedFile};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ─────────────────────────────────────────────────────────────
// 体相共享数据
// ─────────────────────────────────────────────────────────────

/// 体相电势数据的加载状态
#[derive(Debug, Clone, PartialEq)]
pub enum BulkArtifact<T> {
    /// 体相目录中没有该文件
    Missing,
    Loaded(T),
    /// 文件存在但无法解析
    Failed(String),
}

impl<T> BulkArtifact<T> {
    pub fn loaded(&self) -> Option<&T> {
        match self {
            BulkArtifact::Loaded(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, BulkArtifact::Missing)
    }
}

/// 体相计算数据，在所有工作线程间只读共享
#[derive(Debug)]
pub struct BulkData {
    pub path: PathBuf,
    pub structure: Crystal,
    pub outcar: OutcarData,
    /// 体相超胞总能量 (eV)
    pub energy: f64,
    pub symmetry: SymmetryAnalyzer,
    pub oxidation_states: Option<BTreeMap<String, i32>>,
    pub run_config: RunConfiguration,
    /// 由体相 OUTCAR 占据数确定的带边
    pub band_edges: Option<BandEdges>,
    /// 原子位点静电势 (V)
    pub site_potentials: BulkArtifact<Vec<f64>>,
    /// 加载体相时遇到的多文件提示
    pub notices: Vec<ParseWarning>,
    locpot_path: Option<PathBuf>,
    planar_potentials: OnceLock<BulkArtifact<[Vec<f64>; 3]>>,
}

impl BulkData {
    /// 读取体相计算目录
    pub fn load(dir: &Path, config: &ParserConfig) -> Result<Self> {
        let backend = config.backend;
        let mut notices = Vec::new();

        let outcar_file = require_file(dir, backend.main_output())?;
        let outcar = read_outcar(&outcar_file.path)?;
        let energy = outcar
            .energy
            .ok_or_else(|| parse_error("OUTCAR", &outcar_file.path, "No final energy found"))?;
        push_notice(&mut notices, backend.main_output(), dir, &outcar_file);

        let structure_file = require_file(dir, backend.structure_file())?;
        let structure = parse_poscar_file(&structure_file.path)?;
        push_notice(&mut notices, backend.structure_file(), dir, &structure_file);

        let symmetry = SymmetryAnalyzer::new(&structure, config.symprec)?;
        let oxidation_states =
            guess_oxidation_states(&structure.composition(), &config.oxidation_states);

        let (run_config, ambiguous) = RunConfiguration::load(dir, outcar.potcar_by_element())?;
        for (kind, found) in &ambiguous {
            push_notice(&mut notices, kind, dir, found);
        }

        let band_edges = outcar.band_edges();

        let site_potentials = match outcar.electrostatic_site_potentials() {
            Some(p) if p.len() == structure.len() => BulkArtifact::Loaded(p),
            Some(p) => BulkArtifact::Failed(format!(
                "bulk OUTCAR has {} site potentials for {} atoms",
                p.len(),
                structure.len()
            )),
            None => BulkArtifact::Missing,
        };

        let locpot_path = match locate_file(dir, backend.planar_potential_file())? {
            Some(found) => {
                push_notice(&mut notices, backend.planar_potential_file(), dir, &found);
                Some(found.path)
            }
            None => None,
        };

        Ok(BulkData {
            path: dir.to_path_buf(),
            structure,
            outcar,
            energy,
            symmetry,
            oxidation_states,
            run_config,
            band_edges,
            site_potentials,
            notices,
            locpot_path,
            planar_potentials: OnceLock::new(),
        })
    }

    /// 体相平面平均静电势，首次调用时解析 LOCPOT
    pub fn planar_potentials(&self) -> &BulkArtifact<[Vec<f64>; 3]> {
        self.planar_potentials.get_or_init(|| match &self.locpot_path {
            None => BulkArtifact::Missing,
            Some(path) => match parse_locpot(path) {
                Ok(data) => BulkArtifact::Loaded([
                    data.electrostatic_planar_average(0),
                    data.electrostatic_planar_average(1),
                    data.electrostatic_planar_average(2),
                ]),
                Err(e) => BulkArtifact::Failed(e.to_string()),
            },
        })
    }

    /// 预先加载所有按需加载的数据，使工作线程只读取
    pub fn prewarm(&self) {
        let _ = self.planar_potentials();
    }
}

fn read_outcar(path: &Path) -> Result<OutcarData> {
    let outcar = parse_outcar(path)?;
    if !outcar.is_finished {
        return Err(DefectError::UnfinishedCalculation {
            path: path.display().to_string(),
        });
    }
    Ok(outcar)
}

fn push_notice(notices: &mut Vec<ParseWarning>, kind: &str, dir: &Path, found: &LocatedFile) {
    if found.is_ambiguous() {
        let chosen = found
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        notices.push(ParseWarning::MultipleFiles {
            file_type: kind.to_string(),
            directory: dir.display().to_string(),
            chosen,
        });
    }
}

// ─────────────────────────────────────────────────────────────
// 单目录解析
// ─────────────────────────────────────────────────────────────

/// 单目录解析结果
#[derive(Debug, Clone)]
pub struct ParsedDefect {
    pub entry: DefectEntry,
    pub warnings: Vec<ParseWarning>,
}

/// 单目录解析器
pub struct DefectParser<'a> {
    bulk: &'a BulkData,
    config: &'a ParserConfig,
}

impl<'a> DefectParser<'a> {
    pub fn new(bulk: &'a BulkData, config: &'a ParserConfig) -> Self {
        DefectParser { bulk, config }
    }

    fn backend(&self) -> CodeBackend {
        self.config.backend
    }

    /// 解析 `run_dir` 中的缺陷计算，`folder` 为条目对应的目录名
    pub fn parse(&self, folder: &str, run_dir: &Path) -> Result<ParsedDefect> {
        let backend = self.backend();
        let mut warnings = Vec::new();

        let outcar_file = require_file(run_dir, backend.main_output())?;
        let outcar = read_outcar(&outcar_file.path)?;
        let energy = outcar
            .energy
            .ok_or_else(|| parse_error("OUTCAR", &outcar_file.path, "No final energy found"))?;
        push_notice(&mut warnings, backend.main_output(), run_dir, &outcar_file);

        let structure_file = require_file(run_dir, backend.structure_file())?;
        let structure = parse_poscar_file(&structure_file.path)?;
        push_notice(&mut warnings, backend.structure_file(), run_dir, &structure_file);

        let bulk = self.bulk;
        let defect_volume = structure.lattice.volume().abs();
        let bulk_volume = bulk.structure.lattice.volume().abs();
        if volumes_differ(defect_volume, bulk_volume) {
            warnings.push(ParseWarning::VolumeMismatch {
                defect: defect_volume,
                bulk: bulk_volume,
            });
        }

        let classifier = DefectClassifier::new(
            StructureMatcher::new(self.config.stol),
            &bulk.symmetry,
            bulk.oxidation_states.as_ref(),
        );
        let classification = classifier.classify(&bulk.structure, &structure)?;
        if let Some(reason) = &classification.basis_warning {
            warnings.push(ParseWarning::BasisMismatch(reason.clone()));
        }

        let (charge, charge_source) = self.charge_state(folder, &outcar)?;

        let full_name = full_unrelaxed_name(
            &classification.defect.name(),
            &classification.site_symmetry,
            charge,
        );
        let name = entry_name(folder, charge, &full_name);

        let (run_config, ambiguous) = RunConfiguration::load(run_dir, outcar.potcar_by_element())?;
        for (kind, found) in &ambiguous {
            push_notice(&mut warnings, kind, run_dir, found);
        }
        let parameter_mismatches = run_config.compare(&bulk.run_config);

        let mut entry = DefectEntry {
            name,
            defect: classification.defect.clone(),
            charge_state: charge,
            supercell_energy: energy,
            bulk_energy: bulk.energy,
            corrections: BTreeMap::new(),
            corrections_metadata: BTreeMap::new(),
            metadata: CalculationMetadata {
                defect_path: run_dir.display().to_string(),
                bulk_path: bulk.path.display().to_string(),
                folder: folder.to_string(),
                charge_source,
                dielectric: self.config.dielectric,
                defect_site: classification.defect_site,
                bulk_site: classification.bulk_site,
                defect_site_index: classification.defect_index,
                bulk_site_index: classification.bulk_index,
                bulk_site_symmetry: classification.site_symmetry.clone(),
                nearest_neighbour_distance: classification.nearest_neighbour_distance,
                full_unrelaxed_defect_name: full_name,
                defect_volume,
                bulk_volume,
                parameter_mismatches,
                guessed_defect_displacement: classification.guessed_displacement,
                bulk_band_edges: bulk.band_edges,
            },
            defect_supercell: structure,
            unrelaxed_supercell: classification.unrelaxed.clone(),
            guessed_initial_supercell: classification.guessed_initial.clone(),
        };

        if charge != 0 && !self.config.skip_corrections {
            match self.config.dielectric {
                None => warnings.push(ParseWarning::NoDielectric { charge }),
                Some(dielectric) => {
                    self.apply_corrections(
                        &mut entry,
                        &outcar,
                        &classification.mapping,
                        run_dir,
                        dielectric,
                        &mut warnings,
                    )?;
                }
            }
        }

        Ok(ParsedDefect { entry, warnings })
    }

    /// 电荷态：显式指定 > OUTCAR > 目录名后缀
    fn charge_state(&self, folder: &str, outcar: &OutcarData) -> Result<(i32, ChargeSource)> {
        if let Some(&charge) = self.config.charges.get(folder) {
            return Ok((charge, ChargeSource::Config));
        }
        if let Some(total) = outcar.total_charge() {
            return Ok((total.round() as i32, ChargeSource::Outcar));
        }
        if let Some(charge) = charge_from_folder_name(folder) {
            return Ok((charge, ChargeSource::FolderName));
        }
        Err(DefectError::ChargeStateUnknown {
            folder: folder.to_string(),
            reason: "OUTCAR lacks NELECT/ZVAL and the folder name has no signed charge suffix \
                     (e.g. '_+1'); specify the charge explicitly"
                .to_string(),
        })
    }

    /// 运行电荷修正状态机并做修正后的检查
    fn apply_corrections(
        &self,
        entry: &mut DefectEntry,
        outcar: &OutcarData,
        mapping: &[Option<usize>],
        run_dir: &Path,
        dielectric: Dielectric,
        warnings: &mut Vec<ParseWarning>,
    ) -> Result<()> {
        let bulk = self.bulk;
        let settings = &self.config.corrections;
        let defect_position = entry.metadata.defect_site;

        let defect_potentials = outcar.electrostatic_site_potentials();
        let site = match (&defect_potentials, bulk.site_potentials.loaded()) {
            (Some(defect), Some(bulk_potentials)) => Some(SitePotentialData {
                bulk: &bulk.structure,
                defect: &entry.defect_supercell,
                bulk_potentials,
                defect_potentials: defect,
                mapping,
                defect_position,
            }),
            _ => None,
        };

        let locpot = locate_file(run_dir, self.backend().planar_potential_file())?;
        if let Some(found) = &locpot {
            push_notice(warnings, self.backend().planar_potential_file(), run_dir, found);
        }
        let lattice = entry.defect_supercell.lattice.clone();
        let planar = move || load_planar(bulk, locpot, lattice, defect_position);

        let outcome =
            CorrectionEngine::new(entry.charge_state, dielectric, settings).run(site, planar);
        warnings.extend(outcome.warnings.into_iter().map(ParseWarning::Correction));

        if let Some(result) = outcome.result {
            entry.apply_correction(result);
            if let Some(effective) = outcome.effective_dielectric {
                entry.metadata.dielectric = Some(effective);
            }
        }

        if let Some(w) = error_above_tolerance(entry, settings.error_tolerance) {
            warnings.push(ParseWarning::Correction(w));
        }
        warnings.extend(check_entry(entry).into_iter().map(ParseWarning::Correction));
        Ok(())
    }
}

/// 读取缺陷 LOCPOT 并与体相平面平均电势配对；任一方缺失时返回 None
fn load_planar(
    bulk: &BulkData,
    locpot: Option<LocatedFile>,
    lattice: Lattice,
    defect_position: [f64; 3],
) -> Option<Result<PlanarPotentialData<'_>>> {
    let found = locpot?;
    let bulk_planar = match bulk.planar_potentials() {
        BulkArtifact::Missing => return None,
        BulkArtifact::Failed(reason) => {
            return Some(Err(DefectError::CorrectionFailed {
                scheme: "FNV".to_string(),
                reason: format!("could not read the bulk LOCPOT: {}", reason),
            }))
        }
        BulkArtifact::Loaded(p) => p,
    };
    Some(parse_locpot(&found.path).map(|data| PlanarPotentialData {
        lattice,
        bulk: bulk_planar,
        defect: [
            data.electrostatic_planar_average(0),
            data.electrostatic_planar_average(1),
            data.electrostatic_planar_average(2),
        ],
        defect_position,
    }))
}
