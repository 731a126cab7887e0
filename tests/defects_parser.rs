//! 批量解析的端到端测试：在临时目录中构造岩盐 MgO 的体相与缺陷计算。

use defectkit::analysis::{
    ArchiveTarget, BulkArtifact, BulkData, DefectParser, DefectsParser, ParsedBatch, ParserConfig,
};
use defectkit::batch::ParseWarning;
use defectkit::corrections::CorrectionWarning;
use defectkit::models::{
    Atom, BandEdges, ChargeSource, CorrectionDiagnostics, Crystal, DefectArchive, DefectType,
    Dielectric, Lattice,
};
use defectkit::parsers::poscar::to_poscar_string;
use defectkit::DefectError;

use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// 2x2x2 常规岩盐 MgO 超胞（32 Mg + 32 O，a = 8.4 Å）
fn rocksalt() -> Crystal {
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

/// 去掉 (0, 0, 0.25) 处的 O
fn oxygen_vacancy() -> Crystal {
    let mut crystal = rocksalt();
    crystal.atoms.remove(1);
    crystal
}

fn potcar(element: &str) -> (&'static str, f64) {
    match element {
        "Mg" => ("PAW_PBE Mg_pv 13Apr2007", 8.0),
        "O" => ("PAW_PBE O 08Apr2002", 6.0),
        "Al" => ("PAW_PBE Al 04Jan2001", 3.0),
        other => panic!("no test POTCAR for {}", other),
    }
}

/// 含完成标志、能量、NELECT/ZVAL 与可选位点电势的最小 OUTCAR
fn outcar_text(crystal: &Crystal, energy: f64, charge: i32, potentials: Option<&[f64]>) -> String {
    let species = crystal.species();
    let counts: Vec<usize> = species
        .iter()
        .map(|el| crystal.atoms.iter().filter(|a| &a.element == el).count())
        .collect();

    let mut text = String::new();
    for el in &species {
        text.push_str(&format!("   TITEL  = {}\n", potcar(el).0));
    }
    let zvals: Vec<String> = species.iter().map(|el| format!("{:.2}", potcar(el).1)).collect();
    text.push_str(&format!("   ZVAL   =  {}\n", zvals.join("  ")));
    let ions: Vec<String> = counts.iter().map(|n| n.to_string()).collect();
    text.push_str(&format!("   ions per type =   {}\n", ions.join("  ")));
    let valence: f64 = species
        .iter()
        .zip(&counts)
        .map(|(el, n)| potcar(el).1 * *n as f64)
        .sum();
    text.push_str(&format!(
        "   NELECT =     {:.4}    total number of electrons\n\n",
        valence - charge as f64
    ));

    if let Some(potentials) = potentials {
        text.push_str(" average (electrostatic) potential at core\n");
        text.push_str("  the test charge radii are     0.7215  0.7215\n");
        text.push_str("  (the norm of the test charge is              1.0000)\n");
        for (row, chunk) in potentials.chunks(5).enumerate() {
            let line: Vec<String> = chunk
                .iter()
                .enumerate()
                .map(|(k, v)| format!("{:>8} {:.4}", row * 5 + k + 1, v))
                .collect();
            text.push_str(&line.join(" "));
            text.push('\n');
        }
        text.push('\n');
    }

    text.push_str(&format!(
        "  energy  without entropy=     {:.6}  energy(sigma->0) =     {:.6}\n",
        energy, energy
    ));
    text.push_str(" General timing and accounting informations for this job:\n");
    text
}

fn write_calc(dir: &Path, crystal: &Crystal, energy: f64, charge: i32, potentials: Option<&[f64]>) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("CONTCAR"), to_poscar_string(crystal)).unwrap();
    fs::write(dir.join("OUTCAR"), outcar_text(crystal, energy, charge, potentials)).unwrap();
}

fn write_bulk(root: &Path) {
    write_calc(&root.join("bulk"), &rocksalt(), -380.0, 0, None);
}

/// 网格上处处相同的 LOCPOT（VASP 原始符号）
fn write_locpot(dir: &Path, crystal: &Crystal, value: f64) {
    const GRID: usize = 12;
    let mut text = to_poscar_string(crystal);
    text.push_str(&format!("\n {} {} {}\n", GRID, GRID, GRID));
    let values: Vec<String> = (0..GRID.pow(3)).map(|_| format!("{:.5}", value)).collect();
    for chunk in values.chunks(5) {
        text.push_str(&chunk.join(" "));
        text.push('\n');
    }
    fs::write(dir.join("LOCPOT"), text).unwrap();
}

/// 在 OUTCAR 开头加入一个 k 点的能级表
fn prepend_eigenvalues(dir: &Path, levels: &[(f64, f64)]) {
    let mut text = String::from(" E-fermi :   4.0000     XC(G=0): -10.0000\n\n");
    text.push_str(" k-point     1 :       0.0000    0.0000    0.0000\n");
    text.push_str("  band No.  band energies     occupation\n");
    for (k, (energy, occupation)) in levels.iter().enumerate() {
        text.push_str(&format!("{:>7} {:>12.4} {:>12.5}\n", k + 1, energy, occupation));
    }
    text.push('\n');
    let path = dir.join("OUTCAR");
    let rest = fs::read_to_string(&path).unwrap();
    fs::write(&path, text + &rest).unwrap();
}

fn anisotropic() -> Dielectric {
    Dielectric::diagonal([8.0, 10.0, 12.0])
}

fn has_collapse_warning(warnings: &[ParseWarning]) -> bool {
    warnings.iter().any(|w| {
        matches!(
            w,
            ParseWarning::Correction(CorrectionWarning::AnisotropicCollapsed { .. })
        )
    })
}

fn quiet_config() -> ParserConfig {
    ParserConfig::new()
        .with_progress(false)
        .with_processes(2)
        .with_archive(ArchiveTarget::Disabled)
}

fn parse(root: &Path, config: ParserConfig) -> ParsedBatch {
    DefectsParser::new(root, config).parse().unwrap()
}

fn count_containing(warnings: &[String], needle: &str) -> usize {
    warnings.iter().filter(|w| w.contains(needle)).count()
}

#[test]
fn test_duplicate_energies_keep_one_entry() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write_bulk(root);
    write_calc(&root.join("V_O_0"), &oxygen_vacancy(), -370.0, 0, None);
    write_calc(&root.join("V_O_+1"), &oxygen_vacancy(), -372.5, 1, None);
    write_calc(&root.join("V_O_+1_dup"), &oxygen_vacancy(), -372.5, 1, None);

    let batch = parse(root, quiet_config());

    let names: Vec<&str> = batch.entries.keys().map(String::as_str).collect();
    assert_eq!(names, ["V_O_+1", "V_O_0"]);
    assert_eq!(batch.entries["V_O_+1"].metadata.folder, "V_O_+1");
    assert_eq!(batch.entries["V_O_+1"].charge_state, 1);
    assert_eq!(batch.entries["V_O_0"].charge_state, 0);
    assert_eq!(batch.subfolder, ".");
    assert_eq!(count_containing(&batch.warnings, "duplicates"), 1);
    // 只有重复组提示提到被丢弃的目录，其自身的逐目录提示不再输出
    assert_eq!(count_containing(&batch.warnings, "V_O_+1_dup"), 1);
    assert!(batch
        .warnings
        .iter()
        .all(|w| !(w.contains("V_O_+1_dup") && w.contains("dielectric constant"))));
}

#[test]
fn test_vacancy_and_substitution_classified() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write_bulk(root);
    write_calc(&root.join("v_O_0"), &oxygen_vacancy(), -370.0, 0, None);

    let mut substituted = rocksalt();
    substituted.atoms[0].element = "Al".to_string();
    write_calc(&root.join("Al_on_Mg"), &substituted, -379.0, 0, None);

    let batch = parse(root, quiet_config());
    assert_eq!(batch.entries.len(), 2);

    let vacancy = &batch.entries["v_O_0"];
    assert_eq!(vacancy.defect.defect_type, DefectType::Vacancy);
    assert_eq!(vacancy.defect.element, "O");
    assert_eq!(vacancy.metadata.defect_site_index, None);
    assert!(vacancy.metadata.bulk_site_index.is_some());
    assert_eq!(vacancy.metadata.bulk_site_symmetry, "Oh");
    assert_eq!(vacancy.metadata.full_unrelaxed_defect_name, "v_O_Oh_0");
    assert!((vacancy.energy_difference() - 10.0).abs() < 1e-9);

    let substitution = &batch.entries["Al_on_Mg_0"];
    assert_eq!(substitution.defect.defect_type, DefectType::Substitution);
    assert_eq!(substitution.defect.name(), "Al_Mg");
    assert_eq!(substitution.defect_supercell.len(), 64);
    assert_eq!(substitution.metadata.charge_source, ChargeSource::Outcar);
}

#[test]
fn test_charged_defect_without_dielectric_is_kept() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write_bulk(root);
    write_calc(&root.join("v_O_+1"), &oxygen_vacancy(), -372.5, 1, None);

    let batch = parse(root, quiet_config());

    let entry = &batch.entries["v_O_+1"];
    assert!(entry.corrections.is_empty());
    assert_eq!(count_containing(&batch.warnings, "dielectric constant"), 1);
}

#[test]
fn test_site_potential_correction_error_above_tolerance() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();

    let bulk_potentials = vec![-40.0; 64];
    write_calc(&root.join("bulk"), &rocksalt(), -380.0, 0, Some(bulk_potentials.as_slice()));
    // 交替的 ±1 V 扰动使位点电势差有明显的离散
    let defect_potentials: Vec<f64> = (0..63)
        .map(|i| if i % 2 == 0 { -41.0 } else { -39.0 })
        .collect();
    write_calc(
        &root.join("v_O_+1"),
        &oxygen_vacancy(),
        -372.5,
        1,
        Some(defect_potentials.as_slice()),
    );

    let config = quiet_config()
        .with_dielectric(Dielectric::scalar(10.0))
        .with_error_tolerance(0.05);
    let batch = parse(root, config);

    let entry = &batch.entries["v_O_+1"];
    assert!(entry.corrections.contains_key("kumagai_charge_correction"));
    let error = entry.charge_correction().unwrap().estimated_error;
    assert!(error > 0.05);

    let tolerance_warnings: Vec<&String> = batch
        .warnings
        .iter()
        .filter(|w| w.contains("error_tolerance"))
        .collect();
    assert_eq!(tolerance_warnings.len(), 1);
    assert!(tolerance_warnings[0].contains(&format!("v_O_+1: {:.3} eV", error)));
}

#[test]
fn test_run_subfolders_and_charge_override() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write_calc(&root.join("bulk").join("vasp_std"), &rocksalt(), -380.0, 0, None);
    write_calc(&root.join("v_O").join("vasp_std"), &oxygen_vacancy(), -371.0, 0, None);
    write_calc(&root.join("v_O").join("vasp_gam"), &oxygen_vacancy(), -300.0, 0, None);

    let config = quiet_config().with_charge("v_O", 2).with_skip_corrections(true);
    let batch = parse(root, config);

    assert_eq!(batch.subfolder, "vasp_std");
    assert!(batch.bulk_path.ends_with("bulk/vasp_std"));
    let entry = &batch.entries["v_O_+2"];
    assert_eq!(entry.charge_state, 2);
    assert_eq!(entry.metadata.charge_source, ChargeSource::Config);
    assert_eq!(entry.supercell_energy, -371.0);
    assert_eq!(count_containing(&batch.warnings, "dielectric constant"), 0);
}

#[test]
fn test_failed_folder_is_skipped_with_warning() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write_bulk(root);
    write_calc(&root.join("v_O_0"), &oxygen_vacancy(), -370.0, 0, None);
    write_calc(&root.join("v_Mg_0"), &oxygen_vacancy(), -369.0, 0, None);
    fs::remove_file(root.join("v_Mg_0").join("CONTCAR")).unwrap();

    let batch = parse(root, quiet_config());
    assert_eq!(batch.entries.len(), 1);
    assert_eq!(
        count_containing(&batch.warnings, "Parsing failed for defect v_Mg_0 with error"),
        1
    );
}

#[test]
fn test_no_entries_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write_bulk(root);
    write_calc(&root.join("v_O_0"), &oxygen_vacancy(), -370.0, 0, None);
    fs::remove_file(root.join("v_O_0").join("CONTCAR")).unwrap();

    let result = DefectsParser::new(root, quiet_config()).parse();
    assert!(matches!(result, Err(DefectError::NoEntriesParsed { .. })));
}

#[test]
fn test_ambiguous_bulk_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write_calc(&root.join("bulk_a"), &rocksalt(), -380.0, 0, None);
    write_calc(&root.join("bulk_b"), &rocksalt(), -380.0, 0, None);
    write_calc(&root.join("v_O_0"), &oxygen_vacancy(), -370.0, 0, None);

    let result = DefectsParser::new(root, quiet_config()).parse();
    assert!(matches!(result, Err(DefectError::AmbiguousBulk { .. })));
}

#[test]
fn test_archive_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write_bulk(root);
    write_calc(&root.join("V_O_0"), &oxygen_vacancy(), -370.0, 0, None);
    write_calc(&root.join("V_O_+1"), &oxygen_vacancy(), -372.5, 1, None);

    let config = quiet_config().with_archive(ArchiveTarget::Default);
    let batch = parse(root, config);

    let path = batch.archive_path.clone().unwrap();
    assert_eq!(path, root.join("MgO_defect_dict.json.gz"));
    let loaded = DefectArchive::load(&path).unwrap();
    assert_eq!(loaded.len(), batch.entries.len());
    for (name, entry) in &batch.entries {
        let reloaded = &loaded.entries[name];
        assert_eq!(reloaded.charge_state, entry.charge_state);
        assert_eq!(reloaded.corrections, entry.corrections);
        assert_eq!(reloaded.supercell_energy, entry.supercell_energy);
    }
}

#[test]
fn test_archive_roundtrip_keeps_correction_metadata() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let bulk_potentials = vec![-40.0; 64];
    write_calc(&root.join("bulk"), &rocksalt(), -380.0, 0, Some(bulk_potentials.as_slice()));
    let defect_potentials: Vec<f64> = (0..63).map(|i| -40.0 - 0.02 * (i % 4) as f64).collect();
    write_calc(
        &root.join("v_O_+2"),
        &oxygen_vacancy(),
        -375.0,
        2,
        Some(defect_potentials.as_slice()),
    );

    let path = root.join("corrected.json.gz");
    let config = quiet_config()
        .with_dielectric(Dielectric::scalar(10.0))
        .with_archive(ArchiveTarget::Path(path.clone()));
    let batch = parse(root, config);

    let entry = &batch.entries["v_O_+2"];
    assert_eq!(entry.corrections_metadata.len(), 1);
    let loaded = DefectArchive::load(&path).unwrap();
    let reloaded = &loaded.entries["v_O_+2"];
    assert_eq!(reloaded.corrections_metadata, entry.corrections_metadata);
    assert_eq!(reloaded.metadata, entry.metadata);
    assert_eq!(reloaded.total_correction(), entry.total_correction());
}

#[test]
fn test_planar_potential_correction_with_anisotropic_dielectric() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write_bulk(root);
    write_locpot(&root.join("bulk"), &rocksalt(), 5.0);
    // 没有位点电势，只能使用 LOCPOT
    write_calc(&root.join("v_O_+1"), &oxygen_vacancy(), -372.5, 1, None);
    write_locpot(&root.join("v_O_+1"), &oxygen_vacancy(), 4.0);

    let batch = parse(root, quiet_config().with_dielectric(anisotropic()));

    let entry = &batch.entries["v_O_+1"];
    assert!(entry.corrections.contains_key("freysoldt_charge_correction"));
    let harmonic_mean = anisotropic().harmonic_mean();
    assert_eq!(entry.metadata.dielectric, Some(Dielectric::scalar(harmonic_mean)));

    let result = entry.charge_correction().unwrap();
    match &result.diagnostics {
        CorrectionDiagnostics::PlanarPotential {
            lattice_energy,
            dielectric,
            axes,
        } => {
            assert!((dielectric - harmonic_mean).abs() < 1e-12);
            assert_eq!(axes.len(), 3);
            // 电势取反后 缺陷 - 体相 = (-4) - (-5) = +1 V
            for axis in axes {
                assert!(axis.potential_difference.iter().all(|v| (v - 1.0).abs() < 1e-9));
            }
            let alignment = axes.iter().map(|a| a.alignment).sum::<f64>() / 3.0;
            assert!((result.correction_energy - (lattice_energy + alignment)).abs() < 1e-12);
        }
        other => panic!("unexpected diagnostics: {:?}", other),
    }
    assert_eq!(count_containing(&batch.warnings, "harmonic mean of the diagonal"), 1);
}

#[test]
fn test_bulk_planar_potential_loaded_once_and_negated() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write_bulk(root);
    write_locpot(&root.join("bulk"), &rocksalt(), 5.0);
    let run_dir = root.join("v_O_+1");
    write_calc(&run_dir, &oxygen_vacancy(), -372.5, 1, None);
    write_locpot(&run_dir, &oxygen_vacancy(), 4.0);

    let config = quiet_config().with_dielectric(anisotropic());
    let bulk = BulkData::load(&root.join("bulk"), &config).unwrap();
    assert!(bulk.site_potentials.is_missing());

    let parsed = DefectParser::new(&bulk, &config).parse("v_O_+1", &run_dir).unwrap();
    assert!(parsed
        .entry
        .corrections
        .contains_key("freysoldt_charge_correction"));
    assert!(has_collapse_warning(&parsed.warnings));

    // 解析缺陷时已加载，prewarm 不再重新读取
    let first = bulk.planar_potentials() as *const BulkArtifact<[Vec<f64>; 3]>;
    bulk.prewarm();
    assert!(std::ptr::eq(first, bulk.planar_potentials()));
    match bulk.planar_potentials() {
        BulkArtifact::Loaded(axes) => {
            for axis in axes {
                assert_eq!(axis.len(), 12);
                assert!(axis.iter().all(|v| (v + 5.0).abs() < 1e-9));
            }
        }
        other => panic!("bulk LOCPOT not loaded: {:?}", other),
    }

    let without_locpot = root.join("bulk_plain");
    write_calc(&without_locpot, &rocksalt(), -380.0, 0, None);
    let plain = BulkData::load(&without_locpot, &config).unwrap();
    plain.prewarm();
    assert!(plain.planar_potentials().is_missing());
}

#[test]
fn test_site_potential_correction_keeps_anisotropic_tensor() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let bulk_potentials = vec![-40.0; 64];
    write_calc(&root.join("bulk"), &rocksalt(), -380.0, 0, Some(bulk_potentials.as_slice()));
    write_locpot(&root.join("bulk"), &rocksalt(), 5.0);
    let defect_potentials: Vec<f64> = (0..63).map(|i| -40.0 - 0.01 * (i % 3) as f64).collect();
    let run_dir = root.join("v_O_+1");
    write_calc(&run_dir, &oxygen_vacancy(), -372.5, 1, Some(defect_potentials.as_slice()));
    write_locpot(&run_dir, &oxygen_vacancy(), 4.0);

    let config = quiet_config().with_dielectric(anisotropic());
    let bulk = BulkData::load(&root.join("bulk"), &config).unwrap();
    let parsed = DefectParser::new(&bulk, &config).parse("v_O_+1", &run_dir).unwrap();

    let entry = &parsed.entry;
    assert!(entry.corrections.contains_key("kumagai_charge_correction"));
    assert!(!entry.corrections.contains_key("freysoldt_charge_correction"));
    assert_eq!(entry.metadata.dielectric, Some(anisotropic()));
    assert!(!has_collapse_warning(&parsed.warnings));
}

#[test]
fn test_bulk_band_edges_recorded() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write_bulk(root);
    prepend_eigenvalues(
        &root.join("bulk"),
        &[(-12.0, 2.0), (3.25, 2.0), (8.75, 0.0), (10.5, 0.0)],
    );
    write_calc(&root.join("v_O_0"), &oxygen_vacancy(), -370.0, 0, None);

    let batch = parse(root, quiet_config());

    let expected = BandEdges {
        vbm: 3.25,
        cbm: 8.75,
        band_gap: 5.5,
    };
    assert_eq!(batch.band_edges, Some(expected));
    let entry = &batch.entries["v_O_0"];
    assert_eq!(entry.metadata.bulk_band_edges, Some(expected));
    assert_eq!(entry.metadata.guessed_defect_displacement, None);
}

#[test]
fn test_reparsing_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let bulk_potentials = vec![-40.0; 64];
    write_calc(&root.join("bulk"), &rocksalt(), -380.0, 0, Some(bulk_potentials.as_slice()));
    let defect_potentials: Vec<f64> = (0..63).map(|i| -40.0 - 0.01 * (i % 3) as f64).collect();
    for (folder, energy, charge) in [("v_O_+1", -372.5, 1), ("v_O_+2", -375.0, 2), ("v_O_0", -370.0, 0)] {
        write_calc(
            &root.join(folder),
            &oxygen_vacancy(),
            energy,
            charge,
            Some(defect_potentials.as_slice()),
        );
    }

    let config = quiet_config().with_dielectric(Dielectric::diagonal([10.0, 10.0, 12.0]));
    let first = parse(root, config.clone());
    let second = parse(root, config);

    assert_eq!(
        first.entries.keys().collect::<Vec<_>>(),
        second.entries.keys().collect::<Vec<_>>()
    );
    for (name, entry) in &first.entries {
        assert_eq!(entry.corrections, second.entries[name].corrections);
    }
    assert_eq!(first.warnings, second.warnings);
}
