//! # VASP POSCAR 格式解析器
//!
//! 解析 VASP POSCAR/CONTCAR 文件格式，并可将结构写回 POSCAR。
//!
//! ## POSCAR 格式说明
//! ```text
//! Comment line (structure name)
//! 1.0                    # scaling factor
//! a1 a2 a3               # lattice vector a
//! b1 b2 b3               # lattice vector b
//! c1 c2 c3               # lattice vector c
//! Element1 Element2 ...  # element symbols (VASP 5+)
//! n1 n2 ...              # number of atoms per element
//! Selective dynamics     # optional
//! Direct/Cartesian       # coordinate type
//! x1 y1 z1               # atom positions
//! ...
//! ```
//!
//! ## 依赖关系
//! - 被 `analysis/defect_parser.rs` 与 `commands/parse.rs` 使用
//! - 使用 `models/structure.rs`

use super::{parse_error, read_text};
use crate::error::{DefectError, Result};
use crate::models::{Atom, Crystal, Lattice};
use nalgebra::Vector3;
use std::fs;
use std::path::Path;

/// 解析 POSCAR/CONTCAR 文件（支持 .gz）
pub fn parse_poscar_file(path: &Path) -> Result<Crystal> {
    let content = read_text(path)?;

    parse_poscar_content(&content, &path.display().to_string())
}

/// 从字符串内容解析 POSCAR 格式
///
/// `source` 仅用于错误信息与空注释行时的结构名称。
pub fn parse_poscar_content(content: &str, source: &str) -> Result<Crystal> {
    let lines: Vec<&str> = content.lines().collect();
    let err = |reason: String| parse_error("poscar", Path::new(source), reason);

    if lines.len() < 8 {
        return Err(err("File too short".to_string()));
    }

    // Line 0: Comment/name
    let name = lines[0].trim().to_string();
    let name = if name.is_empty() {
        source.to_string()
    } else {
        name
    };

    // Line 1: Scaling factor（负值表示目标体积）
    let scale: f64 = lines[1]
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| err("Invalid scaling factor".to_string()))?;

    // Lines 2-4: Lattice vectors
    let mut matrix = [[0.0; 3]; 3];
    for i in 0..3 {
        let parts: Vec<f64> = lines[2 + i]
            .split_whitespace()
            .filter_map(|s| s.parse().ok())
            .collect();
        if parts.len() < 3 {
            return Err(err(format!("Invalid lattice vector at line {}", 3 + i)));
        }
        matrix[i] = [parts[0], parts[1], parts[2]];
    }
    let raw = Lattice::from_vectors(matrix);
    let factor = if scale < 0.0 {
        (scale.abs() / raw.volume().abs()).cbrt()
    } else {
        scale
    };
    let lattice = Lattice::from_vectors(matrix.map(|row| row.map(|x| x * factor)));

    // Line 5: Element symbols (VASP 5+)；缺陷分析需要元素信息，不支持 VASP 4
    let line5_parts: Vec<&str> = lines[5].split_whitespace().collect();
    if line5_parts.is_empty() || line5_parts[0].parse::<i32>().is_ok() {
        return Err(err(
            "Element symbols line missing (VASP 4 format is not supported)".to_string(),
        ));
    }
    // POTCAR 风格的 "O_s"、"Fe_pv/..." 只保留元素符号
    let elements: Vec<String> = line5_parts
        .iter()
        .map(|s| {
            s.split(|c: char| c == '_' || c == '/')
                .next()
                .unwrap_or(s)
                .to_string()
        })
        .collect();
    let counts: Vec<usize> = lines[6]
        .split_whitespace()
        .filter_map(|s| s.parse().ok())
        .collect();
    if counts.len() != elements.len() {
        return Err(err(format!(
            "{} element symbols but {} atom counts",
            elements.len(),
            counts.len()
        )));
    }

    // Check for "Selective dynamics" line
    let mut coord_line = 7;
    if lines.len() > coord_line
        && lines[coord_line]
            .trim()
            .to_lowercase()
            .starts_with('s')
    {
        coord_line += 1;
    }

    // Coordinate type line
    if lines.len() <= coord_line {
        return Err(err("Missing coordinate type line".to_string()));
    }

    let coord_type = lines[coord_line].trim().to_lowercase();
    let is_cartesian = coord_type.starts_with('c') || coord_type.starts_with('k');

    // Parse atom positions
    let mut atoms: Vec<Atom> = Vec::new();
    let mut line_idx = coord_line + 1;

    for (elem, &count) in elements.iter().zip(counts.iter()) {
        for _ in 0..count {
            let parts: Vec<f64> = lines
                .get(line_idx)
                .map(|l| {
                    l.split_whitespace()
                        .take(3)
                        .filter_map(|s| s.parse().ok())
                        .collect()
                })
                .unwrap_or_default();

            if parts.len() < 3 {
                return Err(err(format!("Invalid atom position at line {}", line_idx + 1)));
            }
            let position = if is_cartesian {
                let cart = Vector3::new(parts[0], parts[1], parts[2]) * factor;
                lattice.cart_to_frac(&cart)
            } else {
                [parts[0], parts[1], parts[2]]
            };
            atoms.push(Atom::new(elem.clone(), position));
            line_idx += 1;
        }
    }

    Ok(Crystal::new(name, lattice, atoms))
}

/// 将 Crystal 转换为 POSCAR 格式字符串
///
/// 同种元素按首次出现的顺序分组输出。
pub fn to_poscar_string(crystal: &Crystal) -> String {
    let species = crystal.species();

    let mut result = String::new();

    result.push_str(&format!("{}\n", crystal.name));
    result.push_str("1.0\n");

    for row in &crystal.lattice.matrix {
        result.push_str(&format!(
            "  {:16.10}  {:16.10}  {:16.10}\n",
            row[0], row[1], row[2]
        ));
    }

    result.push_str(&format!("   {}\n", species.join("   ")));
    let counts: Vec<String> = species
        .iter()
        .map(|el| {
            crystal
                .atoms
                .iter()
                .filter(|a| &a.element == el)
                .count()
                .to_string()
        })
        .collect();
    result.push_str(&format!("   {}\n", counts.join("   ")));

    result.push_str("Direct\n");

    for el in &species {
        for atom in crystal.atoms.iter().filter(|a| &a.element == el) {
            let p = atom.position;
            result.push_str(&format!(
                "  {:16.10}  {:16.10}  {:16.10}  {}\n",
                p[0], p[1], p[2], el
            ));
        }
    }

    result
}

/// 写出 POSCAR 文件
pub fn write_poscar_file(crystal: &Crystal, path: &Path) -> Result<()> {
    fs::write(path, to_poscar_string(crystal)).map_err(|e| DefectError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_poscar_vasp5() {
        let content = r#"NaCl
1.0
5.64 0.0 0.0
0.0 5.64 0.0
0.0 0.0 5.64
Na Cl
4 4
Direct
0.0 0.0 0.0
0.5 0.5 0.0
0.5 0.0 0.5
0.0 0.5 0.5
0.5 0.0 0.0
0.0 0.5 0.0
0.0 0.0 0.5
0.5 0.5 0.5
"#;
        let crystal = parse_poscar_content(content, "NaCl").unwrap();
        assert_eq!(crystal.name, "NaCl");
        assert_eq!(crystal.atoms.len(), 8);

        let na_count = crystal.atoms.iter().filter(|a| a.element == "Na").count();
        let cl_count = crystal.atoms.iter().filter(|a| a.element == "Cl").count();
        assert_eq!(na_count, 4);
        assert_eq!(cl_count, 4);
    }

    #[test]
    fn test_parse_poscar_with_scale_and_cartesian() {
        let content = r#"Si
2.0
2.0 0.0 0.0
0.0 2.0 0.0
0.0 0.0 2.0
Si
2
Cartesian
0.0 0.0 0.0
1.0 1.0 1.0
"#;
        let crystal = parse_poscar_content(content, "Si").unwrap();
        assert!((crystal.lattice.lengths()[0] - 4.0).abs() < 1e-10);
        // 笛卡尔坐标同样乘以缩放因子：(2, 2, 2) Å -> 0.5
        assert!((crystal.atoms[1].position[0] - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_potcar_style_symbols() {
        let content = "MgO\n1.0\n4.2 0 0\n0 4.2 0\n0 0 4.2\nMg_pv O_s\n1 1\nDirect\n0 0 0\n0.5 0.5 0.5\n";
        let crystal = parse_poscar_content(content, "MgO").unwrap();
        assert_eq!(crystal.species(), vec!["Mg".to_string(), "O".to_string()]);
    }

    #[test]
    fn test_vasp4_rejected() {
        let content = "X\n1.0\n4 0 0\n0 4 0\n0 0 4\n2\nDirect\n0 0 0\n0.5 0.5 0.5\n";
        assert!(parse_poscar_content(content, "X").is_err());
    }

    #[test]
    fn test_poscar_round_trip() {
        let lattice = Lattice::cubic(4.0);
        let atoms = vec![
            Atom::new("Ti", [0.0, 0.0, 0.0]),
            Atom::new("O", [0.5, 0.5, 0.0]),
            Atom::new("O", [0.5, 0.0, 0.5]),
        ];
        let crystal = Crystal::new("TiO2", lattice, atoms);

        let poscar_str = to_poscar_string(&crystal);
        let parsed = parse_poscar_content(&poscar_str, "round_trip").unwrap();

        assert_eq!(parsed.atoms.len(), 3);
        assert_eq!(parsed.composition(), crystal.composition());
    }

    #[test]
    fn test_parse_poscar_selective_dynamics() {
        let content = r#"Fe with selective
1.0
2.87 0.0 0.0
0.0 2.87 0.0
0.0 0.0 2.87
Fe
2
Selective dynamics
Direct
0.0 0.0 0.0 T T T
0.5 0.5 0.5 F F F
"#;
        let crystal = parse_poscar_content(content, "Fe").unwrap();
        assert_eq!(crystal.atoms.len(), 2);
    }
}
