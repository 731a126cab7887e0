//! # VASP LOCPOT 解析器
//!
//! 读取 LOCPOT 中的实空间电势网格，并沿三个晶轴做平面平均。
//! 网格本身不保留，只累加平面平均值，避免大超胞占用过多内存。
//!
//! ## 依赖关系
//! - 被 `analysis/defect_parser.rs`（FNV 修正的电势来源）使用
//! - 使用 `parsers/poscar.rs` 解析结构头

use super::poscar::parse_poscar_content;
use super::{parse_error, read_text};
use crate::error::Result;
use crate::models::Crystal;
use std::path::Path;

/// LOCPOT 平面平均数据
#[derive(Debug, Clone, PartialEq)]
pub struct LocpotData {
    pub structure: Crystal,
    /// FFT 网格 (NGX, NGY, NGZ)
    pub grid: [usize; 3],
    /// 沿 a, b, c 的平面平均值（LOCPOT 原始符号，单位 eV）
    pub planar_averages: [Vec<f64>; 3],
}

impl LocpotData {
    /// 沿 `axis` 的平面平均静电势（已取反，单位 V）
    pub fn electrostatic_planar_average(&self, axis: usize) -> Vec<f64> {
        self.planar_averages[axis].iter().map(|v| -v).collect()
    }
}

/// 解析 LOCPOT 文件（支持 .gz）
pub fn parse_locpot(path: &Path) -> Result<LocpotData> {
    let content = read_text(path)?;
    parse_locpot_content(&content, path)
}

/// 从字符串内容解析 LOCPOT
pub fn parse_locpot_content(content: &str, path: &Path) -> Result<LocpotData> {
    let structure = parse_poscar_content(content, &path.display().to_string())?;

    let lines: Vec<&str> = content.lines().collect();
    let selective = lines
        .get(7)
        .map(|l| l.trim().to_lowercase().starts_with('s'))
        .unwrap_or(false);
    let coords_start = if selective { 9 } else { 8 };
    let mut idx = coords_start + structure.len();

    while idx < lines.len() && lines[idx].trim().is_empty() {
        idx += 1;
    }

    let grid: Vec<usize> = lines
        .get(idx)
        .map(|l| l.split_whitespace().filter_map(|s| s.parse().ok()).collect())
        .unwrap_or_default();
    if grid.len() != 3 || grid.iter().any(|&n| n == 0) {
        return Err(parse_error("LOCPOT", path, "Missing or invalid grid dimensions"));
    }
    let (nx, ny, nz) = (grid[0], grid[1], grid[2]);
    let total = nx * ny * nz;

    let mut sums = [vec![0.0; nx], vec![0.0; ny], vec![0.0; nz]];
    let mut n = 0usize;

    'outer: for line in &lines[idx + 1..] {
        for token in line.split_whitespace() {
            if n == total {
                break 'outer;
            }
            let value: f64 = token.parse().map_err(|_| {
                parse_error("LOCPOT", path, format!("Invalid grid value '{}'", token))
            })?;
            // x 变化最快
            let ix = n % nx;
            let iy = (n / nx) % ny;
            let iz = n / (nx * ny);
            sums[0][ix] += value;
            sums[1][iy] += value;
            sums[2][iz] += value;
            n += 1;
        }
    }

    if n < total {
        return Err(parse_error(
            "LOCPOT",
            path,
            format!("Expected {} grid values, found {}", total, n),
        ));
    }

    let counts = [ny * nz, nx * nz, nx * ny];
    let planar_averages = [0, 1, 2].map(|axis| {
        sums[axis]
            .iter()
            .map(|s| s / counts[axis] as f64)
            .collect::<Vec<f64>>()
    });

    Ok(LocpotData {
        structure,
        grid: [nx, ny, nz],
        planar_averages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 构造一个 2x2x3 网格，值 = ix + 10*iy + 100*iz
    fn sample_locpot() -> String {
        let mut s = String::from(
            "MgO\n1.0\n4.2 0 0\n0 4.2 0\n0 0 4.2\nMg O\n1 1\nDirect\n0 0 0\n0.5 0.5 0.5\n\n   2   2   3\n",
        );
        let mut values = Vec::new();
        for iz in 0..3 {
            for iy in 0..2 {
                for ix in 0..2 {
                    values.push(format!("{:.4}", (ix + 10 * iy + 100 * iz) as f64));
                }
            }
        }
        for chunk in values.chunks(5) {
            s.push_str(&chunk.join(" "));
            s.push('\n');
        }
        // 自旋/增广部分应被忽略
        s.push_str("augmentation occupancies 1 2\n");
        s
    }

    #[test]
    fn test_planar_averages() {
        let data = parse_locpot_content(&sample_locpot(), Path::new("LOCPOT")).unwrap();
        assert_eq!(data.grid, [2, 2, 3]);
        assert_eq!(data.structure.len(), 2);

        // 沿 x：ix + 平均(10*iy) + 平均(100*iz) = ix + 5 + 100
        assert!((data.planar_averages[0][1] - 106.0).abs() < 1e-10);
        // 沿 z：0.5 + 5 + 100*iz
        assert!((data.planar_averages[2][2] - 205.5).abs() < 1e-10);
        assert!((data.electrostatic_planar_average(2)[0] + 5.5).abs() < 1e-10);
    }

    #[test]
    fn test_truncated_grid_is_error() {
        let content = "MgO\n1.0\n4.2 0 0\n0 4.2 0\n0 0 4.2\nMg O\n1 1\nDirect\n0 0 0\n0.5 0.5 0.5\n\n 2 2 2\n1 2 3\n";
        assert!(parse_locpot_content(content, Path::new("LOCPOT")).is_err());
    }
}
