//! # 氧化态猜测
//!
//! 在常见氧化态表中搜索使体相电荷平衡的组合，越常见的氧化态越优先。
//! 用户可以为部分元素指定氧化态，其余元素在约束下继续搜索。
//!
//! ## 依赖关系
//! - 被 `analysis/classifier.rs` 与 `analysis/defect_parser.rs` 使用

use crate::models::DefectType;
use std::collections::BTreeMap;

/// 常见氧化态，按出现频率从高到低排列
const COMMON_OXIDATION_STATES: &[(&str, &[i32])] = &[
    ("H", &[1, -1]),
    ("Li", &[1]),
    ("Be", &[2]),
    ("B", &[3]),
    ("C", &[4, -4, 2]),
    ("N", &[-3, 3, 5]),
    ("O", &[-2]),
    ("F", &[-1]),
    ("Na", &[1]),
    ("Mg", &[2]),
    ("Al", &[3]),
    ("Si", &[4, -4]),
    ("P", &[5, 3, -3]),
    ("S", &[-2, 2, 4, 6]),
    ("Cl", &[-1, 1, 3, 5, 7]),
    ("K", &[1]),
    ("Ca", &[2]),
    ("Sc", &[3]),
    ("Ti", &[4, 3]),
    ("V", &[5, 3, 4]),
    ("Cr", &[3, 6]),
    ("Mn", &[2, 4, 3, 7]),
    ("Fe", &[3, 2]),
    ("Co", &[2, 3]),
    ("Ni", &[2]),
    ("Cu", &[2, 1]),
    ("Zn", &[2]),
    ("Ga", &[3]),
    ("Ge", &[4, 2, -4]),
    ("As", &[-3, 3, 5]),
    ("Se", &[-2, 2, 4, 6]),
    ("Br", &[-1, 1, 3, 5]),
    ("Kr", &[2]),
    ("Rb", &[1]),
    ("Sr", &[2]),
    ("Y", &[3]),
    ("Zr", &[4]),
    ("Nb", &[5]),
    ("Mo", &[6, 4]),
    ("Tc", &[7, 4]),
    ("Ru", &[3, 4]),
    ("Rh", &[3]),
    ("Pd", &[2, 4]),
    ("Ag", &[1]),
    ("Cd", &[2]),
    ("In", &[3]),
    ("Sn", &[4, 2, -4]),
    ("Sb", &[3, 5, -3]),
    ("Te", &[-2, 2, 4, 6]),
    ("I", &[-1, 1, 3, 5, 7]),
    ("Xe", &[2, 4, 6]),
    ("Cs", &[1]),
    ("Ba", &[2]),
    ("La", &[3]),
    ("Ce", &[3, 4]),
    ("Pr", &[3]),
    ("Nd", &[3]),
    ("Pm", &[3]),
    ("Sm", &[3]),
    ("Eu", &[3, 2]),
    ("Gd", &[3]),
    ("Tb", &[3]),
    ("Dy", &[3]),
    ("Ho", &[3]),
    ("Er", &[3]),
    ("Tm", &[3]),
    ("Yb", &[3]),
    ("Lu", &[3]),
    ("Hf", &[4]),
    ("Ta", &[5]),
    ("W", &[6]),
    ("Re", &[4]),
    ("Os", &[4]),
    ("Ir", &[3, 4]),
    ("Pt", &[2, 4]),
    ("Au", &[3]),
    ("Hg", &[1, 2]),
    ("Tl", &[1, 3]),
    ("Pb", &[2, 4]),
    ("Bi", &[3]),
    ("Po", &[-2, 2, 4]),
    ("At", &[-1, 1]),
    ("Rn", &[2]),
    ("Fr", &[1]),
    ("Ra", &[2]),
    ("Ac", &[3]),
    ("Th", &[4]),
    ("Pa", &[5]),
    ("U", &[6]),
    ("Np", &[5]),
    ("Pu", &[4]),
    ("Am", &[3]),
];

/// 单质与稀有气体等没有表项的元素视为 0 价
fn common_states(element: &str) -> &'static [i32] {
    COMMON_OXIDATION_STATES
        .iter()
        .find(|(el, _)| *el == element)
        .map(|(_, states)| *states)
        .unwrap_or(&[0])
}

/// 元素最常见的氧化态
pub fn most_common_state(element: &str) -> i32 {
    common_states(element).first().copied().unwrap_or(0)
}

/// 猜测电荷平衡的体相氧化态
///
/// 单质体相的氧化态为 0；找不到电荷平衡的组合时返回 None。
pub fn guess_oxidation_states(
    composition: &BTreeMap<String, usize>,
    overrides: &BTreeMap<String, i32>,
) -> Option<BTreeMap<String, i32>> {
    if composition.len() == 1 {
        return Some(composition.keys().map(|el| (el.clone(), 0)).collect());
    }

    let elements: Vec<(&String, usize, Vec<i32>)> = composition
        .iter()
        .map(|(el, &count)| {
            let states = match overrides.get(el) {
                Some(&state) => vec![state],
                None => common_states(el).to_vec(),
            };
            (el, count, states)
        })
        .collect();

    let mut best: Option<(usize, Vec<i32>)> = None;
    let mut current = Vec::with_capacity(elements.len());
    search(&elements, 0, 0, 0, &mut current, &mut best);

    best.map(|(_, states)| {
        elements
            .iter()
            .zip(states)
            .map(|((el, _, _), state)| ((*el).clone(), state))
            .collect()
    })
}

/// 深度优先枚举，按氧化态在表中的位置之和打分
fn search(
    elements: &[(&String, usize, Vec<i32>)],
    depth: usize,
    charge: i64,
    score: usize,
    current: &mut Vec<i32>,
    best: &mut Option<(usize, Vec<i32>)>,
) {
    if best.as_ref().is_some_and(|(s, _)| score >= *s) {
        return;
    }
    if depth == elements.len() {
        if charge == 0 {
            *best = Some((score, current.clone()));
        }
        return;
    }
    let (_, count, states) = &elements[depth];
    for (rank, &state) in states.iter().enumerate() {
        current.push(state);
        search(
            elements,
            depth + 1,
            charge + state as i64 * *count as i64,
            score + rank,
            current,
            best,
        );
        current.pop();
    }
}

/// 缺陷的形式氧化态（完全电离时的电荷）
///
/// 空位为 -ox(host)，替位为 ox(dopant) - ox(host)，间隙为 ox(element)。
pub fn defect_oxidation_state(
    defect_type: DefectType,
    element: &str,
    host_element: Option<&str>,
    bulk_states: Option<&BTreeMap<String, i32>>,
) -> Option<i32> {
    let state_of = |el: &str| -> Option<i32> {
        match bulk_states {
            Some(states) => states
                .get(el)
                .copied()
                .or_else(|| Some(most_common_state(el))),
            None => None,
        }
    };

    match defect_type {
        DefectType::Vacancy => state_of(element).map(|ox| -ox),
        DefectType::Substitution => {
            let host = state_of(host_element?)?;
            let dopant = state_of(element)?;
            Some(dopant - host)
        }
        DefectType::Interstitial => match bulk_states {
            Some(states) => Some(
                states
                    .get(element)
                    .copied()
                    .unwrap_or_else(|| most_common_state(element)),
            ),
            None => Some(most_common_state(element)),
        },
    }
}
