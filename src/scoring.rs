// 该文件是 Fenjian （分拣） 项目的一部分。
// src/scoring.rs - 回收价值与碳减排估算
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use serde::Serialize;

use crate::model::{MaterialKind, WasteCategory};

/// 回收价值估算结果，(分类, 材质) 的纯函数输出
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactEstimate {
  pub resell_value: f64,
  /// 减排量，单位为克。
  /// 各材质常量沿用既有策略表，按件与按克的口径并不统一，
  /// 扩表时不要假设单位一致。
  pub co2_saved: f64,
  pub resell_places: Vec<&'static str>,
  pub recyclable: bool,
}

/// 固定策略表查询。无 I/O、无模型调用，相同输入永远得到相同输出。
///
/// `material` 仅对 inorganic 有意义；为 `None` 时落入「无机物/未识别」一行。
pub fn score(category: WasteCategory, material: Option<MaterialKind>) -> ImpactEstimate {
  match category {
    WasteCategory::Organic => ImpactEstimate {
      resell_value: 0.0,
      co2_saved: 0.5,
      resell_places: vec!["Compost centers", "Local farms"],
      recyclable: true,
    },
    WasteCategory::Hazardous => ImpactEstimate {
      resell_value: 0.0,
      co2_saved: 0.0,
      resell_places: vec!["Hazardous waste facilities"],
      recyclable: false,
    },
    WasteCategory::Inorganic => match material {
      Some(MaterialKind::PetBottle) => ImpactEstimate {
        resell_value: 1.0,
        co2_saved: 42.5,
        resell_places: vec!["Recycling centers", "eBay", "Scrap dealers"],
        recyclable: true,
      },
      Some(MaterialKind::AluminumCans) => ImpactEstimate {
        resell_value: 1.5,
        co2_saved: 0.12,
        resell_places: vec!["Recycling centers", "Scrap dealers"],
        recyclable: true,
      },
      Some(MaterialKind::CartonBox) => ImpactEstimate {
        resell_value: 7.50,
        co2_saved: 250.0,
        resell_places: vec!["Recycling centers", "Facebook Marketplace"],
        recyclable: true,
      },
      Some(MaterialKind::CartonDrink) => ImpactEstimate {
        resell_value: 4.00,
        co2_saved: 11.0,
        resell_places: vec!["Recycling centers"],
        recyclable: true,
      },
      // 无机物但材质未识别
      None => ImpactEstimate {
        resell_value: 1.0,
        co2_saved: 0.08,
        resell_places: vec!["Recycling centers"],
        recyclable: true,
      },
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn organic_row_matches_policy_table() {
    let estimate = score(WasteCategory::Organic, None);
    assert_eq!(estimate.resell_value, 0.0);
    assert_eq!(estimate.co2_saved, 0.5);
    assert!(estimate.recyclable);
    assert_eq!(estimate.resell_places, vec!["Compost centers", "Local farms"]);
  }

  #[test]
  fn hazardous_row_is_not_recyclable() {
    let estimate = score(WasteCategory::Hazardous, None);
    assert_eq!(estimate.resell_value, 0.0);
    assert_eq!(estimate.co2_saved, 0.0);
    assert!(!estimate.recyclable);
    assert_eq!(estimate.resell_places, vec!["Hazardous waste facilities"]);
  }

  #[test]
  fn unrecognized_inorganic_falls_back_to_generic_row() {
    let estimate = score(WasteCategory::Inorganic, None);
    assert_eq!(estimate.resell_value, 1.0);
    assert_eq!(estimate.co2_saved, 0.08);
    assert!(estimate.recyclable);
    assert_eq!(estimate.resell_places, vec!["Recycling centers"]);
  }

  #[test]
  fn material_rows_match_policy_table() {
    let pet = score(WasteCategory::Inorganic, Some(MaterialKind::PetBottle));
    assert_eq!((pet.resell_value, pet.co2_saved), (1.0, 42.5));
    assert_eq!(pet.resell_places, vec!["Recycling centers", "eBay", "Scrap dealers"]);

    let cans = score(WasteCategory::Inorganic, Some(MaterialKind::AluminumCans));
    assert_eq!((cans.resell_value, cans.co2_saved), (1.5, 0.12));
    assert_eq!(cans.resell_places, vec!["Recycling centers", "Scrap dealers"]);

    let box_ = score(WasteCategory::Inorganic, Some(MaterialKind::CartonBox));
    assert_eq!((box_.resell_value, box_.co2_saved), (7.50, 250.0));
    assert_eq!(box_.resell_places, vec!["Recycling centers", "Facebook Marketplace"]);

    let drink = score(WasteCategory::Inorganic, Some(MaterialKind::CartonDrink));
    assert_eq!((drink.resell_value, drink.co2_saved), (4.00, 11.0));
    assert_eq!(drink.resell_places, vec!["Recycling centers"]);
  }

  #[test]
  fn material_on_non_inorganic_category_is_ignored() {
    // 一级结果不是 inorganic 时不会有二级结果，
    // 即便传入材质也不改变策略表行
    let estimate = score(WasteCategory::Organic, Some(MaterialKind::PetBottle));
    assert_eq!(estimate, score(WasteCategory::Organic, None));
  }

  #[test]
  fn score_is_idempotent() {
    for material in [None, Some(MaterialKind::PetBottle), Some(MaterialKind::CartonBox)] {
      let a = score(WasteCategory::Inorganic, material);
      let b = score(WasteCategory::Inorganic, material);
      assert_eq!(a, b);
    }
  }
}
