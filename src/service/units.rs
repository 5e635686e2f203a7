use crate::service::Taxonomy;
use bigdecimal::{BigDecimal, Zero};

/// 标准化数量 = 数量 × 换算系数
///
/// 引擎不理解物理单位，只信任分类来源给出的系数。源单位缺失、系数缺失或
/// 系数 <= 0 时返回 `None`，由调用方标记待审核。
pub fn standardize(
    quantity: &BigDecimal,
    source_unit: Option<&str>,
    conversion_factor: Option<&BigDecimal>,
) -> Option<BigDecimal> {
    let unit = source_unit.map(str::trim).filter(|u| !u.is_empty())?;
    let factor = conversion_factor.filter(|f| **f > BigDecimal::zero())?;
    tracing::trace!("standardize {} {} x {}", quantity, unit, factor);
    Some(quantity * factor)
}

/// 单位标准化结果 (写入明细行)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standardized {
    pub standardized_unit: Option<String>,
    pub conversion_factor: Option<BigDecimal>,
    pub standardized_quantity: Option<BigDecimal>,
    pub needs_review: bool,
}

/// 组合目标单位与换算系数
///
/// 目标单位不在标准集合内时置空；系数 <= 0 时不保存，保证
/// 只要标准化数量非空系数就一定 > 0。
pub fn resolve(
    taxonomy: &Taxonomy,
    quantity: &BigDecimal,
    source_unit: Option<&str>,
    target_unit: Option<&str>,
    conversion_factor: Option<&BigDecimal>,
) -> Standardized {
    let standardized_unit = target_unit
        .map(str::trim)
        .filter(|u| taxonomy.is_valid_unit(u))
        .map(str::to_string);
    let conversion_factor = conversion_factor
        .filter(|f| **f > BigDecimal::zero())
        .cloned();
    let standardized_quantity = standardize(quantity, source_unit, conversion_factor.as_ref());

    let needs_review = standardized_unit.is_none() || standardized_quantity.is_none();
    Standardized {
        standardized_unit,
        conversion_factor,
        standardized_quantity,
        needs_review,
    }
}
