use crate::error::{TaxonomyLoadError, TaxonomyViolation};
use crate::models::CategoryPath;
use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;
use std::path::Path;

/// 分类树文件格式
/// `{"categories": {cat: {sub: [subsub, ...]}}, "standardized_units": [...]}`
#[derive(Debug, Deserialize)]
struct TaxonomyFile {
    categories: IndexMap<String, IndexMap<String, Vec<String>>>,
    standardized_units: Vec<String>,
}

/// 三级分类树 + 标准单位集合
///
/// 启动时加载一次，之后只读，通过 `Arc` 注入到校验方。
#[derive(Debug, Clone)]
pub struct Taxonomy {
    categories: IndexMap<String, IndexMap<String, IndexSet<String>>>,
    units: IndexSet<String>,
}

impl Taxonomy {
    /// 从 JSON 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TaxonomyLoadError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let taxonomy = Self::from_json_str(&raw)?;
        tracing::info!(
            "Loaded taxonomy from {}: {} categories, {} sub-subcategories, {} units",
            path.as_ref().display(),
            taxonomy.category_count(),
            taxonomy.sub_subcategory_count(),
            taxonomy.units.len()
        );
        Ok(taxonomy)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, TaxonomyLoadError> {
        let file: TaxonomyFile = serde_json::from_str(raw)?;
        Self::from_parts(file.categories, file.standardized_units)
    }

    /// 结构校验：不允许空树、空名称、空单位集合
    pub fn from_parts(
        categories: IndexMap<String, IndexMap<String, Vec<String>>>,
        units: Vec<String>,
    ) -> Result<Self, TaxonomyLoadError> {
        if categories.is_empty() {
            return Err(TaxonomyLoadError::Malformed("no categories defined".to_string()));
        }
        if units.is_empty() {
            return Err(TaxonomyLoadError::Malformed(
                "no standardized units defined".to_string(),
            ));
        }

        let mut tree = IndexMap::with_capacity(categories.len());
        for (category, subcategories) in categories {
            if category.trim().is_empty() {
                return Err(TaxonomyLoadError::Malformed("empty category name".to_string()));
            }
            if subcategories.is_empty() {
                return Err(TaxonomyLoadError::Malformed(format!(
                    "category '{}' has no subcategories",
                    category
                )));
            }
            let mut subs = IndexMap::with_capacity(subcategories.len());
            for (subcategory, leaves) in subcategories {
                if subcategory.trim().is_empty() || leaves.iter().any(|l| l.trim().is_empty()) {
                    return Err(TaxonomyLoadError::Malformed(format!(
                        "empty name under category '{}'",
                        category
                    )));
                }
                if leaves.is_empty() {
                    return Err(TaxonomyLoadError::Malformed(format!(
                        "subcategory '{}' under '{}' has no sub-subcategories",
                        subcategory, category
                    )));
                }
                subs.insert(subcategory, leaves.into_iter().collect::<IndexSet<_>>());
            }
            tree.insert(category, subs);
        }

        let units: IndexSet<String> = units.into_iter().collect();
        if units.iter().any(|u| u.trim().is_empty()) {
            return Err(TaxonomyLoadError::Malformed("empty unit name".to_string()));
        }

        Ok(Self {
            categories: tree,
            units,
        })
    }

    pub fn is_valid_category_path(
        &self,
        category: &str,
        subcategory: &str,
        sub_subcategory: &str,
    ) -> bool {
        self.categories
            .get(category)
            .and_then(|subs| subs.get(subcategory))
            .map(|leaves| leaves.contains(sub_subcategory))
            .unwrap_or(false)
    }

    pub fn is_valid_unit(&self, unit: &str) -> bool {
        self.units.contains(unit)
    }

    /// 校验路径，返回第一条违反的规则
    pub fn check_path(&self, path: &CategoryPath) -> Result<(), TaxonomyViolation> {
        let Some(subs) = self.categories.get(&path.category) else {
            return Err(TaxonomyViolation::UnknownCategory {
                category: path.category.clone(),
            });
        };
        let Some(leaves) = subs.get(&path.subcategory) else {
            return Err(TaxonomyViolation::SubcategoryNotInCategory {
                category: path.category.clone(),
                subcategory: path.subcategory.clone(),
            });
        };
        if !leaves.contains(&path.sub_subcategory) {
            return Err(TaxonomyViolation::SubSubcategoryNotInSubcategory {
                subcategory: path.subcategory.clone(),
                sub_subcategory: path.sub_subcategory.clone(),
            });
        }
        Ok(())
    }

    pub fn check_unit(&self, unit: &str) -> Result<(), TaxonomyViolation> {
        if self.is_valid_unit(unit) {
            Ok(())
        } else {
            Err(TaxonomyViolation::UnknownUnit {
                unit: unit.to_string(),
            })
        }
    }

    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    pub fn sub_subcategory_count(&self) -> usize {
        self.categories
            .values()
            .flat_map(|subs| subs.values())
            .map(IndexSet::len)
            .sum()
    }
}
