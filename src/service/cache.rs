use crate::db::{AppliedApproval, ClassificationStore};
use crate::error::{InvalidClassificationError, StoreError, TaxonomyViolation};
use crate::models::{ApprovedSku, SkuApproval};
use crate::service::{KeyLocks, Taxonomy};
use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use std::sync::Arc;

/// 分类缓存 (已审批 SKU)
///
/// 写入前先用分类树校验，校验失败不产生任何写入。同键写入经 `KeyLocks`
/// 串行化，后写覆盖先写。
pub struct ClassificationCache {
    store: Arc<dyn ClassificationStore>,
    taxonomy: Arc<Taxonomy>,
    locks: KeyLocks,
}

/// 写缓存失败：校验不通过或存储出错
#[derive(Debug, thiserror::Error)]
pub enum CacheWriteError {
    #[error(transparent)]
    Invalid(#[from] InvalidClassificationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CacheWriteError> for crate::Error {
    fn from(e: CacheWriteError) -> Self {
        match e {
            CacheWriteError::Invalid(e) => crate::Error::InvalidClassification(e),
            CacheWriteError::Store(e) => e.into(),
        }
    }
}

impl ClassificationCache {
    pub fn new(store: Arc<dyn ClassificationStore>, taxonomy: Arc<Taxonomy>) -> Self {
        Self {
            store,
            taxonomy,
            locks: KeyLocks::new(),
        }
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// 按键查询 (只读，不加锁)
    pub async fn lookup(&self, sku_key: &str) -> Result<Option<ApprovedSku>, StoreError> {
        self.store.find_sku(sku_key).await
    }

    /// 校验一条审批：键、分类路径、单位、每包数量
    pub fn validate(&self, approval: &SkuApproval) -> Result<(), InvalidClassificationError> {
        let check = || -> Result<(), TaxonomyViolation> {
            if approval.sku_key.trim().is_empty() {
                return Err(TaxonomyViolation::EmptyIdentityKey);
            }
            self.taxonomy.check_path(&approval.category)?;
            self.taxonomy.check_unit(&approval.standardized_unit)?;
            if approval.conversion.units_per_package <= BigDecimal::zero() {
                return Err(TaxonomyViolation::NonPositiveUnitsPerPackage {
                    value: approval.conversion.units_per_package.to_string(),
                });
            }
            Ok(())
        };

        check().map_err(|violation| InvalidClassificationError {
            sku_key: approval.sku_key.clone(),
            violation,
        })
    }

    /// 写入/覆盖缓存行 (不回填明细)
    pub async fn upsert(&self, approval: &SkuApproval) -> Result<ApprovedSku, CacheWriteError> {
        self.validate(approval)?;
        let _guard = self.locks.lock(&approval.sku_key).await;
        Ok(self.store.upsert_sku(approval, Utc::now()).await?)
    }

    /// 写入缓存行并在同一事务里回填所有同键明细
    pub async fn approve_and_propagate(
        &self,
        approval: &SkuApproval,
    ) -> Result<AppliedApproval, CacheWriteError> {
        self.validate(approval)?;
        let _guard = self.locks.lock(&approval.sku_key).await;
        Ok(self.store.apply_approval(approval, Utc::now()).await?)
    }

    /// 缓存命中计数，每次命中调用一次
    pub async fn record_usage(&self, sku_key: &str) -> Result<(), StoreError> {
        self.store.record_sku_usage(sku_key, Utc::now()).await
    }
}
