use crate::db::store::{AppliedApproval, ClassificationStore};
use crate::error::StoreError;
use crate::models::{
    ApprovedSku, CategoryPath, ClassificationSource, ConversionParams, InvoiceRecord, LineItem,
    PendingSku, ReviewStatus, SkuApproval,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres};
use std::time::Instant;

/// 明细行查询列
const LINE_ITEM_COLUMNS: &str = r#"
    id, invoice_id, line_number, sku_key, product_code, description, unit_code, quantity,
    category, subcategory, sub_sub_category, standardized_unit, conversion_factor,
    standardized_quantity, category_confidence, classification_source, needs_review,
    classification_timestamp
"#;

/// 缓存行查询列
const SKU_COLUMNS: &str = r#"
    sku_key, category, subcategory, sub_sub_category, standardized_unit, units_per_package,
    package_type, conversion_notes, review_status, approved_by, approval_date, usage_count,
    last_used
"#;

/// 明细表行 (invoice_items)
#[derive(Debug, Clone, FromRow)]
struct LineItemRow {
    id: i64,
    invoice_id: i64,
    line_number: i32,
    sku_key: String,
    product_code: String,
    description: String,
    unit_code: Option<String>,
    quantity: BigDecimal,
    category: Option<String>,
    subcategory: Option<String>,
    sub_sub_category: Option<String>,
    standardized_unit: Option<String>,
    conversion_factor: Option<BigDecimal>,
    standardized_quantity: Option<BigDecimal>,
    category_confidence: Option<f64>,
    classification_source: String,
    needs_review: bool,
    classification_timestamp: DateTime<Utc>,
}

impl TryFrom<LineItemRow> for LineItem {
    type Error = StoreError;

    fn try_from(row: LineItemRow) -> Result<Self, Self::Error> {
        let source =
            ClassificationSource::from_columns(&row.classification_source, row.category_confidence)
                .map_err(StoreError::Decode)?;
        Ok(LineItem {
            id: row.id,
            invoice_id: row.invoice_id,
            line_number: row.line_number,
            sku_key: row.sku_key,
            product_code: row.product_code,
            description: row.description,
            unit_code: row.unit_code,
            quantity: row.quantity,
            category: CategoryPath::from_columns(row.category, row.subcategory, row.sub_sub_category),
            standardized_unit: row.standardized_unit,
            conversion_factor: row.conversion_factor,
            standardized_quantity: row.standardized_quantity,
            source,
            needs_review: row.needs_review,
            classified_at: row.classification_timestamp,
        })
    }
}

/// 已审批 SKU 表行 (approved_skus)
#[derive(Debug, Clone, FromRow)]
struct ApprovedSkuRow {
    sku_key: String,
    category: String,
    subcategory: String,
    sub_sub_category: String,
    standardized_unit: String,
    units_per_package: BigDecimal,
    package_type: String,
    conversion_notes: Option<String>,
    review_status: String,
    approved_by: String,
    approval_date: DateTime<Utc>,
    usage_count: i64,
    last_used: Option<DateTime<Utc>>,
}

impl TryFrom<ApprovedSkuRow> for ApprovedSku {
    type Error = StoreError;

    fn try_from(row: ApprovedSkuRow) -> Result<Self, Self::Error> {
        Ok(ApprovedSku {
            sku_key: row.sku_key,
            category: CategoryPath::new(row.category, row.subcategory, row.sub_sub_category),
            standardized_unit: row.standardized_unit,
            conversion: ConversionParams {
                units_per_package: row.units_per_package,
                package_kind: row.package_type.parse().map_err(StoreError::Decode)?,
                conversion_notes: row.conversion_notes,
            },
            review_status: row.review_status.parse().map_err(StoreError::Decode)?,
            approved_by: row.approved_by,
            approval_date: row.approval_date,
            usage_count: row.usage_count,
            last_used: row.last_used,
        })
    }
}

/// 待审核汇总行
#[derive(Debug, Clone, FromRow)]
struct PendingSkuRow {
    sku_key: String,
    description: String,
    product_code: String,
    unit_code: Option<String>,
    category: Option<String>,
    subcategory: Option<String>,
    sub_sub_category: Option<String>,
    standardized_unit: Option<String>,
    conversion_factor: Option<BigDecimal>,
    frequency: i64,
    total_quantity: BigDecimal,
    avg_confidence: Option<f64>,
    needs_review: bool,
    existing_review_status: Option<String>,
}

impl TryFrom<PendingSkuRow> for PendingSku {
    type Error = StoreError;

    fn try_from(row: PendingSkuRow) -> Result<Self, Self::Error> {
        let existing_review_status = row
            .existing_review_status
            .map(|s| s.parse::<ReviewStatus>())
            .transpose()
            .map_err(StoreError::Decode)?;
        Ok(PendingSku {
            sku_key: row.sku_key,
            description: row.description,
            product_code: row.product_code,
            unit_code: row.unit_code,
            suggested_category: CategoryPath::from_columns(
                row.category,
                row.subcategory,
                row.sub_sub_category,
            ),
            suggested_unit: row.standardized_unit,
            suggested_conversion_factor: row.conversion_factor,
            frequency: row.frequency,
            total_quantity: row.total_quantity,
            avg_confidence: row.avg_confidence,
            needs_review: row.needs_review,
            existing_review_status,
        })
    }
}

/// Postgres 存储
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// 写入/覆盖缓存行，保留使用统计
///
/// 只有 approved 状态才覆盖已有行的分类字段，其他状态只改审核字段。
async fn upsert_sku_with<'c, E>(
    executor: E,
    approval: &SkuApproval,
    at: DateTime<Utc>,
) -> Result<ApprovedSku, StoreError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let sql = format!(
        r#"
        INSERT INTO approved_skus (
            sku_key, category, subcategory, sub_sub_category, standardized_unit,
            units_per_package, package_type, conversion_notes, review_status, approved_by,
            approval_date, usage_count, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 0, $11, $11)
        ON CONFLICT (sku_key) DO UPDATE SET
            category = CASE WHEN EXCLUDED.review_status = 'approved'
                THEN EXCLUDED.category ELSE approved_skus.category END,
            subcategory = CASE WHEN EXCLUDED.review_status = 'approved'
                THEN EXCLUDED.subcategory ELSE approved_skus.subcategory END,
            sub_sub_category = CASE WHEN EXCLUDED.review_status = 'approved'
                THEN EXCLUDED.sub_sub_category ELSE approved_skus.sub_sub_category END,
            standardized_unit = CASE WHEN EXCLUDED.review_status = 'approved'
                THEN EXCLUDED.standardized_unit ELSE approved_skus.standardized_unit END,
            units_per_package = CASE WHEN EXCLUDED.review_status = 'approved'
                THEN EXCLUDED.units_per_package ELSE approved_skus.units_per_package END,
            package_type = CASE WHEN EXCLUDED.review_status = 'approved'
                THEN EXCLUDED.package_type ELSE approved_skus.package_type END,
            conversion_notes = CASE WHEN EXCLUDED.review_status = 'approved'
                THEN EXCLUDED.conversion_notes ELSE approved_skus.conversion_notes END,
            review_status = EXCLUDED.review_status,
            approved_by = EXCLUDED.approved_by,
            approval_date = EXCLUDED.approval_date,
            updated_at = EXCLUDED.updated_at
        RETURNING {}
        "#,
        SKU_COLUMNS
    );

    let row = sqlx::query_as::<_, ApprovedSkuRow>(&sql)
        .bind(&approval.sku_key)
        .bind(&approval.category.category)
        .bind(&approval.category.subcategory)
        .bind(&approval.category.sub_subcategory)
        .bind(&approval.standardized_unit)
        .bind(&approval.conversion.units_per_package)
        .bind(approval.conversion.package_kind.as_str())
        .bind(&approval.conversion.conversion_notes)
        .bind(approval.review_status.as_str())
        .bind(&approval.approved_by)
        .bind(at)
        .fetch_one(executor)
        .await?;

    row.try_into()
}

/// 在给定执行器 (事务) 上新增一条明细
async fn insert_line_item_with<'c, E>(
    executor: E,
    invoice_id: i64,
    item: &LineItem,
) -> Result<i64, StoreError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let category = item.category.as_ref();
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO invoice_items (
            invoice_id, line_number, sku_key, product_code, description, unit_code,
            quantity, category, subcategory, sub_sub_category, standardized_unit,
            conversion_factor, units_per_package, standardized_quantity,
            category_confidence, classification_source, approval_status, needs_review,
            classification_timestamp, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12, $13, $14, $15, $16,
                $17, $18, $18, $18)
        RETURNING id
        "#,
    )
    .bind(invoice_id)
    .bind(item.line_number)
    .bind(&item.sku_key)
    .bind(&item.product_code)
    .bind(&item.description)
    .bind(&item.unit_code)
    .bind(&item.quantity)
    .bind(category.map(|c| c.category.as_str()))
    .bind(category.map(|c| c.subcategory.as_str()))
    .bind(category.map(|c| c.sub_subcategory.as_str()))
    .bind(&item.standardized_unit)
    .bind(&item.conversion_factor)
    .bind(&item.standardized_quantity)
    .bind(item.source.confidence())
    .bind(item.source.as_str())
    .bind(item.approval_status().as_str())
    .bind(item.needs_review)
    .bind(item.classified_at)
    .fetch_one(executor)
    .await?;
    Ok(id)
}

#[async_trait]
impl ClassificationStore for PgStore {
    async fn find_sku(&self, sku_key: &str) -> Result<Option<ApprovedSku>, StoreError> {
        let sql = format!("SELECT {} FROM approved_skus WHERE sku_key = $1", SKU_COLUMNS);
        let row = sqlx::query_as::<_, ApprovedSkuRow>(&sql)
            .bind(sku_key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ApprovedSku::try_from).transpose()
    }

    async fn upsert_sku(
        &self,
        approval: &SkuApproval,
        at: DateTime<Utc>,
    ) -> Result<ApprovedSku, StoreError> {
        upsert_sku_with(&self.pool, approval, at).await
    }

    async fn record_sku_usage(&self, sku_key: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE approved_skus
            SET usage_count = usage_count + 1, last_used = $2
            WHERE sku_key = $1
            "#,
        )
        .bind(sku_key)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_approval(
        &self,
        approval: &SkuApproval,
        at: DateTime<Utc>,
    ) -> Result<AppliedApproval, StoreError> {
        let start_time = Instant::now();
        let mut tx = self.pool.begin().await?;

        // 同一 SKU 键的审批串行化，不同键互不阻塞
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&approval.sku_key)
            .execute(&mut *tx)
            .await?;

        let sku = upsert_sku_with(&mut *tx, approval, at).await?;

        let items_updated = if approval.review_status == ReviewStatus::Approved {
            sqlx::query(
                r#"
                UPDATE invoice_items SET
                    category = $2,
                    subcategory = $3,
                    sub_sub_category = $4,
                    standardized_unit = $5,
                    conversion_factor = $6,
                    units_per_package = $6,
                    standardized_quantity = CASE
                        WHEN unit_code IS NULL OR btrim(unit_code) = '' THEN NULL
                        ELSE quantity * $6
                    END,
                    needs_review = (unit_code IS NULL OR btrim(unit_code) = ''),
                    category_confidence = NULL,
                    classification_source = 'approved',
                    approval_status = 'approved',
                    classification_timestamp = $7,
                    updated_at = $7
                WHERE sku_key = $1
                "#,
            )
            .bind(&approval.sku_key)
            .bind(&sku.category.category)
            .bind(&sku.category.subcategory)
            .bind(&sku.category.sub_subcategory)
            .bind(&sku.standardized_unit)
            .bind(&sku.conversion.units_per_package)
            .bind(at)
            .execute(&mut *tx)
            .await?
            .rows_affected()
        } else {
            0
        };

        tx.commit()
            .await
            .map_err(|e| StoreError::Interrupted(format!("审批提交失败: {}", e)))?;

        tracing::debug!(
            "✓ 审批落库 {} , 回填 {} 行, 耗时: {:?}",
            approval.sku_key,
            items_updated,
            start_time.elapsed()
        );
        Ok(AppliedApproval { sku, items_updated })
    }

    async fn invoice_exists(&self, uuid: &str) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM invoices WHERE uuid = $1)",
        )
        .bind(uuid)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_invoice(
        &self,
        invoice: &InvoiceRecord,
        items: &[LineItem],
    ) -> Result<i64, StoreError> {
        let start_time = Instant::now();
        let mut tx = self.pool.begin().await?;

        let invoice_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO invoices (uuid, issuer_rfc, issuer_name, issue_date, created_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (uuid) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&invoice.uuid)
        .bind(&invoice.issuer_rfc)
        .bind(&invoice.issuer_name)
        .bind(invoice.issue_date)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::DuplicateInvoice(invoice.uuid.clone()))?;

        for item in items {
            insert_line_item_with(&mut *tx, invoice_id, item).await?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Interrupted(format!("发票提交失败: {}", e)))?;

        tracing::debug!(
            "✓ 发票落库 {} , 明细 {} 行, 耗时: {:?}",
            invoice.uuid,
            items.len(),
            start_time.elapsed()
        );
        Ok(invoice_id)
    }

    async fn update_pending_classification(&self, item: &LineItem) -> Result<bool, StoreError> {
        let category = item.category.as_ref();
        let result = sqlx::query(
            r#"
            UPDATE invoice_items SET
                category = $2,
                subcategory = $3,
                sub_sub_category = $4,
                standardized_unit = $5,
                conversion_factor = $6,
                units_per_package = $6,
                standardized_quantity = $7,
                category_confidence = $8,
                classification_source = $9,
                approval_status = $10,
                needs_review = $11,
                classification_timestamp = $12,
                updated_at = $12
            WHERE id = $1 AND approval_status = 'pending'
            "#,
        )
        .bind(item.id)
        .bind(category.map(|c| c.category.as_str()))
        .bind(category.map(|c| c.subcategory.as_str()))
        .bind(category.map(|c| c.sub_subcategory.as_str()))
        .bind(&item.standardized_unit)
        .bind(&item.conversion_factor)
        .bind(&item.standardized_quantity)
        .bind(item.source.confidence())
        .bind(item.source.as_str())
        .bind(item.approval_status().as_str())
        .bind(item.needs_review)
        .bind(item.classified_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_pending_items(&self, limit: i64) -> Result<Vec<LineItem>, StoreError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM invoice_items
            WHERE approval_status = 'pending'
            ORDER BY id
            LIMIT $1
            "#,
            LINE_ITEM_COLUMNS
        );
        let rows = sqlx::query_as::<_, LineItemRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(LineItem::try_from).collect()
    }

    async fn list_items_by_key(&self, sku_key: &str) -> Result<Vec<LineItem>, StoreError> {
        let sql = format!(
            "SELECT {} FROM invoice_items WHERE sku_key = $1 ORDER BY id",
            LINE_ITEM_COLUMNS
        );
        let rows = sqlx::query_as::<_, LineItemRow>(&sql)
            .bind(sku_key)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(LineItem::try_from).collect()
    }

    /// 按 SKU 键分组，取最早一行作为代表，频次降序
    async fn pending_summaries(&self, min_frequency: i64) -> Result<Vec<PendingSku>, StoreError> {
        let rows = sqlx::query_as::<_, PendingSkuRow>(
            r#"
            WITH pending AS (
                SELECT
                    ii.*,
                    ROW_NUMBER() OVER (PARTITION BY ii.sku_key ORDER BY ii.id) AS rn,
                    COUNT(*) OVER (PARTITION BY ii.sku_key) AS frequency,
                    SUM(ii.quantity) OVER (PARTITION BY ii.sku_key) AS total_quantity,
                    AVG(ii.category_confidence) OVER (PARTITION BY ii.sku_key) AS avg_confidence,
                    BOOL_OR(ii.needs_review) OVER (PARTITION BY ii.sku_key) AS any_needs_review
                FROM invoice_items ii
                WHERE ii.approval_status = 'pending'
            )
            SELECT
                p.sku_key,
                p.description,
                p.product_code,
                p.unit_code,
                p.category,
                p.subcategory,
                p.sub_sub_category,
                p.standardized_unit,
                p.conversion_factor,
                p.frequency,
                p.total_quantity,
                p.avg_confidence,
                p.any_needs_review AS needs_review,
                aps.review_status AS existing_review_status
            FROM pending p
            LEFT JOIN approved_skus aps ON aps.sku_key = p.sku_key
            WHERE p.rn = 1
              AND p.frequency >= $1
            ORDER BY p.frequency DESC, p.sku_key
            "#,
        )
        .bind(min_frequency)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PendingSku::try_from).collect()
    }
}
