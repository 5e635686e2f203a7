#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use cfdi_classify_rust::db::AppliedApproval;
use cfdi_classify_rust::error::{ClassificationServiceError, StoreError};
use cfdi_classify_rust::models::{
    ApprovalSubmission, ApprovedSku, CategoryPath, InvoiceLine, InvoiceRecord, LineItem,
    PackageKind, PendingSku, SkuApproval,
};
use cfdi_classify_rust::service::{AiSuggestion, ClassifyRequest};
use cfdi_classify_rust::{
    ApprovalService, ClassificationCache, ClassificationOrchestrator, ClassificationStore,
    Classifier, MemoryStore, Taxonomy,
};
use chrono::{DateTime, TimeZone, Utc};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

pub fn taxonomy() -> Arc<Taxonomy> {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/taxonomy.json");
    Arc::new(Taxonomy::load(path).unwrap())
}

pub fn line(code: &str, description: &str, quantity: &str, unit: Option<&str>) -> InvoiceLine {
    InvoiceLine {
        product_code: code.to_string(),
        description: description.to_string(),
        quantity: dec(quantity),
        unit_code: unit.map(str::to_string),
    }
}

pub fn invoice(uuid: &str, items: Vec<InvoiceLine>) -> InvoiceRecord {
    InvoiceRecord {
        uuid: uuid.to_string(),
        issuer_rfc: "AAA010101AAA".to_string(),
        issuer_name: Some("Proveedora del Centro".to_string()),
        issue_date: issue_date(),
        items,
    }
}

pub fn issue_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn oil_suggestion() -> AiSuggestion {
    AiSuggestion {
        category: CategoryPath::new("Abarrotes", "Aceites", "Aceite de oliva"),
        confidence: 0.9,
        standardized_unit: Some("Litros".to_string()),
        conversion_factor: Some(dec("1")),
    }
}

pub fn oil_approval(sku_key: &str) -> ApprovalSubmission {
    ApprovalSubmission {
        sku_key: sku_key.to_string(),
        category: "Abarrotes".to_string(),
        subcategory: "Aceites".to_string(),
        sub_subcategory: "Aceite de oliva".to_string(),
        standardized_unit: "Litros".to_string(),
        units_per_package: dec("1"),
        package_kind: PackageKind::Volume,
        conversion_notes: None,
        review_status: None,
        approved_by: Some("ana".to_string()),
    }
}

type Script =
    Box<dyn Fn(&ClassifyRequest) -> Result<AiSuggestion, ClassificationServiceError> + Send + Sync>;

/// 按脚本返回结果的分类器，记录调用次数
pub struct ScriptedClassifier {
    calls: AtomicUsize,
    delay: Option<Duration>,
    script: Script,
}

impl ScriptedClassifier {
    pub fn new(
        script: impl Fn(&ClassifyRequest) -> Result<AiSuggestion, ClassificationServiceError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: None,
            script: Box::new(script),
        }
    }

    pub fn always(suggestion: AiSuggestion) -> Self {
        Self::new(move |_| Ok(suggestion.clone()))
    }

    pub fn failing() -> Self {
        Self::new(|_| Err(ClassificationServiceError::Status(503)))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(
        &self,
        request: &ClassifyRequest,
    ) -> Result<AiSuggestion, ClassificationServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.script)(request)
    }
}

/// 按配置注入故障的存储：指定键的审批事务中断、指定键查缓存失败、
/// 前 N 次发票落库失败。其余调用转给内存存储。
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    interrupted_key: Option<String>,
    failing_lookup_key: Option<String>,
    failing_invoice_writes: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupting_approval(mut self, sku_key: &str) -> Self {
        self.interrupted_key = Some(sku_key.to_string());
        self
    }

    pub fn failing_lookup(mut self, sku_key: &str) -> Self {
        self.failing_lookup_key = Some(sku_key.to_string());
        self
    }

    pub fn failing_invoice_writes(self, times: usize) -> Self {
        self.failing_invoice_writes.store(times, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl ClassificationStore for FaultyStore {
    async fn find_sku(&self, sku_key: &str) -> Result<Option<ApprovedSku>, StoreError> {
        if self.failing_lookup_key.as_deref() == Some(sku_key) {
            return Err(StoreError::Decode("bad row".to_string()));
        }
        self.inner.find_sku(sku_key).await
    }

    async fn upsert_sku(
        &self,
        approval: &SkuApproval,
        at: DateTime<Utc>,
    ) -> Result<ApprovedSku, StoreError> {
        self.inner.upsert_sku(approval, at).await
    }

    async fn record_sku_usage(&self, sku_key: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.record_sku_usage(sku_key, at).await
    }

    async fn apply_approval(
        &self,
        approval: &SkuApproval,
        at: DateTime<Utc>,
    ) -> Result<AppliedApproval, StoreError> {
        if self.interrupted_key.as_deref() == Some(approval.sku_key.as_str()) {
            return Err(StoreError::Interrupted("connection reset".to_string()));
        }
        self.inner.apply_approval(approval, at).await
    }

    async fn invoice_exists(&self, uuid: &str) -> Result<bool, StoreError> {
        self.inner.invoice_exists(uuid).await
    }

    async fn insert_invoice(
        &self,
        invoice: &InvoiceRecord,
        items: &[LineItem],
    ) -> Result<i64, StoreError> {
        let remaining = self.failing_invoice_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_invoice_writes.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Interrupted("connection reset".to_string()));
        }
        self.inner.insert_invoice(invoice, items).await
    }

    async fn update_pending_classification(&self, item: &LineItem) -> Result<bool, StoreError> {
        self.inner.update_pending_classification(item).await
    }

    async fn list_pending_items(&self, limit: i64) -> Result<Vec<LineItem>, StoreError> {
        self.inner.list_pending_items(limit).await
    }

    async fn list_items_by_key(&self, sku_key: &str) -> Result<Vec<LineItem>, StoreError> {
        self.inner.list_items_by_key(sku_key).await
    }

    async fn pending_summaries(&self, min_frequency: i64) -> Result<Vec<PendingSku>, StoreError> {
        self.inner.pending_summaries(min_frequency).await
    }
}

/// 组装好的一套服务
pub struct Harness {
    pub store: Arc<dyn ClassificationStore>,
    pub cache: Arc<ClassificationCache>,
    pub orchestrator: Arc<ClassificationOrchestrator>,
    pub approvals: Arc<ApprovalService>,
    pub classifier: Arc<ScriptedClassifier>,
}

impl Harness {
    pub fn new(classifier: ScriptedClassifier) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), classifier, Duration::from_secs(5))
    }

    pub fn with_store(
        store: Arc<dyn ClassificationStore>,
        classifier: ScriptedClassifier,
        call_timeout: Duration,
    ) -> Self {
        let classifier = Arc::new(classifier);
        let cache = Arc::new(ClassificationCache::new(store.clone(), taxonomy()));
        let orchestrator = Arc::new(ClassificationOrchestrator::new(
            store.clone(),
            cache.clone(),
            classifier.clone(),
            4,
            call_timeout,
        ));
        let approvals = Arc::new(ApprovalService::new(store.clone(), cache.clone(), 1));
        Self {
            store,
            cache,
            orchestrator,
            approvals,
            classifier,
        }
    }

    /// 同一存储上换一个分类器
    pub fn with_classifier(&self, classifier: ScriptedClassifier) -> Self {
        Self::with_store(self.store.clone(), classifier, Duration::from_secs(5))
    }
}
