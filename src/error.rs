use std::time::Duration;
use thiserror::Error;

/// 分类树校验失败的具体规则
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaxonomyViolation {
    #[error("identity key is empty")]
    EmptyIdentityKey,

    #[error("unknown category '{category}'")]
    UnknownCategory { category: String },

    #[error("subcategory '{subcategory}' is not under category '{category}'")]
    SubcategoryNotInCategory {
        category: String,
        subcategory: String,
    },

    #[error("sub-subcategory '{sub_subcategory}' is not under subcategory '{subcategory}'")]
    SubSubcategoryNotInSubcategory {
        subcategory: String,
        sub_subcategory: String,
    },

    #[error("unit '{unit}' is not in the standardized unit set")]
    UnknownUnit { unit: String },

    #[error("units per package must be greater than zero, got {value}")]
    NonPositiveUnitsPerPackage { value: String },
}

impl TaxonomyViolation {
    /// 稳定的规则编码 (返回给审核端)
    pub fn code(&self) -> &'static str {
        match self {
            TaxonomyViolation::EmptyIdentityKey => "empty_identity_key",
            TaxonomyViolation::UnknownCategory { .. } => "unknown_category",
            TaxonomyViolation::SubcategoryNotInCategory { .. } => "subcategory_not_in_category",
            TaxonomyViolation::SubSubcategoryNotInSubcategory { .. } => {
                "sub_subcategory_not_in_subcategory"
            }
            TaxonomyViolation::UnknownUnit { .. } => "unknown_unit",
            TaxonomyViolation::NonPositiveUnitsPerPackage { .. } => "non_positive_units_per_package",
        }
    }

    /// 违规所在字段
    pub fn field(&self) -> &'static str {
        match self {
            TaxonomyViolation::EmptyIdentityKey => "sku_key",
            TaxonomyViolation::UnknownCategory { .. } => "category",
            TaxonomyViolation::SubcategoryNotInCategory { .. } => "subcategory",
            TaxonomyViolation::SubSubcategoryNotInSubcategory { .. } => "sub_subcategory",
            TaxonomyViolation::UnknownUnit { .. } => "standardized_unit",
            TaxonomyViolation::NonPositiveUnitsPerPackage { .. } => "units_per_package",
        }
    }
}

/// 人工审核提交的分类不合法 (写入前拒绝)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid classification for '{sku_key}' ({}): {violation}", .violation.field())]
pub struct InvalidClassificationError {
    pub sku_key: String,
    pub violation: TaxonomyViolation,
}

/// AI 分类服务调用失败
#[derive(Debug, Clone, Error)]
pub enum ClassificationServiceError {
    #[error("classifier call timed out after {0:?}")]
    Timeout(Duration),

    #[error("classifier transport error: {0}")]
    Transport(String),

    #[error("classifier returned HTTP {0}")]
    Status(u16),

    #[error("classifier returned malformed data: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ClassificationServiceError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            ClassificationServiceError::Status(status.as_u16())
        } else {
            ClassificationServiceError::Transport(e.to_string())
        }
    }
}

/// 持久层错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invoice {0} was already ingested")]
    DuplicateInvoice(String),

    #[error("line item {0} not found")]
    LineItemNotFound(i64),

    #[error("stored row could not be decoded: {0}")]
    Decode(String),

    #[error("transaction interrupted, nothing applied: {0}")]
    Interrupted(String),
}

/// 分类树加载失败
#[derive(Debug, Error)]
pub enum TaxonomyLoadError {
    #[error("cannot read taxonomy file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse taxonomy file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("taxonomy is malformed: {0}")]
    Malformed(String),
}

/// crate 级错误
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    InvalidClassification(#[from] InvalidClassificationError),

    #[error(transparent)]
    ClassificationService(#[from] ClassificationServiceError),

    #[error("duplicate invoice: {0}")]
    DuplicateInvoice(String),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Taxonomy(#[from] TaxonomyLoadError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("csv export error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateInvoice(uuid) => Error::DuplicateInvoice(uuid),
            other => Error::Store(other),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Store(StoreError::Database(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
