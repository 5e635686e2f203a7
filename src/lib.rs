pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod service;

pub use config::{AppConfig, StoreBackend};
pub use db::{create_pool, ClassificationStore, MemoryStore, PgStore};
pub use error::{Error, Result};
pub use service::{
    ApprovalService, ClassificationCache, ClassificationOrchestrator, Classifier, HttpClassifier,
    Taxonomy,
};
