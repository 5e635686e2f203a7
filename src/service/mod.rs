pub mod approval;
pub mod cache;
pub mod classifier;
pub mod identity;
pub mod key_locks;
pub mod orchestrator;
pub mod taxonomy;
pub mod units;

pub use approval::ApprovalService;
pub use cache::{CacheWriteError, ClassificationCache};
pub use classifier::{AiSuggestion, Classifier, ClassifyRequest, HttpClassifier};
pub use identity::derive_sku_key;
pub use key_locks::{KeyGuard, KeyLocks};
pub use orchestrator::{ClassificationOrchestrator, ClassificationStats, ReclassifyReport};
pub use taxonomy::Taxonomy;
