pub mod export;
pub mod memory;
pub mod pool;
pub mod queries;
pub mod store;

pub use export::write_pending_csv;
pub use memory::MemoryStore;
pub use pool::create_pool;
pub use queries::PgStore;
pub use store::{AppliedApproval, ClassificationStore};
