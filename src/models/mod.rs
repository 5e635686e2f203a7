pub mod approved_sku;
pub mod invoice;
pub mod line_item;
pub mod review;

pub use approved_sku::{ApprovedSku, ConversionParams, PackageKind, ReviewStatus, SkuApproval};
pub use invoice::{IngestReport, InvoiceLine, InvoiceRecord};
pub use line_item::{ApprovalStatus, CategoryPath, ClassificationSource, LineItem};
pub use review::{
    ApprovalReport, ApprovalSubmission, CommittedApproval, PendingSku, RejectedApproval,
};
