pub mod error;
pub mod handlers;

pub use error::{ApiError, ApiResult};
pub use handlers::*;

use crate::service::{ApprovalService, ClassificationCache, ClassificationOrchestrator};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;

/// 组装路由：每个服务一个子路由，各自持有状态后合并
pub fn router(
    orchestrator: Arc<ClassificationOrchestrator>,
    approvals: Arc<ApprovalService>,
    cache: Arc<ClassificationCache>,
) -> Router {
    let classify_routes = Router::new()
        .route("/api/invoices", post(ingest_invoice))
        .route("/api/classify/pending", post(reclassify_pending))
        .with_state(orchestrator);

    let review_routes = Router::new()
        .route("/api/review/pending", get(pending_review))
        .route("/api/review/pending.csv", get(pending_review_csv))
        .route("/api/review/approvals", post(submit_approvals))
        .with_state(approvals);

    let sku_routes = Router::new()
        .route("/api/skus/:sku_key", get(get_sku))
        .with_state(cache);

    Router::new()
        .route("/health", get(health_check))
        .merge(classify_routes)
        .merge(review_routes)
        .merge(sku_routes)
        .layer(ServiceBuilder::new())
}
