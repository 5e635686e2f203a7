use crate::api::error::{ApiError, ApiResult};
use crate::models::{ApprovalReport, ApprovalSubmission, ApprovedSku, IngestReport, InvoiceRecord, PendingSku};
use crate::service::{ApprovalService, ClassificationCache, ClassificationOrchestrator, ReclassifyReport};
use axum::{
    extract::{Json, Path, Query, State},
    http::header,
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;

/// 单次重新分类的默认条数
const DEFAULT_RECLASSIFY_LIMIT: i64 = 500;

/// 请求体: 重新分类
#[derive(Debug, Default, Deserialize)]
pub struct ReclassifyRequest {
    pub limit: Option<i64>,
}

/// 查询参数: 待审核队列
#[derive(Debug, Default, Deserialize)]
pub struct PendingQuery {
    pub min_frequency: Option<i64>,
}

/// 请求体: 批量审批
#[derive(Debug, Deserialize)]
pub struct ApprovalBatchRequest {
    pub approvals: Vec<ApprovalSubmission>,
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 导入一张发票并分类
pub async fn ingest_invoice(
    State(orchestrator): State<Arc<ClassificationOrchestrator>>,
    Json(invoice): Json<InvoiceRecord>,
) -> ApiResult<Json<IngestReport>> {
    if invoice.uuid.trim().is_empty() {
        return Err(ApiError::BadRequest("invoice uuid is empty".to_string()));
    }
    let report = orchestrator.ingest_invoice(&invoice).await?;
    Ok(Json(report))
}

/// 重跑待分类明细
pub async fn reclassify_pending(
    State(orchestrator): State<Arc<ClassificationOrchestrator>>,
    req: Option<Json<ReclassifyRequest>>,
) -> ApiResult<Json<ReclassifyReport>> {
    let limit = req
        .and_then(|Json(r)| r.limit)
        .unwrap_or(DEFAULT_RECLASSIFY_LIMIT);
    if limit <= 0 {
        return Err(ApiError::BadRequest("limit must be positive".to_string()));
    }
    Ok(Json(orchestrator.reclassify_pending(limit).await?))
}

/// 待审核队列
pub async fn pending_review(
    State(approvals): State<Arc<ApprovalService>>,
    Query(query): Query<PendingQuery>,
) -> ApiResult<Json<Vec<PendingSku>>> {
    Ok(Json(approvals.pending(query.min_frequency).await?))
}

/// 待审核队列 CSV
pub async fn pending_review_csv(
    State(approvals): State<Arc<ApprovalService>>,
    Query(query): Query<PendingQuery>,
) -> ApiResult<impl IntoResponse> {
    let csv = approvals.pending_csv(query.min_frequency).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"pending_skus.csv\"",
            ),
        ],
        csv,
    ))
}

/// 批量审批 (部分失败不影响其他提交)
pub async fn submit_approvals(
    State(approvals): State<Arc<ApprovalService>>,
    Json(req): Json<ApprovalBatchRequest>,
) -> Json<ApprovalReport> {
    Json(approvals.submit(req.approvals).await)
}

/// 查询已审批 SKU
pub async fn get_sku(
    State(cache): State<Arc<ClassificationCache>>,
    Path(sku_key): Path<String>,
) -> ApiResult<Json<ApprovedSku>> {
    match cache.lookup(&sku_key).await.map_err(crate::Error::from)? {
        Some(sku) => Ok(Json(sku)),
        None => Err(ApiError::NotFound(format!("sku {}", sku_key))),
    }
}
