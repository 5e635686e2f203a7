use cfdi_classify_rust::{
    api, create_pool, AppConfig, ApprovalService, ClassificationCache, ClassificationOrchestrator,
    ClassificationStore, HttpClassifier, MemoryStore, PgStore, StoreBackend, Taxonomy,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载配置 (日志级别也来自配置)
    let config = AppConfig::load()?;

    // 初始化日志 - 使用本地时间格式，RUST_LOG 优先
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .with_env_filter(filter)
        .init();

    info!("Starting server with config: {:?}", config.server);

    // 分类树只在启动时加载一次
    let taxonomy = Arc::new(Taxonomy::load(&config.taxonomy.path)?);

    let store: Arc<dyn ClassificationStore> = match config.database.backend {
        StoreBackend::Postgres => {
            let pool = create_pool(&config.database).await?;
            info!("Database pool created");
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            info!("Using in-memory store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let classifier = Arc::new(HttpClassifier::new(&config.classifier)?);
    info!(
        "Classifier endpoint {} (model {}, 并发上限 {}, 超时 {}s)",
        config.classifier.endpoint,
        config.classifier.model,
        config.classifier.max_concurrency,
        config.classifier.timeout_secs
    );

    let cache = Arc::new(ClassificationCache::new(store.clone(), taxonomy));
    let orchestrator = Arc::new(ClassificationOrchestrator::new(
        store.clone(),
        cache.clone(),
        classifier,
        config.classifier.max_concurrency,
        Duration::from_secs(config.classifier.timeout_secs),
    ));
    let approvals = Arc::new(ApprovalService::new(
        store,
        cache.clone(),
        config.review.min_frequency,
    ));

    let app = api::router(orchestrator, approvals, cache);

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/invoices            - 导入发票并分类");
    info!("  POST /api/classify/pending    - 重跑待分类明细");
    info!("  GET  /api/review/pending[.csv] - 待审核 SKU 队列");
    info!("  POST /api/review/approvals    - 批量审批");
    info!("  GET  /api/skus/:sku_key       - 查询已审批 SKU");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
