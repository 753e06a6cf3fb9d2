use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use invoice_copilot::application::ports::{
    CatalogIndex, CatalogRepository, CollectionConfig, ConversationRepository, InvoiceRepository,
    JobRepository, SqlExecutor, VectorStore,
};
use invoice_copilot::application::services::{
    AgentToolbox, CatalogService, ChatAgent, CommitRules, EntityResolver, ExtractionOrchestrator,
    ExtractionWorker, IntentRouter, InvoiceCommitTool, JobLedger, RetrievalService, ScopePolicy,
    StreamCoordinator, TextToSqlService,
};
use invoice_copilot::infrastructure::llm::{EmbedderFactory, create_streaming_llm_client};
use invoice_copilot::infrastructure::observability::{TracingConfig, init_tracing};
use invoice_copilot::infrastructure::persistence::{
    InMemoryCatalogIndex, InMemoryCatalogRepository, InMemoryConversationRepository,
    InMemoryInvoiceRepository, InMemoryJobRepository, InMemoryVectorStore, PgCatalogRepository,
    PgConversationRepository, PgInvoiceRepository, PgJobRepository, PgSqlExecutor, QdrantAdapter,
    QdrantCatalogIndex, UnavailableSqlExecutor, create_pool, run_migrations,
};
use invoice_copilot::infrastructure::storage::LocalDocumentStore;
use invoice_copilot::infrastructure::text_processing::RecursiveCharacterSplitter;
use invoice_copilot::presentation::{AppState, Environment, Settings, create_router};

struct Repositories {
    jobs: Arc<dyn JobRepository>,
    catalog: Arc<dyn CatalogRepository>,
    invoices: Arc<dyn InvoiceRepository>,
    conversations: Arc<dyn ConversationRepository>,
    sql_executor: Arc<dyn SqlExecutor>,
}

struct VectorIndexes {
    chunks: Arc<dyn VectorStore>,
    catalog: Arc<dyn CatalogIndex>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let environment = Environment::from_env().map_err(anyhow::Error::msg)?;
    let settings = Settings::load(environment).context("Failed to load settings")?;

    let json_logs = settings.logging.enable_json
        || std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    init_tracing(&TracingConfig::new(
        environment.as_str(),
        json_logs,
        settings.logging.level.as_deref(),
    ));

    let retry = settings.retry.policy();
    let repositories = build_repositories(&settings).await?;
    let indexes = build_vector_indexes(&settings)?;

    let embedder = EmbedderFactory::create(&settings.embeddings)?;
    let llm_client = Arc::new(create_streaming_llm_client(&settings.llm)?);

    indexes
        .catalog
        .ensure_collection(&CollectionConfig::for_catalog(
            settings.embeddings.dimension as u64,
        ))
        .await
        .context("Failed to prepare catalog collection")?;

    let coordinator = Arc::new(StreamCoordinator::new(
        settings.streaming.replay_capacity,
        Duration::from_secs(settings.streaming.retention_secs),
    ));
    let ledger = Arc::new(JobLedger::new(
        Arc::clone(&repositories.jobs),
        Arc::clone(&coordinator),
    ));

    let catalog_service = Arc::new(CatalogService::new(
        Arc::clone(&repositories.catalog),
        Arc::clone(&indexes.catalog),
        Arc::clone(&embedder),
        retry.clone(),
    ));
    let resolver = Arc::new(EntityResolver::new(
        Arc::clone(&embedder),
        Arc::clone(&indexes.catalog),
        Arc::clone(&repositories.catalog),
        settings.resolution.thresholds(),
        retry.clone(),
    ));
    let pipeline = settings.extraction.to_pipeline_settings();
    let commit_tool = Arc::new(InvoiceCommitTool::new(
        Arc::clone(&repositories.jobs),
        Arc::clone(&catalog_service),
        Arc::clone(&repositories.catalog),
        Arc::clone(&repositories.invoices),
        CommitRules {
            min_line_confidence: pipeline.confidence.min_line_confidence,
            totals_tolerance: pipeline.totals_tolerance,
        },
    ));
    let orchestrator = Arc::new(ExtractionOrchestrator::new(
        Arc::clone(&ledger),
        Arc::new(LocalDocumentStore::new(&settings.storage.root_path)),
        llm_client.clone(),
        resolver,
        commit_tool,
        pipeline,
        retry.clone(),
    ));

    let retrieval_service = Arc::new(RetrievalService::new(
        Arc::clone(&embedder),
        llm_client.clone(),
        Arc::clone(&indexes.chunks),
        Arc::new(RecursiveCharacterSplitter::new(
            settings.chunking.chunk_size,
            settings.chunking.chunk_overlap,
        )),
        settings.rag.to_retrieval_settings(),
        retry.clone(),
    ));
    let text_to_sql = Arc::new(TextToSqlService::new(
        llm_client.clone(),
        Arc::clone(&repositories.sql_executor),
        ScopePolicy::invoice_schema(),
        settings.text_to_sql.to_service_settings(),
        retry.clone(),
    ));
    let chat_agent = Arc::new(ChatAgent::new(
        Arc::clone(&repositories.conversations),
        Arc::new(IntentRouter::new(
            llm_client.clone(),
            retry.clone(),
            settings.chat.history_window,
        )),
        Arc::clone(&retrieval_service),
        text_to_sql,
        Arc::new(AgentToolbox::new(
            llm_client.clone(),
            Arc::clone(&ledger),
            retry.clone(),
        )),
        llm_client.clone(),
        Arc::clone(&coordinator),
        settings.chat.history_window,
    )
    .with_token_timeout(Duration::from_secs(settings.llm.read_timeout_secs.max(1))));

    let (extraction_sender, extraction_receiver) =
        mpsc::channel(settings.extraction.queue_capacity.max(1));
    let worker = ExtractionWorker::new(
        extraction_receiver,
        orchestrator,
        Arc::clone(&ledger),
        settings.extraction.max_concurrent_jobs,
    );
    tokio::spawn(worker.run());
    tokio::spawn(
        Arc::clone(&coordinator)
            .run_sweeper(Duration::from_secs(settings.streaming.sweep_interval_secs)),
    );

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .context("Invalid server address")?;

    let state = AppState {
        ledger,
        chat_agent,
        retrieval_service,
        catalog_service,
        extraction_sender,
        settings,
    };
    let router = create_router(state);

    tracing::info!("Listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn build_repositories(settings: &Settings) -> anyhow::Result<Repositories> {
    let Some(url) = settings.database.url.as_deref() else {
        tracing::warn!("No database configured; records are kept in memory and data queries are disabled");
        return Ok(Repositories {
            jobs: Arc::new(InMemoryJobRepository::new()),
            catalog: Arc::new(InMemoryCatalogRepository::new()),
            invoices: Arc::new(InMemoryInvoiceRepository::new()),
            conversations: Arc::new(InMemoryConversationRepository::new()),
            sql_executor: Arc::new(UnavailableSqlExecutor),
        });
    };

    let pool = create_pool(url, settings.database.max_connections).await?;
    run_migrations(&pool).await?;

    Ok(Repositories {
        jobs: Arc::new(PgJobRepository::new(pool.clone())),
        catalog: Arc::new(PgCatalogRepository::new(pool.clone())),
        invoices: Arc::new(PgInvoiceRepository::new(pool.clone())),
        conversations: Arc::new(PgConversationRepository::new(pool.clone())),
        sql_executor: Arc::new(PgSqlExecutor::new(pool)),
    })
}

fn build_vector_indexes(settings: &Settings) -> anyhow::Result<VectorIndexes> {
    let Some(url) = settings.qdrant.url.as_deref() else {
        tracing::warn!("No Qdrant configured; vector indexes are kept in memory");
        return Ok(VectorIndexes {
            chunks: Arc::new(InMemoryVectorStore::new()),
            catalog: Arc::new(InMemoryCatalogIndex::new()),
        });
    };

    Ok(VectorIndexes {
        chunks: Arc::new(QdrantAdapter::new(
            url,
            settings.qdrant.chunk_collection.clone(),
        )?),
        catalog: Arc::new(QdrantCatalogIndex::new(
            url,
            settings.qdrant.catalog_collection.clone(),
        )?),
    })
}
