//! # Rampart Server
//!
//! Process entry point. Reads `RAMPART_*` configuration, connects storage,
//! registers the built-in endpoints and serves until SIGINT/SIGTERM.

mod health;

use rampart_core::config::{authenticator_from_provider, schema_root, DatabaseConfig};
use rampart_core::modeller::{SetupStatements, StatementCatalog};
use rampart_core::schema::FileSchemaSource;
use rampart_core::{
    DatabasePool, Endpoint, EnvConfig, Method, Pipeline, PipelineConfig, PipelineDeps, SchemaCache,
    Server, ServerConfig,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Install JSON logging; `RUST_LOG` overrides the default `rampart=info`
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rampart=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let provider = EnvConfig::new();
    let server_config = ServerConfig::from_provider(&provider)?;
    let pipeline_config = PipelineConfig::from_provider(&provider)?;
    let database = DatabaseConfig::from_provider(&provider)?;
    let authenticator = authenticator_from_provider(&provider)?;

    let root = schema_root(&provider);
    if !std::path::Path::new(&root).is_dir() {
        warn!(schema_root = %root, "Schema root does not exist");
    }

    let pool = DatabasePool::connect(&database.url, database.max_connections).await?;
    pool.ping().await?;
    info!(dialect = ?pool.dialect(), "Storage connected");

    let schemas = Arc::new(SchemaCache::new(FileSchemaSource));
    let deps = PipelineDeps {
        backend: Arc::new(pool.clone()),
        repository: Arc::new(SetupStatements::new()),
        queries: Arc::new(StatementCatalog::new()),
        schemas: Arc::clone(&schemas),
        authenticator: Arc::new(authenticator),
        config: pipeline_config,
    };

    let mut server = Server::new(server_config, Pipeline::standard(deps));
    server.add_route(Method::Get, "/health", Endpoint::new(health::Health).public())?;
    schemas.preload(server.router().endpoints().flat_map(Endpoint::schemas))?;

    info!(version = rampart_core::VERSION, "Starting rampart");
    let served = server.serve().await;
    pool.close().await;
    served?;
    info!("Server stopped");
    Ok(())
}
