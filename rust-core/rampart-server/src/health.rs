//! Public liveness endpoint.

use async_trait::async_trait;
use rampart_core::middleware::{DomainHandler, HandlerContext};
use rampart_core::{ModellerHandle, PathParams, Response, StorageOptions};
use serde_json::json;
use tracing::Span;

/// `GET /health`: round-trips the request transaction
pub struct Health;

#[async_trait]
impl DomainHandler for Health {
    async fn handle(
        &self,
        _ctx: &HandlerContext<'_>,
        _path: &PathParams,
        _options: &StorageOptions,
        _span: &Span,
        modeller: &mut ModellerHandle,
    ) -> anyhow::Result<Response> {
        modeller.fetch_all("SELECT 1", &[]).await?;
        Ok(Response::to_json(&json!({
            "status": "ok",
            "version": rampart_core::VERSION,
        }))?)
    }
}
