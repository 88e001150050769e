//! # Request Pipeline
//!
//! An ordered list of stages around a domain handler.
//!
//! Stages run `before` in order, outermost first. A stage that answers the
//! request itself returns [`Outcome::Respond`] and nothing further inward
//! runs, the handler included. `after` then runs in reverse for every stage
//! that was entered, the rejecting one too, so the transaction stage always
//! gets to roll back what it opened.

use crate::auth::Authentication;
use crate::json::parse_json_bytes;
use crate::modeller::ModellerHandle;
use crate::query::QueryParameterModel;
use crate::registry::{failure_response, internal_error_response};
use crate::request::Request;
use crate::route::Endpoint;
use crate::router::Match;
use crate::server::Response;
use crate::storage::{to_storage_options, StorageOptions};
use crate::types::{ParamType, PathParams};
use async_trait::async_trait;
use hyper::body::Bytes;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, field, info_span, Instrument, Span};

/// Correlation identifier, echoed on every response
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";
/// Test directive: roll back even when the handler succeeds
pub const TX_ROLLBACK_HEADER: &str = "X-Tx-Rollback";
/// Test directive: delay completion by this many seconds
pub const WAIT_SECONDS_HEADER: &str = "X-Wait-Seconds";
/// Test directive: transaction-scoped lock wait timeout in seconds
pub const LOCK_WAIT_TIMEOUT_HEADER: &str = "X-Tx-Lock-Wait-Timeout-Seconds";

/// What a stage decided
#[derive(Debug)]
pub enum Outcome {
    /// Pass control inward
    Continue,
    /// Answer now and stop
    Respond(Response),
}

/// One unit of the pipeline
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name for logging
    fn name(&self) -> &'static str;

    /// Runs on the way in
    async fn before(&self, ctx: &mut RequestContext) -> Outcome;

    /// Runs on the way out, in reverse order
    async fn after(&self, _ctx: &mut RequestContext, _response: &mut Response) {}
}

/// State of one request as it moves through the pipeline
///
/// Owned by the task serving the request; never shared.
#[derive(Debug)]
pub struct RequestContext {
    /// The request
    pub request: Request,
    /// Matched endpoint
    pub endpoint: Arc<Endpoint>,
    /// Raw path segments with their declared types
    pub raw_params: Vec<(String, String, ParamType)>,
    /// Assigned by the correlation stage
    pub correlation_id: String,
    /// Set by the authentication stage on non-public endpoints
    pub authentication: Option<Authentication>,
    /// Open transaction, set by the transaction stage
    pub modeller: Option<ModellerHandle>,
    /// Converted path parameters
    pub path_params: PathParams,
    /// Parsed query (defaults unless the endpoint is a collection)
    pub query: QueryParameterModel,
    /// Storage options derived from `query`
    pub storage_options: StorageOptions,
    /// Validated body, published for the handler
    pub body: Option<Bytes>,
    /// Roll back even if the handler succeeds
    pub force_rollback: bool,
    /// Delay applied after the inner chain returns
    pub wait: Option<Duration>,
    /// Request span
    pub span: Span,
}

impl RequestContext {
    /// Fresh context for a matched request
    #[must_use]
    pub fn new(request: Request, matched: Match, span: Span) -> Self {
        let query = QueryParameterModel::default();
        Self {
            request,
            endpoint: matched.endpoint,
            raw_params: matched.params,
            correlation_id: String::new(),
            authentication: None,
            modeller: None,
            path_params: PathParams::new(),
            storage_options: to_storage_options(&query),
            query,
            body: None,
            force_rollback: false,
            wait: None,
            span,
        }
    }
}

/// Request data lent to a domain handler
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext<'a> {
    /// The request
    pub request: &'a Request,
    /// Correlation identifier
    pub correlation_id: &'a str,
    /// Authenticated caller; `None` on public endpoints
    pub authentication: Option<&'a Authentication>,
    /// Parsed query
    pub query: &'a QueryParameterModel,
    /// Validated body
    pub body: Option<&'a Bytes>,
}

impl HandlerContext<'_> {
    /// Decode the validated body
    ///
    /// # Errors
    ///
    /// Fails when there is no body or it does not decode into `T`. Both are
    /// internal faults: the body already passed schema validation.
    pub fn decode_body<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let body = self
            .body
            .ok_or_else(|| anyhow::anyhow!("handler expected a request body"))?;
        Ok(parse_json_bytes(&mut body.to_vec())?)
    }
}

/// Domain code invoked at the centre of the pipeline
///
/// Return a [`crate::registry::DomainError`] (or `DomainErrors`) for
/// client-visible failures; any other error becomes an opaque
/// `internal_error`. An error rolls the transaction back.
#[async_trait]
pub trait DomainHandler: Send + Sync {
    /// Handle one request
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        path: &PathParams,
        options: &StorageOptions,
        span: &Span,
        modeller: &mut ModellerHandle,
    ) -> anyhow::Result<Response>;
}

/// Ordered stage list
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    /// A pipeline with no stages
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage inside the existing ones
    #[must_use]
    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Stage names, outermost first
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run a matched request through every stage and the handler
    pub async fn run(&self, request: Request, matched: Match) -> Response {
        let span = info_span!(
            "request",
            method = %request.method,
            path = %request.path,
            correlation_id = field::Empty,
        );
        let mut ctx = RequestContext::new(request, matched, span.clone());
        self.drive(&mut ctx).instrument(span).await
    }

    async fn drive(&self, ctx: &mut RequestContext) -> Response {
        let mut entered = 0;
        let mut rejection = None;
        for stage in &self.stages {
            entered += 1;
            if let Outcome::Respond(response) = stage.before(ctx).await {
                tracing::debug!(stage = stage.name(), status = response.status, "Stage answered request");
                rejection = Some(response);
                break;
            }
        }

        let mut response = match rejection {
            Some(response) => response,
            None => invoke(ctx).await,
        };

        for stage in self.stages[..entered].iter().rev() {
            stage.after(ctx, &mut response).await;
        }
        response
    }
}

async fn invoke(ctx: &mut RequestContext) -> Response {
    let RequestContext {
        request,
        endpoint,
        correlation_id,
        authentication,
        modeller,
        path_params,
        query,
        storage_options,
        body,
        span,
        ..
    } = ctx;

    let Some(modeller) = modeller.as_mut() else {
        error!("Handler reached without an open transaction");
        return internal_error_response();
    };
    let handler_ctx = HandlerContext {
        request: &*request,
        correlation_id: correlation_id.as_str(),
        authentication: authentication.as_ref(),
        query: &*query,
        body: body.as_ref(),
    };

    match endpoint
        .handler
        .handle(&handler_ctx, path_params, storage_options, span, modeller)
        .await
    {
        Ok(response) => response,
        Err(err) => failure_response(&err),
    }
}
