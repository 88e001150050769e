//! # Pipeline Stages
//!
//! The standard stage set, outermost first:
//!
//! 1. correlation
//! 2. transaction
//! 3. authentication
//! 4. authorization
//! 5. row-level security
//! 6. body validation
//! 7. parameter validation
//! 8. wait (test directives)
//!
//! Every request gets its own transaction before any domain work, and that
//! transaction is committed or rolled back exactly once on the way out.

use crate::auth::{AuthMethod, AuthRejection, Authenticator};
use crate::config::PipelineConfig;
use crate::error::Error;
use crate::json::parse_json_bytes;
use crate::middleware::{
    Outcome, Pipeline, RequestContext, Stage, CORRELATION_ID_HEADER, LOCK_WAIT_TIMEOUT_HEADER,
    TX_ROLLBACK_HEADER, WAIT_SECONDS_HEADER,
};
use crate::modeller::{ModellerHandle, QueryPreparer, RepositoryPreparer, StorageBackend};
use crate::query::{build_query_parameters, ValueKinds};
use crate::registry::{codes, error_response, errors_response, internal_error_response, DomainError};
use crate::request::Request;
use crate::schema::{schema_error, SchemaBundle, SchemaCache};
use crate::server::Response;
use crate::storage::to_storage_options;
use crate::types::{convert_param, PathParams};
use crate::validation::{ValidationDetail, ValidationErrors, DATA_PATH_ROOT};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MAX_CORRELATION_ID_LEN: usize = 128;

/// Incoming correlation ID if usable, otherwise a fresh UUID
#[must_use]
pub fn correlation_id(incoming: Option<&str>) -> String {
    incoming
        .map(str::trim)
        .filter(|id| {
            !id.is_empty()
                && id.len() <= MAX_CORRELATION_ID_LEN
                && id.bytes().all(|b| b.is_ascii_graphic())
        })
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string)
}

/// Everything the standard stage set needs
#[derive(Clone)]
pub struct PipelineDeps {
    /// Opens one transaction per request
    pub backend: Arc<dyn StorageBackend>,
    /// Runs setup statements on each new transaction
    pub repository: Arc<dyn RepositoryPreparer>,
    /// Named statements handed to handlers
    pub queries: Arc<dyn QueryPreparer>,
    /// Compiled request schemas
    pub schemas: Arc<SchemaCache>,
    /// Credential validation
    pub authenticator: Arc<Authenticator>,
    /// Behaviour switches
    pub config: PipelineConfig,
}

impl Pipeline {
    /// The standard eight-stage pipeline
    #[must_use]
    pub fn standard(deps: PipelineDeps) -> Self {
        let PipelineDeps {
            backend,
            repository,
            queries,
            schemas,
            authenticator,
            config,
        } = deps;
        Self::new()
            .with_stage(CorrelationStage)
            .with_stage(TransactionStage {
                backend,
                repository,
                queries,
                honour_rollback: config.test_directives,
            })
            .with_stage(AuthenticationStage { authenticator })
            .with_stage(AuthorizationStage)
            .with_stage(RowLevelSecurityStage {
                setting: config.rls_setting,
            })
            .with_stage(BodyValidationStage {
                schemas: Arc::clone(&schemas),
            })
            .with_stage(ParameterStage { schemas })
            .with_stage(WaitStage {
                enabled: config.test_directives,
                max_wait: config.max_wait,
            })
    }
}

fn schema_fault(bundle: &SchemaBundle, err: &Error) -> Outcome {
    error!(schema = %bundle.identity(), error = %err, "Schema unusable at request time");
    Outcome::Respond(internal_error_response())
}

/// Assigns the correlation ID and logs the request boundary
#[derive(Debug, Clone, Copy)]
pub struct CorrelationStage;

#[async_trait]
impl Stage for CorrelationStage {
    fn name(&self) -> &'static str {
        "correlation"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Outcome {
        ctx.correlation_id = correlation_id(ctx.request.header(CORRELATION_ID_HEADER));
        ctx.span.record("correlation_id", ctx.correlation_id.as_str());
        info!(
            method = %ctx.request.method,
            path = %ctx.request.path,
            "Request received"
        );
        Outcome::Continue
    }

    async fn after(&self, ctx: &mut RequestContext, response: &mut Response) {
        response.set_header(CORRELATION_ID_HEADER, &ctx.correlation_id);
        info!(status = response.status, "Response sent");
    }
}

/// Opens the request transaction and finishes it exactly once
pub struct TransactionStage {
    backend: Arc<dyn StorageBackend>,
    repository: Arc<dyn RepositoryPreparer>,
    queries: Arc<dyn QueryPreparer>,
    honour_rollback: bool,
}

#[async_trait]
impl Stage for TransactionStage {
    fn name(&self) -> &'static str {
        "transaction"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Outcome {
        let tx = match self.backend.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                error!(error = %err, "Could not begin transaction");
                return Outcome::Respond(error_response(DomainError::from_code(codes::UNAVAILABLE)));
            }
        };
        match ModellerHandle::init(self.repository.as_ref(), Arc::clone(&self.queries), tx).await {
            Ok(handle) => ctx.modeller = Some(handle),
            Err(err) => {
                error!(error = %err, "Transaction preparation failed");
                return Outcome::Respond(internal_error_response());
            }
        }

        if self.honour_rollback {
            ctx.force_rollback = ctx
                .request
                .header(TX_ROLLBACK_HEADER)
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        }
        Outcome::Continue
    }

    async fn after(&self, ctx: &mut RequestContext, response: &mut Response) {
        let Some(modeller) = ctx.modeller.as_mut() else {
            return;
        };
        if !modeller.is_open() {
            debug!(completion = ?modeller.completion(), "Transaction already finished by handler");
            return;
        }

        if response.status >= 400 || ctx.force_rollback {
            if let Err(err) = modeller.rollback().await {
                error!(error = %err, "Rollback failed");
            }
            debug!(status = response.status, forced = ctx.force_rollback, "Transaction rolled back");
        } else if let Err(err) = modeller.commit().await {
            error!(error = %err, "Commit failed");
            *response = internal_error_response();
        } else {
            debug!("Transaction committed");
        }
    }
}

/// Resolves the caller on non-public endpoints
pub struct AuthenticationStage {
    authenticator: Arc<Authenticator>,
}

#[async_trait]
impl Stage for AuthenticationStage {
    fn name(&self) -> &'static str {
        "authentication"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Outcome {
        if ctx.endpoint.public {
            return Outcome::Continue;
        }
        match self.authenticator.authenticate(&ctx.request) {
            Ok(authentication) => {
                debug!(subject = %authentication.subject, method = ?authentication.method, "Authenticated");
                ctx.authentication = Some(authentication);
                Outcome::Continue
            }
            Err(AuthRejection::Unauthenticated(reason)) => {
                info!(reason = %reason, "Authentication rejected");
                Outcome::Respond(error_response(DomainError::from_code(codes::UNAUTHENTICATED)))
            }
            Err(AuthRejection::Misconfigured(err)) => {
                error!(error = %err, "Authentication misconfigured");
                Outcome::Respond(internal_error_response())
            }
        }
    }
}

/// Checks the caller's permissions against the endpoint's
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationStage;

#[async_trait]
impl Stage for AuthorizationStage {
    fn name(&self) -> &'static str {
        "authorization"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Outcome {
        if ctx.endpoint.public {
            return Outcome::Continue;
        }
        let Some(authentication) = ctx.authentication.as_ref() else {
            error!("Authorization reached without an authenticated caller");
            return Outcome::Respond(internal_error_response());
        };
        if authentication.permits(&ctx.endpoint.permissions) {
            Outcome::Continue
        } else {
            warn!(
                subject = %authentication.subject,
                required = ?ctx.endpoint.permissions,
                "Permission denied"
            );
            Outcome::Respond(error_response(DomainError::from_code(codes::UNAUTHORIZED)))
        }
    }
}

/// Scopes restricted API-key callers to their tenant
pub struct RowLevelSecurityStage {
    setting: String,
}

#[async_trait]
impl Stage for RowLevelSecurityStage {
    fn name(&self) -> &'static str {
        "row_level_security"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Outcome {
        if ctx.endpoint.public {
            return Outcome::Continue;
        }
        let Some(authentication) = ctx.authentication.as_ref() else {
            error!("Row-level security reached without an authenticated caller");
            return Outcome::Respond(internal_error_response());
        };
        if authentication.method != AuthMethod::ApiKey || !authentication.restricted {
            return Outcome::Continue;
        }

        let tenant = authentication
            .tenant
            .clone()
            .unwrap_or_else(|| authentication.subject.clone());
        let Some(modeller) = ctx.modeller.as_mut() else {
            error!("Row-level security reached without an open transaction");
            return Outcome::Respond(internal_error_response());
        };
        if let Err(err) = modeller.set_identity(&self.setting, &tenant).await {
            error!(error = %err, "Could not apply row-level security identity");
            return Outcome::Respond(internal_error_response());
        }
        debug!(tenant = %tenant, "Row-level security identity applied");
        Outcome::Continue
    }
}

/// Parses and validates bodies of mutating requests
pub struct BodyValidationStage {
    schemas: Arc<SchemaCache>,
}

#[async_trait]
impl Stage for BodyValidationStage {
    fn name(&self) -> &'static str {
        "body_validation"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Outcome {
        if !ctx.request.method.is_mutating() {
            return Outcome::Continue;
        }
        let Some(bundle) = ctx.endpoint.body_schema.as_ref() else {
            ctx.body = ctx.request.body().cloned();
            return Outcome::Continue;
        };

        let raw = ctx.request.body_bytes().unwrap_or_default();
        let value: Value = match parse_json_bytes(&mut raw.to_vec()) {
            Ok(value) => value,
            Err(err) => {
                debug!(error = %err, "Body is not JSON");
                let detail = ValidationDetail::new(DATA_PATH_ROOT, err.to_string());
                return Outcome::Respond(error_response(
                    DomainError::from_code(codes::INVALID_JSON).with_detail(detail),
                ));
            }
        };

        match self.schemas.validate(bundle, &value) {
            Ok(result) => {
                if let Some(err) = schema_error(result) {
                    debug!(details = err.validation_errors.len(), "Body rejected by schema");
                    return Outcome::Respond(error_response(err));
                }
            }
            Err(err) => return schema_fault(bundle, &err),
        }
        ctx.body = ctx.request.body().cloned();
        Outcome::Continue
    }
}

/// Converts and validates path and query parameters
pub struct ParameterStage {
    schemas: Arc<SchemaCache>,
}

impl ParameterStage {
    fn check(
        &self,
        bundle: &SchemaBundle,
        document: &Value,
        code: &str,
        errors: &mut Vec<DomainError>,
    ) -> Result<(), Error> {
        let result = self.schemas.validate(bundle, document)?;
        if let Some(err) = schema_error(result) {
            errors.push(err.recode(code));
        }
        Ok(())
    }
}

#[async_trait]
impl Stage for ParameterStage {
    fn name(&self) -> &'static str {
        "parameter_validation"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Outcome {
        let mut errors = Vec::new();

        let mut path = PathParams::new();
        let mut conversion = ValidationErrors::new();
        for (name, raw, param_type) in &ctx.raw_params {
            match convert_param(name, raw, *param_type) {
                Ok(value) => path.insert(name.clone(), value),
                Err(Error::InvalidPathParameter { reason, .. }) => {
                    conversion.add(ValidationDetail::field(name, reason));
                }
                Err(other) => conversion.add(ValidationDetail::field(name, other.to_string())),
            }
        }

        if !conversion.is_empty() {
            errors.push(DomainError::from_code(codes::INVALID_PATH_PARAMETER).with_details(conversion));
        } else if let Some(bundle) = ctx.endpoint.path_schema.as_ref() {
            if let Err(err) = self.check(bundle, &path.to_document(), codes::INVALID_PATH_PARAMETER, &mut errors) {
                return schema_fault(bundle, &err);
            }
        }

        let mut kinds = ValueKinds::new();
        if let Some(bundle) = ctx.endpoint.query_schema.as_ref() {
            let compiled = match self.schemas.compile(bundle) {
                Ok(compiled) => compiled,
                Err(err) => return schema_fault(bundle, &err),
            };
            kinds = compiled.value_kinds().clone();
            let document = ctx.request.query().to_document(&kinds);
            if let Some(err) = schema_error(compiled.validate(&document)) {
                errors.push(err.recode(codes::INVALID_QUERY_PARAMETER));
            }
        }

        if ctx.endpoint.collection {
            match build_query_parameters(ctx.request.query()) {
                Ok(model) => {
                    ctx.storage_options = to_storage_options(&model).with_kinds(kinds);
                    ctx.query = model;
                }
                Err(err) => errors.push(err),
            }
        }

        if !errors.is_empty() {
            return Outcome::Respond(errors_response(errors));
        }
        ctx.path_params = path;
        Outcome::Continue
    }
}

/// Applies lock-wait and completion-delay test directives
pub struct WaitStage {
    enabled: bool,
    max_wait: Duration,
}

fn seconds_header(request: &Request, header: &str) -> Option<f64> {
    let raw = request.header(header)?;
    match raw.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Some(secs),
        _ => {
            warn!(header = header, value = raw, "Ignoring malformed test directive");
            None
        }
    }
}

#[async_trait]
impl Stage for WaitStage {
    fn name(&self) -> &'static str {
        "wait"
    }

    async fn before(&self, ctx: &mut RequestContext) -> Outcome {
        if !self.enabled {
            return Outcome::Continue;
        }

        if let Some(secs) = seconds_header(&ctx.request, LOCK_WAIT_TIMEOUT_HEADER) {
            let Some(modeller) = ctx.modeller.as_mut() else {
                error!("Lock wait directive without an open transaction");
                return Outcome::Respond(internal_error_response());
            };
            // Whole seconds, rounded up.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let whole = secs.ceil() as u64;
            if let Err(err) = modeller.set_lock_timeout(whole).await {
                error!(error = %err, "Could not apply lock wait timeout");
                return Outcome::Respond(internal_error_response());
            }
        }

        ctx.wait = seconds_header(&ctx.request, WAIT_SECONDS_HEADER).map(|secs| {
            Duration::try_from_secs_f64(secs).map_or(self.max_wait, |wait| wait.min(self.max_wait))
        });
        Outcome::Continue
    }

    async fn after(&self, ctx: &mut RequestContext, _response: &mut Response) {
        if let Some(delay) = ctx.wait.take() {
            debug!(delay_ms = delay.as_millis(), "Delaying completion");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticApiKeys;
    use crate::route::Endpoint;
    use crate::router::{Method, Router};
    use crate::schema::SchemaBundle;
    use crate::testing::{number_query_ref, person_bundle, person_source, RecordingBackend, StaticHandler};
    use crate::modeller::{SetupStatements, StatementCatalog};
    use hyper::body::Bytes;
    use std::collections::HashMap;

    const API_KEYS: &str =
        "reader-key:ysolde:character.read,guild-key:guild-bot:character.read:guild-7,writer-key:quill:character.write";

    fn deps(backend: &RecordingBackend, test_directives: bool) -> PipelineDeps {
        PipelineDeps {
            backend: Arc::new(backend.clone()),
            repository: Arc::new(SetupStatements::new()),
            queries: Arc::new(StatementCatalog::new()),
            schemas: Arc::new(SchemaCache::new(person_source())),
            authenticator: Arc::new(
                Authenticator::new().with_api_keys(StaticApiKeys::parse(API_KEYS).unwrap()),
            ),
            config: PipelineConfig {
                test_directives,
                max_wait: Duration::from_millis(50),
                ..PipelineConfig::default()
            },
        }
    }

    fn router() -> Router {
        let mut router = Router::new();
        router
            .get("/health", Endpoint::new(StaticHandler::ok()).public())
            .unwrap();
        router
            .get(
                "/characters",
                Endpoint::new(StaticHandler::ok())
                    .permissions(["character.read"])
                    .query_schema(SchemaBundle::new(number_query_ref()))
                    .collection(),
            )
            .unwrap();
        router
            .get(
                "/characters/{id:int}",
                Endpoint::new(StaticHandler::ok()).permissions(["character.read"]),
            )
            .unwrap();
        router
            .post(
                "/characters",
                Endpoint::new(StaticHandler::ok())
                    .permissions(["character.write"])
                    .body_schema(person_bundle()),
            )
            .unwrap();
        router
            .delete(
                "/characters/{id:int}",
                Endpoint::new(StaticHandler::not_found()).permissions(["character.write"]),
            )
            .unwrap();
        router
            .put(
                "/characters/{id:int}",
                Endpoint::new(StaticHandler::fault()).permissions(["character.write"]),
            )
            .unwrap();
        router
    }

    async fn send(
        pipeline: &Pipeline,
        method: Method,
        path: &str,
        headers: &[(&str, &str)],
        body: Option<&str>,
    ) -> Response {
        let headers: HashMap<String, String> = headers
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let request = Request::new(method, path, headers, body.map(|b| Bytes::from(b.to_string())));
        let matched = router().match_route(method, &request.path).unwrap();
        pipeline.run(request, matched).await
    }

    fn body(response: &Response) -> Value {
        serde_json::from_str(&response.body).unwrap()
    }

    #[test]
    fn test_standard_stage_order() {
        let pipeline = Pipeline::standard(deps(&RecordingBackend::new(), false));
        assert_eq!(
            pipeline.stage_names(),
            vec![
                "correlation",
                "transaction",
                "authentication",
                "authorization",
                "row_level_security",
                "body_validation",
                "parameter_validation",
                "wait",
            ]
        );
    }

    #[tokio::test]
    async fn test_success_commits_once() {
        let backend = RecordingBackend::new();
        let pipeline = Pipeline::standard(deps(&backend, false));
        let response = send(&pipeline, Method::Get, "/characters/3", &[("X-Authorization", "reader-key")], None).await;

        assert_eq!(response.status, 200);
        assert_eq!(backend.begins(), 1);
        assert_eq!(backend.commits(), 1);
        assert_eq!(backend.rollbacks(), 0);
    }

    #[tokio::test]
    async fn test_handler_error_rolls_back_once() {
        let backend = RecordingBackend::new();
        let pipeline = Pipeline::standard(deps(&backend, false));
        let response = send(&pipeline, Method::Delete, "/characters/3", &[("X-Authorization", "writer-key")], None).await;

        assert_eq!(response.status, 404);
        assert_eq!(body(&response)[0]["code"], codes::RESOURCE_NOT_FOUND);
        assert_eq!(backend.commits(), 0);
        assert_eq!(backend.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_rollback_failure_keeps_original_error() {
        let backend = RecordingBackend::failing_rollback();
        let pipeline = Pipeline::standard(deps(&backend, false));
        let response = send(&pipeline, Method::Delete, "/characters/3", &[("X-Authorization", "writer-key")], None).await;

        assert_eq!(response.status, 404);
        assert_eq!(body(&response)[0]["code"], codes::RESOURCE_NOT_FOUND);
        assert_eq!(backend.rollbacks(), 1);
        assert_eq!(backend.commits(), 0);
    }

    #[tokio::test]
    async fn test_internal_fault_is_opaque() {
        let backend = RecordingBackend::new();
        let pipeline = Pipeline::standard(deps(&backend, false));
        let response = send(
            &pipeline,
            Method::Put,
            "/characters/3",
            &[("X-Authorization", "writer-key")],
            Some("{}"),
        )
        .await;

        assert_eq!(response.status, 500);
        assert_eq!(body(&response)[0]["code"], codes::INTERNAL_ERROR);
        assert!(!response.body.contains("disk"));
        assert_eq!(backend.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_forced_rollback_directive() {
        let backend = RecordingBackend::new();
        let pipeline = Pipeline::standard(deps(&backend, true));
        let headers = [("X-Authorization", "reader-key"), ("X-Tx-Rollback", "true")];
        let response = send(&pipeline, Method::Get, "/characters/3", &headers, None).await;

        assert_eq!(response.status, 200);
        assert_eq!(backend.commits(), 0);
        assert_eq!(backend.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_rollback_directive_ignored_when_disabled() {
        let backend = RecordingBackend::new();
        let pipeline = Pipeline::standard(deps(&backend, false));
        let headers = [("X-Authorization", "reader-key"), ("X-Tx-Rollback", "true")];
        send(&pipeline, Method::Get, "/characters/3", &headers, None).await;

        assert_eq!(backend.commits(), 1);
        assert_eq!(backend.rollbacks(), 0);
    }

    #[tokio::test]
    async fn test_commit_failure_becomes_internal_error() {
        let backend = RecordingBackend::failing_commit();
        let pipeline = Pipeline::standard(deps(&backend, false));
        let response = send(&pipeline, Method::Get, "/characters/3", &[("X-Authorization", "reader-key")], None).await;

        assert_eq!(response.status, 500);
        assert_eq!(body(&response)[0]["code"], codes::INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn test_empty_body_reports_every_missing_field() {
        let backend = RecordingBackend::new();
        let pipeline = Pipeline::standard(deps(&backend, false));
        let response = send(
            &pipeline,
            Method::Post,
            "/characters",
            &[("X-Authorization", "writer-key")],
            Some("{}"),
        )
        .await;

        assert_eq!(response.status, 400);
        let body = body(&response);
        assert_eq!(body.as_array().map(Vec::len), Some(1));
        assert_eq!(body[0]["code"], codes::BODY_NOT_MATCHING_JSON_SCHEMA);
        let mut paths: Vec<&str> = body[0]["validationErrors"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|d| d["dataPath"].as_str())
            .collect();
        paths.sort_unstable();
        assert_eq!(paths, vec!["$.age", "$.first_name", "$.last_name"]);
        assert_eq!(backend.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_json() {
        let pipeline = Pipeline::standard(deps(&RecordingBackend::new(), false));
        let response = send(
            &pipeline,
            Method::Post,
            "/characters",
            &[("X-Authorization", "writer-key")],
            Some("{\"first_name\":"),
        )
        .await;

        assert_eq!(response.status, 400);
        assert_eq!(body(&response)[0]["code"], codes::INVALID_JSON);
    }

    #[tokio::test]
    async fn test_valid_body_reaches_handler() {
        let backend = RecordingBackend::new();
        let pipeline = Pipeline::standard(deps(&backend, false));
        let response = send(
            &pipeline,
            Method::Post,
            "/characters",
            &[("X-Authorization", "writer-key")],
            Some(r#"{"first_name":"Ysolde","last_name":"Vane","age":31}"#),
        )
        .await;

        assert_eq!(response.status, 200);
        assert_eq!(backend.commits(), 1);
    }

    #[tokio::test]
    async fn test_query_schema_failure_is_recoded() {
        let pipeline = Pipeline::standard(deps(&RecordingBackend::new(), false));
        let response = send(
            &pipeline,
            Method::Get,
            "/characters?number=0",
            &[("X-Authorization", "reader-key")],
            None,
        )
        .await;

        assert_eq!(response.status, 400);
        assert_eq!(body(&response)[0]["code"], codes::INVALID_QUERY_PARAMETER);
    }

    #[tokio::test]
    async fn test_numeric_looking_text_query_value_accepted() {
        let pipeline = Pipeline::standard(deps(&RecordingBackend::new(), false));
        let response = send(
            &pipeline,
            Method::Get,
            "/characters?name=123&number=2",
            &[("X-Authorization", "reader-key")],
            None,
        )
        .await;

        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_parameter_errors_are_aggregated() {
        let pipeline = Pipeline::standard(deps(&RecordingBackend::new(), false));
        let response = send(
            &pipeline,
            Method::Get,
            "/characters?number=0&page_size=abc",
            &[("X-Authorization", "reader-key")],
            None,
        )
        .await;

        assert_eq!(response.status, 400);
        let body = body(&response);
        assert_eq!(body.as_array().map(Vec::len), Some(2));
        assert!(body
            .as_array()
            .unwrap()
            .iter()
            .all(|e| e["code"] == codes::INVALID_QUERY_PARAMETER));
    }

    #[tokio::test]
    async fn test_unconvertible_path_parameter() {
        let pipeline = Pipeline::standard(deps(&RecordingBackend::new(), false));
        let response = send(&pipeline, Method::Get, "/characters/abc", &[("X-Authorization", "reader-key")], None).await;

        assert_eq!(response.status, 400);
        let body = body(&response);
        assert_eq!(body[0]["code"], codes::INVALID_PATH_PARAMETER);
        assert_eq!(body[0]["validationErrors"][0]["dataPath"], "$.id");
    }

    #[tokio::test]
    async fn test_missing_credential_is_unauthenticated() {
        let backend = RecordingBackend::new();
        let pipeline = Pipeline::standard(deps(&backend, false));
        let response = send(&pipeline, Method::Get, "/characters/3", &[], None).await;

        assert_eq!(response.status, 401);
        assert_eq!(body(&response)[0]["code"], codes::UNAUTHENTICATED);
        assert_eq!(backend.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_missing_permission_is_unauthorized() {
        let pipeline = Pipeline::standard(deps(&RecordingBackend::new(), false));
        let response = send(
            &pipeline,
            Method::Post,
            "/characters",
            &[("X-Authorization", "reader-key")],
            Some("{}"),
        )
        .await;

        assert_eq!(response.status, 403);
        assert_eq!(body(&response)[0]["code"], codes::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_public_endpoint_skips_authentication() {
        let backend = RecordingBackend::new();
        let pipeline = Pipeline::standard(deps(&backend, false));
        let response = send(&pipeline, Method::Get, "/health", &[], None).await;

        assert_eq!(response.status, 200);
        assert_eq!(backend.commits(), 1);
    }

    #[tokio::test]
    async fn test_restricted_key_sets_tenant_identity() {
        let backend = RecordingBackend::new();
        let pipeline = Pipeline::standard(deps(&backend, false));
        send(&pipeline, Method::Get, "/characters/3", &[("X-Authorization", "guild-key")], None).await;
        assert_eq!(
            backend.identities(),
            vec![("app.tenant_id".to_string(), "guild-7".to_string())]
        );

        let unrestricted = RecordingBackend::new();
        let pipeline = Pipeline::standard(deps(&unrestricted, false));
        send(&pipeline, Method::Get, "/characters/3", &[("X-Authorization", "reader-key")], None).await;
        assert!(unrestricted.identities().is_empty());
    }

    #[tokio::test]
    async fn test_correlation_id_echoed_or_generated() {
        let pipeline = Pipeline::standard(deps(&RecordingBackend::new(), false));
        let echoed = send(&pipeline, Method::Get, "/health", &[("X-Correlation-ID", "trace-42")], None).await;
        assert_eq!(echoed.header(CORRELATION_ID_HEADER), Some("trace-42"));

        let generated = send(&pipeline, Method::Get, "/health", &[], None).await;
        let id = generated.header(CORRELATION_ID_HEADER).unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());

        let rejected = send(&pipeline, Method::Get, "/characters/3", &[], None).await;
        assert!(rejected.header(CORRELATION_ID_HEADER).is_some());
    }

    #[tokio::test]
    async fn test_lock_wait_directive() {
        let backend = RecordingBackend::new();
        let pipeline = Pipeline::standard(deps(&backend, true));
        let headers = [("X-Authorization", "reader-key"), ("X-Tx-Lock-Wait-Timeout-Seconds", "3")];
        send(&pipeline, Method::Get, "/characters/3", &headers, None).await;
        assert_eq!(backend.lock_timeouts(), vec![3]);

        let ignored = RecordingBackend::new();
        let pipeline = Pipeline::standard(deps(&ignored, true));
        let headers = [("X-Authorization", "reader-key"), ("X-Tx-Lock-Wait-Timeout-Seconds", "soon")];
        let response = send(&pipeline, Method::Get, "/characters/3", &headers, None).await;
        assert_eq!(response.status, 200);
        assert!(ignored.lock_timeouts().is_empty());
    }

    #[tokio::test]
    async fn test_wait_directive_is_capped() {
        let pipeline = Pipeline::standard(deps(&RecordingBackend::new(), true));
        let started = std::time::Instant::now();
        let response = send(&pipeline, Method::Get, "/health", &[("X-Wait-Seconds", "600")], None).await;
        assert_eq!(response.status, 200);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_huge_wait_directive_is_capped() {
        let pipeline = Pipeline::standard(deps(&RecordingBackend::new(), true));
        let started = std::time::Instant::now();
        for secs in ["1e300", "18446744073709551616"] {
            let response = send(&pipeline, Method::Get, "/health", &[("X-Wait-Seconds", secs)], None).await;
            assert_eq!(response.status, 200);
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_begin_failure_is_unavailable() {
        struct Down;
        #[async_trait]
        impl StorageBackend for Down {
            async fn begin(&self) -> crate::error::Result<Box<dyn crate::modeller::StorageTransaction>> {
                Err(Error::database("connection refused"))
            }
        }
        let mut deps = deps(&RecordingBackend::new(), false);
        deps.backend = Arc::new(Down);
        let pipeline = Pipeline::standard(deps);
        let response = send(&pipeline, Method::Get, "/health", &[], None).await;
        assert_eq!(response.status, 503);
        assert_eq!(body(&response)[0]["code"], codes::UNAVAILABLE);
    }
}
