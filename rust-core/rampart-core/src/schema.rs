//! # Schema Validator
//!
//! Compiles JSON-Schema bundles (a main document plus the documents it
//! references) and validates payloads against them.
//!
//! Compiled validators are memoized in a [`SchemaCache`] keyed by bundle
//! identity. The cache is an explicit object shared by reference; a warm
//! lookup only takes the read side of an `RwLock`, while first-time
//! compilation is serialized behind a mutex and re-checked under it, so each
//! bundle compiles exactly once for the life of the cache.

use crate::error::{Error, Result};
use crate::json::parse_json_bytes;
use crate::query::ValueKinds;
use crate::registry::{codes, DomainError};
use crate::validation::{ValidationDetail, ValidationErrors, ValidationResult, DATA_PATH_ROOT};
use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, Validator};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info};

const SCHEMA_URI_BASE: &str = "json-schema:///";

/// Location of one schema document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaRef {
    /// Configured schema root directory
    pub root_path: String,
    /// Directory below the root (may be empty)
    pub relative_location: String,
    /// File name
    pub name: String,
}

impl SchemaRef {
    /// Create a reference
    pub fn new(
        root_path: impl Into<String>,
        relative_location: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            root_path: root_path.into(),
            relative_location: relative_location.into(),
            name: name.into(),
        }
    }

    /// Path of the document relative to the schema root (`requests/create.json`)
    #[must_use]
    pub fn relative_path(&self) -> String {
        join_segments(&[&self.relative_location, &self.name])
    }

    /// Full path including the root (`/srv/schemas/requests/create.json`)
    #[must_use]
    pub fn full_path(&self) -> String {
        let relative = self.relative_path();
        if self.root_path.is_empty() {
            return relative;
        }
        format!("{}/{}", self.root_path.trim_end_matches('/'), relative)
    }

    /// URI the document is registered under for `$ref` resolution
    #[must_use]
    pub fn uri(&self) -> String {
        format!("{SCHEMA_URI_BASE}{}", self.relative_path())
    }
}

fn join_segments(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|part| part.split('/'))
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// A main schema document plus the documents it references
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaBundle {
    /// Entry document validated against
    pub main: SchemaRef,
    /// Documents reachable through `$ref`
    pub references: Vec<SchemaRef>,
}

impl SchemaBundle {
    /// A bundle with no referenced documents
    #[must_use]
    pub const fn new(main: SchemaRef) -> Self {
        Self {
            main,
            references: Vec::new(),
        }
    }

    /// Add a referenced document
    #[must_use]
    pub fn with_reference(mut self, reference: SchemaRef) -> Self {
        self.references.push(reference);
        self
    }

    /// Cache key: the concatenation of every constituent full path
    #[must_use]
    pub fn identity(&self) -> String {
        std::iter::once(&self.main)
            .chain(&self.references)
            .map(SchemaRef::full_path)
            .collect()
    }
}

/// Where schema documents are loaded from
pub trait SchemaSource: Send + Sync {
    /// Load and parse one document
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if the document is missing or malformed.
    fn load(&self, schema: &SchemaRef) -> Result<Value>;
}

/// Reads documents from the filesystem at their full path
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSchemaSource;

impl SchemaSource for FileSchemaSource {
    fn load(&self, schema: &SchemaRef) -> Result<Value> {
        let path = PathBuf::from(schema.full_path());
        let mut bytes = std::fs::read(&path).map_err(|e| Error::Schema {
            location: path.display().to_string(),
            reason: format!("cannot read document: {e}"),
        })?;
        parse_json_bytes(&mut bytes).map_err(|e| Error::Schema {
            location: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Serves documents held in memory, keyed by full path
#[derive(Debug, Clone, Default)]
pub struct MemorySchemaSource {
    documents: HashMap<String, Value>,
}

impl MemorySchemaSource {
    /// Create an empty source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document for `schema`
    #[must_use]
    pub fn with_document(mut self, schema: &SchemaRef, document: Value) -> Self {
        self.documents.insert(schema.full_path(), document);
        self
    }
}

impl SchemaSource for MemorySchemaSource {
    fn load(&self, schema: &SchemaRef) -> Result<Value> {
        self.documents
            .get(&schema.full_path())
            .cloned()
            .ok_or_else(|| Error::Schema {
                location: schema.full_path(),
                reason: "document not found".to_string(),
            })
    }
}

/// Something a schema can be validated against
#[derive(Debug, Clone, Copy)]
pub enum Document<'a> {
    /// Raw JSON bytes
    Bytes(&'a [u8]),
    /// JSON text
    Text(&'a str),
    /// Already-parsed value
    Value(&'a Value),
}

impl<'a> From<&'a [u8]> for Document<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a> From<&'a str> for Document<'a> {
    fn from(text: &'a str) -> Self {
        Self::Text(text)
    }
}

impl<'a> From<&'a Value> for Document<'a> {
    fn from(value: &'a Value) -> Self {
        Self::Value(value)
    }
}

/// A ready-to-use validator for one bundle
pub struct CompiledSchema {
    identity: String,
    validator: Validator,
    kinds: ValueKinds,
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl CompiledSchema {
    /// Bundle identity this schema was compiled from
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Value kinds the main document declares for its top-level properties
    #[must_use]
    pub const fn value_kinds(&self) -> &ValueKinds {
        &self.kinds
    }

    /// Validate a parsed instance
    ///
    /// Composition failures (`anyOf`, `oneOf`, `not`) are reported only when
    /// no more specific error was found.
    #[must_use]
    pub fn validate(&self, instance: &Value) -> ValidationResult {
        let mut specific = ValidationErrors::new();
        let mut conditional = ValidationErrors::new();
        for error in self.validator.iter_errors(instance) {
            let detail = normalize(&error);
            if is_conditional(&error.kind) {
                conditional.add(detail);
            } else {
                specific.add(detail);
            }
        }
        match (specific.is_empty(), conditional.is_empty()) {
            (true, true) => ValidationResult::valid(),
            (false, _) => ValidationResult::invalid(specific),
            (true, false) => ValidationResult::invalid(conditional),
        }
    }
}

const fn is_conditional(kind: &ValidationErrorKind) -> bool {
    matches!(
        kind,
        ValidationErrorKind::AnyOf { .. }
            | ValidationErrorKind::OneOfNotValid { .. }
            | ValidationErrorKind::OneOfMultipleValid { .. }
            | ValidationErrorKind::Not { .. }
    )
}

fn normalize(error: &jsonschema::ValidationError<'_>) -> ValidationDetail {
    let mut pointer = error.instance_path.to_string();
    if let ValidationErrorKind::Required { property } = &error.kind {
        if let Some(name) = property.as_str() {
            pointer.push('/');
            pointer.push_str(&name.replace('~', "~0").replace('/', "~1"));
        }
    }
    let data_path = data_path_from_pointer(&pointer);

    let field = data_path
        .rsplit(['.', '['])
        .next()
        .unwrap_or_default()
        .trim_end_matches(']')
        .to_string();
    let mut subjects = vec![format!("\"{field}\""), field];
    if let Ok(instance) = serde_json::to_string(error.instance.as_ref()) {
        subjects.push(instance);
    }
    ValidationDetail::new(data_path, strip_subject(&error.to_string(), &subjects))
}

/// Drop a leading field name or instance value from a generated message
fn strip_subject(message: &str, subjects: &[String]) -> String {
    for subject in subjects.iter().filter(|s| !s.is_empty()) {
        if let Some(rest) = message.strip_prefix(subject.as_str()) {
            let rest = rest.trim_start_matches(':').trim_start();
            if !rest.is_empty() && rest.len() < message.len() {
                return rest.to_string();
            }
        }
    }
    message.to_string()
}

/// Convert a JSON pointer (`/a/0/b`) to a data path (`$.a[0].b`)
#[must_use]
pub fn data_path_from_pointer(pointer: &str) -> String {
    let mut path = String::from(DATA_PATH_ROOT);
    for segment in pointer.split('/').filter(|s| !s.is_empty()) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            path.push('[');
            path.push_str(&segment);
            path.push(']');
        } else {
            path.push('.');
            path.push_str(&segment);
        }
    }
    path
}

/// Build the client-facing error for a failed result
///
/// Callers re-code it (`invalid_query_parameter`, ...) when the document was
/// synthesized from something other than a request body.
#[must_use]
pub fn schema_error(result: ValidationResult) -> Option<DomainError> {
    if result.valid {
        return None;
    }
    Some(DomainError::from_code(codes::BODY_NOT_MATCHING_JSON_SCHEMA).with_details(result.errors))
}

/// Memoizing compiler for schema bundles
pub struct SchemaCache {
    source: Arc<dyn SchemaSource>,
    entries: RwLock<HashMap<String, Arc<CompiledSchema>>>,
    compile_lock: Mutex<()>,
    compilations: AtomicUsize,
}

impl std::fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCache")
            .field("compilations", &self.compile_count())
            .finish_non_exhaustive()
    }
}

impl SchemaCache {
    /// Create a cache loading documents from `source`
    pub fn new(source: impl SchemaSource + 'static) -> Self {
        Self {
            source: Arc::new(source),
            entries: RwLock::new(HashMap::new()),
            compile_lock: Mutex::new(()),
            compilations: AtomicUsize::new(0),
        }
    }

    /// Number of compilations performed so far
    #[must_use]
    pub fn compile_count(&self) -> usize {
        self.compilations.load(Ordering::SeqCst)
    }

    fn cached(&self, key: &str) -> Option<Arc<CompiledSchema>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Compile `bundle`, or return the memoized validator
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if a document is missing, malformed, or
    /// fails to compile. This is a configuration fault, not a request fault.
    pub fn compile(&self, bundle: &SchemaBundle) -> Result<Arc<CompiledSchema>> {
        let key = bundle.identity();
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }

        let _guard = self
            .compile_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }

        let compiled = Arc::new(self.build(bundle, key.clone())?);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    fn build(&self, bundle: &SchemaBundle, identity: String) -> Result<CompiledSchema> {
        self.compilations.fetch_add(1, Ordering::SeqCst);
        debug!(bundle = %identity, "Compiling schema bundle");

        let mut main = self.source.load(&bundle.main)?;
        if let Value::Object(map) = &mut main {
            map.entry("$id")
                .or_insert_with(|| Value::String(bundle.main.uri()));
        }

        let mut resources = Vec::with_capacity(bundle.references.len());
        for reference in &bundle.references {
            let document = self.source.load(reference)?;
            resources.push((reference.uri(), Draft::Draft7.create_resource(document)));
        }

        let validator = jsonschema::options()
            .with_draft(Draft::Draft7)
            .with_resources(resources.into_iter())
            .build(&main)
            .map_err(|e| Error::Schema {
                location: identity.clone(),
                reason: e.to_string(),
            })?;

        Ok(CompiledSchema {
            identity,
            validator,
            kinds: ValueKinds::from_schema(&main),
        })
    }

    /// Compile every bundle up front so configuration faults surface at start-up
    ///
    /// # Errors
    ///
    /// Returns the first compilation failure.
    pub fn preload<'a>(&self, bundles: impl IntoIterator<Item = &'a SchemaBundle>) -> Result<()> {
        let mut count = 0usize;
        for bundle in bundles {
            self.compile(bundle)?;
            count += 1;
        }
        info!(bundles = count, "Schema bundles compiled");
        Ok(())
    }

    /// Validate a document against `bundle`
    ///
    /// Bytes and text that are not JSON at all produce a single detail at
    /// the document root.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if the bundle cannot be compiled.
    pub fn validate<'d>(
        &self,
        bundle: &SchemaBundle,
        document: impl Into<Document<'d>>,
    ) -> Result<ValidationResult> {
        let compiled = self.compile(bundle)?;
        let parsed;
        let instance = match document.into() {
            Document::Value(value) => value,
            Document::Bytes(bytes) => match parse_json_bytes::<Value>(&mut bytes.to_vec()) {
                Ok(value) => {
                    parsed = value;
                    &parsed
                }
                Err(e) => return Ok(not_json(&e)),
            },
            Document::Text(text) => match parse_json_bytes::<Value>(&mut text.as_bytes().to_vec()) {
                Ok(value) => {
                    parsed = value;
                    &parsed
                }
                Err(e) => return Ok(not_json(&e)),
            },
        };
        Ok(compiled.validate(instance))
    }
}

fn not_json(err: &Error) -> ValidationResult {
    let mut errors = ValidationErrors::new();
    errors.add(ValidationDetail::new(
        DATA_PATH_ROOT,
        format!("is not valid JSON: {err}"),
    ));
    ValidationResult::invalid(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Barrier;
    use std::thread;

    fn person_ref() -> SchemaRef {
        SchemaRef::new("/schemas", "requests", "person.json")
    }

    fn person_cache() -> SchemaCache {
        let source = MemorySchemaSource::new().with_document(
            &person_ref(),
            json!({
                "type": "object",
                "required": ["first_name", "last_name", "age"],
                "properties": {
                    "first_name": {"type": "string"},
                    "last_name": {"type": "string"},
                    "age": {"type": "integer", "minimum": 0}
                }
            }),
        );
        SchemaCache::new(source)
    }

    #[test]
    fn test_identity_concatenates_full_paths() {
        let bundle = SchemaBundle::new(SchemaRef::new("/s", "a", "main.json"))
            .with_reference(SchemaRef::new("/s", "", "defs.json"));
        assert_eq!(bundle.identity(), "/s/a/main.json/s/defs.json");
    }

    #[test]
    fn test_relative_path_skips_empty_segments() {
        let schema = SchemaRef::new("/root/", "./nested/", "x.json");
        assert_eq!(schema.relative_path(), "nested/x.json");
        assert_eq!(schema.full_path(), "/root/nested/x.json");
        assert_eq!(schema.uri(), "json-schema:///nested/x.json");
    }

    #[test]
    fn test_missing_required_fields_reported_individually() {
        let cache = person_cache();
        let result = cache
            .validate(&SchemaBundle::new(person_ref()), "{}")
            .unwrap();

        assert!(!result.valid);
        let mut paths: Vec<_> = result
            .errors
            .errors
            .iter()
            .map(|e| e.data_path.as_str())
            .collect();
        paths.sort_unstable();
        assert_eq!(paths, vec!["$.age", "$.first_name", "$.last_name"]);
        assert!(result.errors.errors.iter().all(|e| e.message.contains("required")));
        assert!(result.errors.errors.iter().all(|e| !e.message.starts_with('"')));
    }

    #[test]
    fn test_valid_document_accepted() {
        let cache = person_cache();
        let doc = json!({"first_name": "Ada", "last_name": "Lovelace", "age": 36});
        let result = cache.validate(&SchemaBundle::new(person_ref()), &doc).unwrap();
        assert!(result.valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_compiled_schema_carries_value_kinds() {
        let compiled = person_cache().compile(&SchemaBundle::new(person_ref())).unwrap();
        assert_eq!(compiled.value_kinds().kind_of("age"), crate::query::ValueKind::Integer);
        assert_eq!(compiled.value_kinds().kind_of("first_name"), crate::query::ValueKind::Text);
    }

    #[test]
    fn test_bytes_that_are_not_json() {
        let cache = person_cache();
        let result = cache
            .validate(&SchemaBundle::new(person_ref()), b"{not json".as_slice())
            .unwrap();
        assert!(!result.valid);
        assert_eq!(result.errors.errors[0].data_path, "$");
    }

    #[test]
    fn test_repeated_validation_compiles_once() {
        let cache = person_cache();
        let bundle = SchemaBundle::new(person_ref());
        for _ in 0..5 {
            cache.validate(&bundle, "{}").unwrap();
        }
        assert_eq!(cache.compile_count(), 1);
    }

    #[test]
    fn test_concurrent_first_use_compiles_once() {
        let cache = Arc::new(person_cache());
        let bundle = SchemaBundle::new(person_ref());
        let workers = 8;
        let barrier = Arc::new(Barrier::new(workers));

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                let bundle = bundle.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache.validate(&bundle, "{}").unwrap().valid
                })
            })
            .collect();

        for handle in handles {
            assert!(!handle.join().unwrap());
        }
        assert_eq!(cache.compile_count(), 1);
    }

    #[test]
    fn test_missing_document_is_schema_error() {
        let cache = SchemaCache::new(MemorySchemaSource::new());
        let err = cache
            .compile(&SchemaBundle::new(person_ref()))
            .unwrap_err();
        assert!(matches!(err, Error::Schema { .. }));
    }

    #[test]
    fn test_references_resolved_across_documents() {
        let main = SchemaRef::new("/schemas", "requests", "create.json");
        let defs = SchemaRef::new("/schemas", "common", "defs.json");
        let source = MemorySchemaSource::new()
            .with_document(
                &main,
                json!({
                    "type": "object",
                    "properties": {"name": {"$ref": "../common/defs.json#/definitions/name"}}
                }),
            )
            .with_document(
                &defs,
                json!({"definitions": {"name": {"type": "string", "minLength": 3}}}),
            );
        let cache = SchemaCache::new(source);
        let bundle = SchemaBundle::new(main).with_reference(defs);

        let result = cache.validate(&bundle, r#"{"name": "ab"}"#).unwrap();
        assert!(!result.valid);
        assert_eq!(result.errors.errors[0].data_path, "$.name");
    }

    #[test]
    fn test_conditional_errors_suppressed_when_specific_present() {
        let main = SchemaRef::new("", "", "choice.json");
        let source = MemorySchemaSource::new().with_document(
            &main,
            json!({
                "type": "object",
                "required": ["kind"],
                "properties": {
                    "kind": {"type": "string"},
                    "value": {"anyOf": [{"type": "integer"}, {"type": "boolean"}]}
                }
            }),
        );
        let cache = SchemaCache::new(source);
        let bundle = SchemaBundle::new(main);

        let both = cache.validate(&bundle, r#"{"value": "x"}"#).unwrap();
        assert_eq!(both.errors.len(), 1);
        assert_eq!(both.errors.errors[0].data_path, "$.kind");

        let only_conditional = cache
            .validate(&bundle, r#"{"kind": "k", "value": "x"}"#)
            .unwrap();
        assert_eq!(only_conditional.errors.len(), 1);
        assert_eq!(only_conditional.errors.errors[0].data_path, "$.value");
    }

    #[test]
    fn test_array_paths_use_brackets() {
        assert_eq!(data_path_from_pointer("/a/0/b"), "$.a[0].b");
        assert_eq!(data_path_from_pointer(""), "$");
        assert_eq!(data_path_from_pointer("/x~1y"), "$.x/y");
    }

    #[test]
    fn test_strip_subject() {
        let subjects = vec!["\"age\"".to_string(), "age".to_string()];
        assert_eq!(
            strip_subject("\"age\" is a required property", &subjects),
            "is a required property"
        );
        assert_eq!(strip_subject("something else", &subjects), "something else");
    }

    #[test]
    fn test_schema_error_code() {
        let cache = person_cache();
        let result = cache.validate(&SchemaBundle::new(person_ref()), "{}").unwrap();
        let err = schema_error(result).unwrap();
        assert_eq!(err.code, codes::BODY_NOT_MATCHING_JSON_SCHEMA);
        assert_eq!(err.validation_errors.len(), 3);
        assert!(schema_error(ValidationResult::valid()).is_none());
    }
}
