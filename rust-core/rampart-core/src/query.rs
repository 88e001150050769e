//! # Query Parameters
//!
//! Turns a multi-valued query-string bag into typed filter, sort and paging
//! directives.
//!
//! Grammar: `col=v` (equality), `col:op=v` with `op` one of
//! `eq ne lt lte gt gte like ilike`, `col[]=a&col[]=b` (one list-valued
//! directive), `sort_column=[-]col` (repeatable), `page_size=N`,
//! `page_number=N`. The reserved keys are taken out of the bag before the
//! rest is read as filters.

use crate::registry::{codes, DomainError};
use crate::validation::{ValidationDetail, ValidationErrors};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved key: rows per page
pub const PAGE_SIZE: &str = "page_size";
/// Reserved key: 1-based page index
pub const PAGE_NUMBER: &str = "page_number";
/// Reserved key: sort order
pub const SORT_COLUMN: &str = "sort_column";

/// Default rows per page
pub const DEFAULT_PAGE_SIZE: u32 = 10;
/// Default page
pub const DEFAULT_PAGE_NUMBER: u32 = 1;
/// Column sorted on when the caller names none
pub const DEFAULT_SORT_COLUMN: &str = "created_at";

const ARRAY_SUFFIX: &str = "[]";

/// Query-string values grouped by key, in key order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamBag {
    values: BTreeMap<String, Vec<String>>,
}

impl ParamBag {
    /// Create an empty bag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a raw query string (`a=1&a=2&b`)
    ///
    /// Percent-escapes are decoded as UTF-8 and `+` is a space. A key
    /// without `=` gets an empty value.
    #[must_use]
    pub fn from_query_string(query: &str) -> Self {
        let mut bag = Self::new();
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            bag.insert(url_decode(key), url_decode(value));
        }
        bag
    }

    /// Append a value under `key`
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.entry(key.into()).or_default().push(value.into());
    }

    /// All values for `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.values.get(key).map(Vec::as_slice)
    }

    /// Take every value for `key` out of the bag
    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.values.remove(key)
    }

    /// Check if the bag is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate keys with their values
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Build the JSON document a query schema validates
    ///
    /// Array keys (`tags[]`) become arrays under their bare name, as do
    /// keys that appear more than once. Values are typed by `kinds`; keys
    /// it does not declare stay strings.
    #[must_use]
    pub fn to_document(&self, kinds: &ValueKinds) -> Value {
        let mut doc = Map::new();
        for (key, values) in &self.values {
            let (name, is_array) = match key.strip_suffix(ARRAY_SUFFIX) {
                Some(name) => (name, true),
                None => (key.as_str(), false),
            };
            let kind = kinds.kind_of(name);
            let value = if is_array || values.len() > 1 {
                Value::Array(values.iter().map(|v| kind.to_json(v)).collect())
            } else {
                values.first().map_or(Value::Null, |v| kind.to_json(v))
            };
            doc.insert(name.to_string(), value);
        }
        Value::Object(doc)
    }
}

/// How a raw query value is read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueKind {
    /// Kept as the raw string
    #[default]
    Text,
    /// `i64`
    Integer,
    /// Integer or finite float
    Number,
    /// `true` / `false`
    Boolean,
}

impl ValueKind {
    /// Kind named by a JSON-Schema `type` keyword
    #[must_use]
    pub fn from_schema_type(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::Text),
            "integer" => Some(Self::Integer),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            _ => None,
        }
    }

    /// Read `raw` as this kind; values that do not parse stay strings
    #[must_use]
    pub fn to_json(self, raw: &str) -> Value {
        let typed = match self {
            Self::Text => None,
            Self::Integer => raw.parse::<i64>().ok().map(Value::from),
            Self::Number => raw.parse::<i64>().ok().map(Value::from).or_else(|| {
                raw.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
            }),
            Self::Boolean => match raw {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
        };
        typed.unwrap_or_else(|| Value::String(raw.to_string()))
    }
}

/// Declared value kinds of query keys, by column name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueKinds {
    kinds: BTreeMap<String, ValueKind>,
}

impl ValueKinds {
    /// Nothing declared; every value is text
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the kind of `column`
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, kind: ValueKind) -> Self {
        self.kinds.insert(column.into(), kind);
        self
    }

    /// Kind of a query key (`col`, `col:op` or `col[]`)
    #[must_use]
    pub fn kind_of(&self, key: &str) -> ValueKind {
        let key = key.strip_suffix(ARRAY_SUFFIX).unwrap_or(key);
        self.kinds
            .get(key)
            .or_else(|| {
                let (column, _) = key.split_once(':')?;
                self.kinds.get(column.strip_suffix(ARRAY_SUFFIX).unwrap_or(column))
            })
            .copied()
            .unwrap_or_default()
    }

    /// Kinds declared by the top-level `properties` of a schema document
    ///
    /// A `type` list uses its first non-null entry; array properties use
    /// the type of their `items`.
    #[must_use]
    pub fn from_schema(schema: &Value) -> Self {
        let mut kinds = Self::new();
        let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
            return kinds;
        };
        for (name, property) in properties {
            let declared = match schema_type(property) {
                Some("array") => property.get("items").and_then(schema_type),
                other => other,
            };
            if let Some(kind) = declared.and_then(ValueKind::from_schema_type) {
                kinds.kinds.insert(name.clone(), kind);
            }
        }
        kinds
    }
}

fn schema_type(property: &Value) -> Option<&str> {
    match property.get("type")? {
        Value::String(name) => Some(name.as_str()),
        Value::Array(names) => names.iter().filter_map(Value::as_str).find(|n| *n != "null"),
        _ => None,
    }
}

/// Percent-decode one query-string component
fn url_decode(s: &str) -> String {
    percent_decode(s, true)
}

/// Percent-decode `s`, reading `+` as a space when `plus_as_space` is set
///
/// Malformed escapes are kept as written.
pub(crate) fn percent_decode(s: &str, plus_as_space: bool) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' if plus_as_space => out.push(b' '),
            b'%' if i + 3 <= bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                if let Some(byte) = hex {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(b'%');
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Filter comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `=` / `IN`
    Equals,
    /// `<>` / `NOT IN`
    NotEquals,
    /// `<`
    LessThan,
    /// `<=`
    LessOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterOrEqual,
    /// Case-sensitive pattern match
    Like,
    /// Case-insensitive pattern match
    CaseInsensitiveLike,
}

impl Operator {
    /// Parse a key suffix (`gte` from `level:gte`)
    #[must_use]
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "eq" => Some(Self::Equals),
            "ne" => Some(Self::NotEquals),
            "lt" => Some(Self::LessThan),
            "lte" => Some(Self::LessOrEqual),
            "gt" => Some(Self::GreaterThan),
            "gte" => Some(Self::GreaterOrEqual),
            "like" => Some(Self::Like),
            "ilike" => Some(Self::CaseInsensitiveLike),
            _ => None,
        }
    }

    /// The suffix spelling
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Equals => "eq",
            Self::NotEquals => "ne",
            Self::LessThan => "lt",
            Self::LessOrEqual => "lte",
            Self::GreaterThan => "gt",
            Self::GreaterOrEqual => "gte",
            Self::Like => "like",
            Self::CaseInsensitiveLike => "ilike",
        }
    }

    const fn is_lower_bound(self) -> bool {
        matches!(self, Self::GreaterThan | Self::GreaterOrEqual)
    }

    const fn is_upper_bound(self) -> bool {
        matches!(self, Self::LessThan | Self::LessOrEqual)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// A filter value: one string, or a list from an array key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    /// `col=v`
    Single(String),
    /// `col[]=a&col[]=b`
    Multi(Vec<String>),
}

/// Upper bound folded into a range directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondValue {
    /// `LessThan` or `LessOrEqual`
    pub operator: Operator,
    /// Bound value
    pub value: String,
}

/// One storage filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParameterDirective {
    /// Column filtered on
    pub column: String,
    /// Comparison
    pub operator: Operator,
    /// Compared value
    pub value: QueryValue,
    /// Upper bound when a `gt`/`gte` and an `lt`/`lte` on the same column were collapsed
    pub second_value: Option<SecondValue>,
}

/// One ordering term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDirective {
    /// Column sorted on
    pub column: String,
    /// Descending when true
    pub descending: bool,
}

impl SortDirective {
    /// Ascending order on `column`
    pub fn ascending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    /// Descending order on `column`
    pub fn descending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// Requested page; both fields are at least 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDirective {
    /// Rows per page
    pub page_size: u32,
    /// 1-based page index
    pub page_number: u32,
}

impl Default for PageDirective {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_number: DEFAULT_PAGE_NUMBER,
        }
    }
}

/// Everything a collection endpoint needs from its query string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParameterModel {
    /// Filters, grouped by column in key order
    pub filters: Vec<QueryParameterDirective>,
    /// Ordering, in the order given
    pub sort: Vec<SortDirective>,
    /// Paging
    pub page: PageDirective,
}

impl Default for QueryParameterModel {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            sort: vec![SortDirective::descending(DEFAULT_SORT_COLUMN)],
            page: PageDirective::default(),
        }
    }
}

/// Parse a parameter bag into a model
///
/// # Errors
///
/// Returns `validation.invalid_query_parameter` listing every malformed
/// parameter: paging values that are not exactly one integer >= 1, sort
/// entries that are empty or contain commas, unknown operator suffixes,
/// invalid column names, and list values on range operators.
pub fn build_query_parameters(bag: &ParamBag) -> Result<QueryParameterModel, DomainError> {
    let mut bag = bag.clone();
    let mut problems = ValidationErrors::new();

    let page_size = take_positive(&mut bag, PAGE_SIZE, DEFAULT_PAGE_SIZE, &mut problems);
    let page_number = take_positive(&mut bag, PAGE_NUMBER, DEFAULT_PAGE_NUMBER, &mut problems);
    let sort = take_sort(&mut bag, &mut problems);
    let filters = read_filters(&bag, &mut problems);

    if !problems.is_empty() {
        return Err(DomainError::from_code(codes::INVALID_QUERY_PARAMETER).with_details(problems));
    }
    Ok(QueryParameterModel {
        filters,
        sort,
        page: PageDirective {
            page_size,
            page_number,
        },
    })
}

fn take_positive(bag: &mut ParamBag, key: &str, default: u32, problems: &mut ValidationErrors) -> u32 {
    let Some(values) = bag.remove(key) else {
        return default;
    };
    let [value] = values.as_slice() else {
        problems.add(ValidationDetail::field(key, "must be given exactly once"));
        return default;
    };
    match value.trim().parse::<i64>() {
        Ok(n) if n >= 1 => u32::try_from(n).unwrap_or_else(|_| {
            problems.add(ValidationDetail::field(key, "is too large"));
            default
        }),
        Ok(_) => {
            problems.add(ValidationDetail::field(key, "must be at least 1"));
            default
        }
        Err(_) => {
            problems.add(ValidationDetail::field(key, "must be an integer"));
            default
        }
    }
}

fn take_sort(bag: &mut ParamBag, problems: &mut ValidationErrors) -> Vec<SortDirective> {
    let Some(values) = bag.remove(SORT_COLUMN) else {
        return vec![SortDirective::descending(DEFAULT_SORT_COLUMN)];
    };
    let mut sort = Vec::with_capacity(values.len());
    for raw in &values {
        let raw = raw.trim();
        let (column, descending) = match raw.strip_prefix('-') {
            Some(column) => (column, true),
            None => (raw, false),
        };
        if raw.contains(',') {
            problems.add(ValidationDetail::field(
                SORT_COLUMN,
                "takes one column per value; repeat the parameter instead of using commas",
            ));
        } else if !is_column_name(column) {
            problems.add(ValidationDetail::field(
                SORT_COLUMN,
                format!("'{raw}' is not a valid column"),
            ));
        } else {
            sort.push(SortDirective {
                column: column.to_string(),
                descending,
            });
        }
    }
    sort
}

fn is_column_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

fn read_filters(bag: &ParamBag, problems: &mut ValidationErrors) -> Vec<QueryParameterDirective> {
    let mut by_column: BTreeMap<String, Vec<QueryParameterDirective>> = BTreeMap::new();

    for (key, values) in bag.iter() {
        let (base, operator) = match key.rsplit_once(':') {
            Some((base, suffix)) => match Operator::from_suffix(suffix) {
                Some(op) => (base, op),
                None => {
                    problems.add(ValidationDetail::field(
                        key,
                        format!("unknown operator '{suffix}'"),
                    ));
                    continue;
                }
            },
            None => (key, Operator::Equals),
        };
        let (column, is_array) = match base.strip_suffix(ARRAY_SUFFIX) {
            Some(column) => (column, true),
            None => (base, false),
        };
        if !is_column_name(column) {
            problems.add(ValidationDetail::field(key, "is not a valid column"));
            continue;
        }

        let directives = by_column.entry(column.to_string()).or_default();
        if is_array {
            if operator.is_lower_bound() || operator.is_upper_bound() {
                problems.add(ValidationDetail::field(
                    key,
                    format!("operator '{operator}' does not accept a list"),
                ));
                continue;
            }
            directives.push(QueryParameterDirective {
                column: column.to_string(),
                operator,
                value: QueryValue::Multi(values.to_vec()),
                second_value: None,
            });
        } else {
            directives.extend(values.iter().map(|v| QueryParameterDirective {
                column: column.to_string(),
                operator,
                value: QueryValue::Single(v.clone()),
                second_value: None,
            }));
        }
    }

    by_column.into_values().flat_map(collapse_range).collect()
}

/// Fold a lone lower bound and a lone upper bound on one column into one directive
fn collapse_range(mut directives: Vec<QueryParameterDirective>) -> Vec<QueryParameterDirective> {
    let lower: Vec<usize> = positions(&directives, Operator::is_lower_bound);
    let upper: Vec<usize> = positions(&directives, Operator::is_upper_bound);
    let (&[lo], &[hi]) = (lower.as_slice(), upper.as_slice()) else {
        return directives;
    };
    let upper = directives.remove(hi);
    let lo = if hi < lo { lo - 1 } else { lo };
    if let QueryValue::Single(value) = upper.value {
        directives[lo].second_value = Some(SecondValue {
            operator: upper.operator,
            value,
        });
    }
    directives
}

fn positions(directives: &[QueryParameterDirective], pred: fn(Operator) -> bool) -> Vec<usize> {
    directives
        .iter()
        .enumerate()
        .filter(|(_, d)| pred(d.operator))
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(query: &str) -> ParamBag {
        ParamBag::from_query_string(query)
    }

    fn error_paths(err: &DomainError) -> Vec<&str> {
        err.validation_errors
            .errors
            .iter()
            .map(|d| d.data_path.as_str())
            .collect()
    }

    #[test]
    fn test_from_query_string_multi_valued() {
        let b = bag("a=1&a=2&b=x+y&c=%E2%9C%93&flag");
        assert_eq!(b.get("a"), Some(&["1".to_string(), "2".to_string()][..]));
        assert_eq!(b.get("b"), Some(&["x y".to_string()][..]));
        assert_eq!(b.get("c"), Some(&["\u{2713}".to_string()][..]));
        assert_eq!(b.get("flag"), Some(&[String::new()][..]));
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("hello+world"), "hello world");
        assert_eq!(url_decode("hello%20world"), "hello world");
        assert_eq!(url_decode("100%25"), "100%");
        assert_eq!(url_decode("bad%zz"), "bad%zz");
        assert_eq!(url_decode("trail%2"), "trail%2");
    }

    #[test]
    fn test_defaults() {
        let model = build_query_parameters(&ParamBag::new()).unwrap();
        assert_eq!(model, QueryParameterModel::default());
        assert_eq!(model.sort, vec![SortDirective::descending("created_at")]);
        assert_eq!(model.page.page_size, 10);
        assert_eq!(model.page.page_number, 1);
    }

    #[test]
    fn test_sort_and_paging() {
        let model = build_query_parameters(&bag(
            "sort_column=-created_at&sort_column=updated_at&page_size=10&page_number=2",
        ))
        .unwrap();
        assert_eq!(
            model.sort,
            vec![
                SortDirective::descending("created_at"),
                SortDirective::ascending("updated_at"),
            ]
        );
        assert_eq!(model.page, PageDirective { page_size: 10, page_number: 2 });
        assert!(model.filters.is_empty());
    }

    #[test]
    fn test_reserved_keys_not_filters() {
        let model = build_query_parameters(&bag("page_size=5&name=Ysolde")).unwrap();
        assert_eq!(model.filters.len(), 1);
        assert_eq!(model.filters[0].column, "name");
    }

    #[test]
    fn test_page_values_rejected() {
        for query in [
            "page_size=0",
            "page_size=-3",
            "page_size=ten",
            "page_size=1&page_size=2",
            "page_number=0",
        ] {
            let err = build_query_parameters(&bag(query)).unwrap_err();
            assert_eq!(err.code, codes::INVALID_QUERY_PARAMETER, "{query}");
            assert_eq!(err.validation_errors.len(), 1, "{query}");
        }
    }

    #[test]
    fn test_all_problems_reported_together() {
        let err = build_query_parameters(&bag("page_size=0&page_number=x")).unwrap_err();
        assert_eq!(error_paths(&err), vec!["$.page_size", "$.page_number"]);
    }

    #[test]
    fn test_sort_rejects_commas() {
        let err = build_query_parameters(&bag("sort_column=a,b")).unwrap_err();
        assert_eq!(error_paths(&err), vec!["$.sort_column"]);
    }

    #[test]
    fn test_operator_suffixes() {
        let model = build_query_parameters(&bag("level:gte=3&name:ilike=%25orc%25&hp:ne=0")).unwrap();
        let ops: Vec<_> = model.filters.iter().map(|d| (d.column.as_str(), d.operator)).collect();
        assert_eq!(
            ops,
            vec![
                ("hp", Operator::NotEquals),
                ("level", Operator::GreaterOrEqual),
                ("name", Operator::CaseInsensitiveLike),
            ]
        );
        assert_eq!(model.filters[2].value, QueryValue::Single("%orc%".to_string()));
    }

    #[test]
    fn test_unknown_operator() {
        let err = build_query_parameters(&bag("level:between=3")).unwrap_err();
        assert_eq!(error_paths(&err), vec!["$.level:between"]);
    }

    #[test]
    fn test_array_form_is_one_directive() {
        let model = build_query_parameters(&bag("class[]=rogue&class[]=bard")).unwrap();
        assert_eq!(model.filters.len(), 1);
        assert_eq!(
            model.filters[0].value,
            QueryValue::Multi(vec!["rogue".to_string(), "bard".to_string()])
        );
    }

    #[test]
    fn test_repeated_scalar_key_is_several_directives() {
        let model = build_query_parameters(&bag("class=rogue&class=bard")).unwrap();
        assert_eq!(model.filters.len(), 2);
        assert!(model
            .filters
            .iter()
            .all(|d| matches!(d.value, QueryValue::Single(_))));
    }

    #[test]
    fn test_range_collapsed() {
        let model = build_query_parameters(&bag("level:lte=9&level:gt=2")).unwrap();
        assert_eq!(model.filters.len(), 1);
        let directive = &model.filters[0];
        assert_eq!(directive.operator, Operator::GreaterThan);
        assert_eq!(directive.value, QueryValue::Single("2".to_string()));
        assert_eq!(
            directive.second_value,
            Some(SecondValue {
                operator: Operator::LessOrEqual,
                value: "9".to_string(),
            })
        );
    }

    #[test]
    fn test_range_not_collapsed_when_ambiguous() {
        let model = build_query_parameters(&bag("level:gt=1&level:gt=2&level:lt=9")).unwrap();
        assert_eq!(model.filters.len(), 3);
        assert!(model.filters.iter().all(|d| d.second_value.is_none()));
    }

    #[test]
    fn test_list_on_range_operator_rejected() {
        let err = build_query_parameters(&bag("level[]:gt=1")).unwrap_err();
        assert_eq!(err.code, codes::INVALID_QUERY_PARAMETER);
    }

    #[test]
    fn test_invalid_column_rejected() {
        let err = build_query_parameters(&bag("name;drop=1")).unwrap_err();
        assert_eq!(err.code, codes::INVALID_QUERY_PARAMETER);
    }

    #[test]
    fn test_to_document_types_declared_keys() {
        let kinds = ValueKinds::new()
            .with("number", ValueKind::Integer)
            .with("ratio", ValueKind::Number)
            .with("active", ValueKind::Boolean)
            .with("ids", ValueKind::Integer);
        let doc = bag("number=0&ratio=0.5&active=true&name=123&tags[]=a&ids=1&ids=2").to_document(&kinds);
        assert_eq!(doc["number"], serde_json::json!(0));
        assert_eq!(doc["ratio"], serde_json::json!(0.5));
        assert_eq!(doc["active"], serde_json::json!(true));
        assert_eq!(doc["name"], serde_json::json!("123"));
        assert_eq!(doc["tags"], serde_json::json!(["a"]));
        assert_eq!(doc["ids"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_unparseable_value_stays_text() {
        let kinds = ValueKinds::new().with("number", ValueKind::Integer);
        let doc = bag("number=many").to_document(&kinds);
        assert_eq!(doc["number"], serde_json::json!("many"));
    }

    #[test]
    fn test_value_kinds_from_schema() {
        let kinds = ValueKinds::from_schema(&serde_json::json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "level": {"type": ["null", "integer"]},
                "ids": {"type": "array", "items": {"type": "integer"}},
                "active": {"type": "boolean"},
                "meta": {"type": "object"}
            }
        }));
        assert_eq!(kinds.kind_of("name"), ValueKind::Text);
        assert_eq!(kinds.kind_of("level:gte"), ValueKind::Integer);
        assert_eq!(kinds.kind_of("ids[]"), ValueKind::Integer);
        assert_eq!(kinds.kind_of("active"), ValueKind::Boolean);
        assert_eq!(kinds.kind_of("meta"), ValueKind::Text);
        assert_eq!(kinds.kind_of("unknown"), ValueKind::Text);
    }

    #[test]
    fn test_percent_decode_keeps_plus_for_paths() {
        assert_eq!(percent_decode("Ys%C3%B6lde", false), "Ysölde");
        assert_eq!(percent_decode("a+b", false), "a+b");
        assert_eq!(percent_decode("a+b", true), "a b");
    }
}
