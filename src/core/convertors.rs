//! Named path-segment convertors and the process-wide registry.
//!
//! A convertor pairs a regex fragment with a parse/format codec. Templates
//! reference convertors by name (`{id:int}`); the name is resolved against a
//! [`ConvertorRegistry`] when the template is compiled, so every custom
//! convertor must be registered before routes using it are built.
//!
//! Parsing is unrestricted: whatever the regex fragment accepted is converted.
//! Formatting is stricter: `int` and `float` refuse negative values, and
//! `float` also refuses NaN and infinities, because such values could never
//! be matched back by the same template.
//!
//! Float formatting uses the shortest decimal string that round-trips to the
//! same `f64`, without exponent notation, and drops a trailing `.0`
//! (`2.0` formats as `"2"`, `12.345` as `"12.345"`).
use std::{collections::HashMap, fmt, sync::Arc};

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while converting a path segment in either direction.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConvertorError {
    #[error("Cannot parse {value:?} as {convertor}")]
    Parse { convertor: String, value: String },

    #[error("Cannot format value for {convertor}: {reason}")]
    Format { convertor: String, reason: String },
}

/// Typed value of a path parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Uuid(Uuid),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(f) => Some(*f),
            ParamValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            ParamValue::Uuid(u) => Some(*u),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(v) => f.write_str(&format_float(*v)),
            ParamValue::Uuid(u) => write!(f, "{}", u.hyphenated()),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<Uuid> for ParamValue {
    fn from(value: Uuid) -> Self {
        ParamValue::Uuid(value)
    }
}

/// Bidirectional codec between a path segment and a typed value.
pub trait Convertor: Send + Sync + fmt::Debug {
    /// Registry name, as written after the colon in a template.
    fn name(&self) -> &str;

    /// Regex fragment matched for this parameter (without anchors).
    fn regex(&self) -> &str;

    /// Convert a matched segment into a typed value.
    fn parse(&self, value: &str) -> Result<ParamValue, ConvertorError>;

    /// Render a value back into a path segment for URL reconstruction.
    fn format(&self, value: &ParamValue) -> Result<String, ConvertorError>;
}

fn format_error(convertor: &str, reason: impl Into<String>) -> ConvertorError {
    ConvertorError::Format {
        convertor: convertor.to_string(),
        reason: reason.into(),
    }
}

fn parse_error(convertor: &str, value: &str) -> ConvertorError {
    ConvertorError::Parse {
        convertor: convertor.to_string(),
        value: value.to_string(),
    }
}

/// Shortest round-trip decimal without exponent, trailing `.0` removed.
fn format_float(value: f64) -> String {
    let text = format!("{value}");
    match text.strip_suffix(".0") {
        Some(trimmed) => trimmed.to_string(),
        None => text,
    }
}

/// Safe path segment: anything but `/`.
#[derive(Debug, Default)]
pub struct StringConvertor;

impl Convertor for StringConvertor {
    fn name(&self) -> &str {
        "str"
    }

    fn regex(&self) -> &str {
        "[^/]+"
    }

    fn parse(&self, value: &str) -> Result<ParamValue, ConvertorError> {
        Ok(ParamValue::Str(value.to_string()))
    }

    fn format(&self, value: &ParamValue) -> Result<String, ConvertorError> {
        let text = value.to_string();
        if text.contains('/') {
            return Err(format_error(self.name(), "May not contain path \"/\""));
        }
        Ok(text)
    }
}

/// Remainder of a path, slashes included.
#[derive(Debug, Default)]
pub struct PathConvertor;

impl Convertor for PathConvertor {
    fn name(&self) -> &str {
        "path"
    }

    fn regex(&self) -> &str {
        ".*"
    }

    fn parse(&self, value: &str) -> Result<ParamValue, ConvertorError> {
        Ok(ParamValue::Str(value.to_string()))
    }

    fn format(&self, value: &ParamValue) -> Result<String, ConvertorError> {
        Ok(value.to_string())
    }
}

#[derive(Debug, Default)]
pub struct IntegerConvertor;

impl Convertor for IntegerConvertor {
    fn name(&self) -> &str {
        "int"
    }

    fn regex(&self) -> &str {
        "[+]?[0-9]+"
    }

    fn parse(&self, value: &str) -> Result<ParamValue, ConvertorError> {
        value
            .trim_start_matches('+')
            .parse::<i64>()
            .map(ParamValue::Int)
            .map_err(|_| parse_error(self.name(), value))
    }

    fn format(&self, value: &ParamValue) -> Result<String, ConvertorError> {
        let number = match value {
            ParamValue::Int(i) => *i,
            ParamValue::Str(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| format_error(self.name(), format!("{s:?} is not an integer")))?,
            other => {
                return Err(format_error(
                    self.name(),
                    format!("{other:?} is not an integer"),
                ));
            }
        };
        if number < 0 {
            return Err(format_error(self.name(), "Negative integers are not supported"));
        }
        Ok(number.to_string())
    }
}

#[derive(Debug, Default)]
pub struct FloatConvertor;

impl Convertor for FloatConvertor {
    fn name(&self) -> &str {
        "float"
    }

    fn regex(&self) -> &str {
        r"[0-9]+(\.[0-9]+)?"
    }

    fn parse(&self, value: &str) -> Result<ParamValue, ConvertorError> {
        value
            .parse::<f64>()
            .map(ParamValue::Float)
            .map_err(|_| parse_error(self.name(), value))
    }

    fn format(&self, value: &ParamValue) -> Result<String, ConvertorError> {
        let number = match value {
            ParamValue::Float(f) => *f,
            ParamValue::Int(i) => *i as f64,
            ParamValue::Str(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format_error(self.name(), format!("{s:?} is not a float")))?,
            other => {
                return Err(format_error(self.name(), format!("{other:?} is not a float")));
            }
        };
        if number.is_nan() {
            return Err(format_error(self.name(), "NaN values are not supported"));
        }
        if number.is_infinite() {
            return Err(format_error(self.name(), "Infinite values are not supported"));
        }
        if number < 0.0 {
            return Err(format_error(self.name(), "Negative floats are not supported"));
        }
        Ok(format_float(number))
    }
}

#[derive(Debug, Default)]
pub struct UuidConvertor;

impl Convertor for UuidConvertor {
    fn name(&self) -> &str {
        "uuid"
    }

    fn regex(&self) -> &str {
        "[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}"
    }

    fn parse(&self, value: &str) -> Result<ParamValue, ConvertorError> {
        Uuid::parse_str(value)
            .map(ParamValue::Uuid)
            .map_err(|_| parse_error(self.name(), value))
    }

    fn format(&self, value: &ParamValue) -> Result<String, ConvertorError> {
        match value {
            ParamValue::Uuid(u) => Ok(u.hyphenated().to_string()),
            ParamValue::Str(s) => Uuid::parse_str(s)
                .map(|u| u.hyphenated().to_string())
                .map_err(|_| format_error(self.name(), format!("{s:?} is not a UUID"))),
            other => Err(format_error(self.name(), format!("{other:?} is not a UUID"))),
        }
    }
}

/// Name-keyed set of convertors consulted when compiling templates.
#[derive(Debug, Clone, Default)]
pub struct ConvertorRegistry {
    convertors: HashMap<String, Arc<dyn Convertor>>,
}

impl ConvertorRegistry {
    /// An empty registry with no convertors at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding the built-in `str`, `path`, `int`, `float` and `uuid`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("str", Arc::new(StringConvertor));
        registry.register("path", Arc::new(PathConvertor));
        registry.register("int", Arc::new(IntegerConvertor));
        registry.register("float", Arc::new(FloatConvertor));
        registry.register("uuid", Arc::new(UuidConvertor));
        registry
    }

    /// Register (or replace) a convertor under `name`.
    pub fn register(&mut self, name: impl Into<String>, convertor: Arc<dyn Convertor>) {
        self.convertors.insert(name.into(), convertor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Convertor>> {
        self.convertors.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.convertors.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.convertors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

static REGISTRY: Lazy<ArcSwap<ConvertorRegistry>> =
    Lazy::new(|| ArcSwap::from_pointee(ConvertorRegistry::with_defaults()));

/// Snapshot of the process-wide registry used by route constructors.
pub fn registry() -> Arc<ConvertorRegistry> {
    REGISTRY.load_full()
}

/// Replace the process-wide registry. Call before building routes.
pub fn install(registry: ConvertorRegistry) {
    tracing::debug!(convertors = ?registry.names(), "Installing convertor registry");
    REGISTRY.store(Arc::new(registry));
}

/// Add one convertor to the process-wide registry.
pub fn register_url_convertor(name: impl Into<String>, convertor: Arc<dyn Convertor>) {
    let name = name.into();
    REGISTRY.rcu(|current| {
        let mut next = ConvertorRegistry::clone(current);
        next.register(name.clone(), convertor.clone());
        next
    });
    tracing::debug!(convertor = %name, "Registered URL convertor");
}

/// Restore the built-in registry (teardown boundary, mostly for tests).
pub fn reset() {
    install(ConvertorRegistry::with_defaults());
}
