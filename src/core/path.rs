//! Path template compilation.
//!
//! A template such as `/users/{id:int}/posts/{slug}` compiles into an anchored
//! regex with one named group per parameter, a reconstruction format
//! (`/users/{id}/posts/{slug}`) and the convertor for each parameter.
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::{
    core::{
        convertors::{self, Convertor, ConvertorRegistry},
        url::UrlPathError,
    },
    ports::scope::PathParams,
};

static PARAM_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([a-zA-Z_][a-zA-Z0-9_]*)(?::([a-zA-Z_][a-zA-Z0-9_]*))?\}")
        .unwrap_or_else(|err| unreachable!("static parameter pattern is valid: {err}"))
});

/// Template compilation failures. All of them are construction-time errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PathCompileError {
    #[error("Duplicated param name{} {} at path {path}", if names.len() > 1 { "s" } else { "" }, names.join(", "))]
    DuplicatedParams { names: Vec<String>, path: String },

    #[error("Unknown path convertor {name:?} at path {path}")]
    UnknownConvertor { name: String, path: String },

    #[error("Routed paths must start with \"/\": {0}")]
    MissingLeadingSlash(String),

    #[error("Invalid path pattern {path}: {source}")]
    InvalidPattern {
        path: String,
        #[source]
        source: regex::Error,
    },
}

/// Immutable result of compiling a template.
#[derive(Clone)]
pub struct CompiledPath {
    template: String,
    regex: Regex,
    format: String,
    convertors: BTreeMap<String, Arc<dyn Convertor>>,
}

impl CompiledPath {
    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Reconstruction format with `{name}` placeholders.
    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn param_names(&self) -> BTreeSet<&str> {
        self.convertors.keys().map(String::as_str).collect()
    }

    pub fn convertor(&self, name: &str) -> Option<&Arc<dyn Convertor>> {
        self.convertors.get(name)
    }

    /// Match `value` and convert every captured parameter.
    ///
    /// A capture the convertor cannot parse (e.g. an integer overflowing
    /// `i64`) is treated as no match.
    pub fn match_path(&self, value: &str) -> Option<PathParams> {
        let captures = self.regex.captures(value)?;
        let mut params = PathParams::new();
        for (name, convertor) in &self.convertors {
            let raw = captures.name(name).map(|m| m.as_str()).unwrap_or_default();
            match convertor.parse(raw) {
                Ok(parsed) => params.insert(name.clone(), parsed),
                Err(err) => {
                    tracing::debug!(template = %self.template, param = %name, error = %err, "Path parameter rejected");
                    return None;
                }
            }
        }
        Some(params)
    }

    /// Substitute every parameter of `params` that appears in the format.
    ///
    /// Consumed parameters are removed from `params`; the rest is left for
    /// the caller (mounts hand them down to child routes).
    pub fn replace_params(&self, params: &mut PathParams) -> Result<String, UrlPathError> {
        replace_params(&self.format, &self.convertors, params)
    }
}

impl fmt::Debug for CompiledPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledPath")
            .field("template", &self.template)
            .field("regex", &self.regex.as_str())
            .field("format", &self.format)
            .field("params", &self.param_names())
            .finish()
    }
}

fn replace_params(
    format: &str,
    convertors: &BTreeMap<String, Arc<dyn Convertor>>,
    params: &mut PathParams,
) -> Result<String, UrlPathError> {
    let mut path = format.to_string();
    let names: Vec<String> = params.names().map(str::to_string).collect();
    for name in names {
        let placeholder = format!("{{{name}}}");
        if !path.contains(&placeholder) {
            continue;
        }
        let (Some(convertor), Some(value)) = (convertors.get(&name), params.get(&name)) else {
            continue;
        };
        let rendered = convertor
            .format(value)
            .map_err(|source| UrlPathError::InvalidParam {
                param: name.clone(),
                source,
            })?;
        path = path.replace(&placeholder, &rendered);
        params.remove(&name);
    }
    Ok(path)
}

/// Compile against the process-wide convertor registry.
pub fn compile_path(path: &str) -> Result<CompiledPath, PathCompileError> {
    compile_path_with(path, &convertors::registry())
}

/// Compile against an explicit registry.
pub fn compile_path_with(
    path: &str,
    registry: &ConvertorRegistry,
) -> Result<CompiledPath, PathCompileError> {
    let mut pattern = String::from("^");
    let mut format = String::new();
    let mut convertors: BTreeMap<String, Arc<dyn Convertor>> = BTreeMap::new();
    let mut duplicated = BTreeSet::new();
    let mut idx = 0;

    for captures in PARAM_REGEX.captures_iter(path) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let name = name.as_str();
        let kind = captures.get(2).map(|m| m.as_str()).unwrap_or("str");
        let convertor = registry
            .get(kind)
            .ok_or_else(|| PathCompileError::UnknownConvertor {
                name: kind.to_string(),
                path: path.to_string(),
            })?;

        let literal = &path[idx..whole.start()];
        pattern.push_str(&regex::escape(literal));
        pattern.push_str(&format!("(?P<{name}>{})", convertor.regex()));
        format.push_str(literal);
        format.push_str(&format!("{{{name}}}"));

        if convertors.insert(name.to_string(), convertor).is_some() {
            duplicated.insert(name.to_string());
        }
        idx = whole.end();
    }

    if !duplicated.is_empty() {
        return Err(PathCompileError::DuplicatedParams {
            names: duplicated.into_iter().collect(),
            path: path.to_string(),
        });
    }

    pattern.push_str(&regex::escape(&path[idx..]));
    pattern.push('$');
    format.push_str(&path[idx..]);

    let regex = Regex::new(&pattern).map_err(|source| PathCompileError::InvalidPattern {
        path: path.to_string(),
        source,
    })?;

    Ok(CompiledPath {
        template: path.to_string(),
        regex,
        format,
        convertors,
    })
}
