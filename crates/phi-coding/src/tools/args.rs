//! Argument coercion and path containment shared by the tools.

use std::path::{Component, Path, PathBuf};

use phi_agent::ToolError;
use serde_json::{Map, Value};

pub(crate) fn default_cwd(cwd: PathBuf) -> PathBuf {
    if !cwd.as_os_str().is_empty() {
        return cwd;
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Resolve `input` against `cwd` and reject anything that escapes it.
/// Resolution is lexical: `..` components are folded without touching
/// the filesystem.
pub(crate) fn resolve_safe_path(cwd: &Path, input: &str) -> Result<PathBuf, ToolError> {
    let base = normalize(&absolutize(cwd)?);
    let raw = Path::new(input);
    let target = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        base.join(raw)
    };
    let target = normalize(&absolutize(&target)?);

    if target != base && !target.starts_with(&base) {
        return Err(ToolError::PathEscape(input.to_string()));
    }
    Ok(target)
}

fn absolutize(path: &Path) -> Result<PathBuf, ToolError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub(crate) fn string_arg(args: &Map<String, Value>, key: &str) -> Option<String> {
    match args.get(key)? {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        other => Some(other.to_string()),
    }
}

pub(crate) fn int_arg(args: &Map<String, Value>, key: &str) -> Option<i64> {
    match args.get(key)? {
        Value::Number(value) => value
            .as_i64()
            .or_else(|| value.as_f64().map(|float| float as i64)),
        Value::String(value) => value.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn float_arg(args: &Map<String, Value>, key: &str) -> Option<f64> {
    match args.get(key)? {
        Value::Number(value) => value.as_f64(),
        Value::String(value) => value.trim().parse().ok(),
        _ => None,
    }
}

/// A string argument that must be present and non-blank.
pub(crate) fn required_string(args: &Map<String, Value>, key: &str) -> Result<String, ToolError> {
    string_arg(args, key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ToolError::MissingArgument(key.to_string()))
}

/// Build a parameter schema mapping from a `json!` object literal.
pub(crate) fn schema(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
