//! Placeholder expansion for step arguments.
//!
//! A raw argument string is split on `,` into positional arguments, then every
//! `${EXPR}` inside an argument is replaced in place:
//!
//! ```text
//! vars = { var1: "value1", var2: "value2", arr1: "value1,value2,value3" }
//!
//! "${var1}"                        -> "value1"
//! "X_${var1}_${var2}"              -> "X_value1_value2"
//! "${arr1[0]_arr1[1]_arr1[2]}"     -> "value1_value2_value3"
//! ```
//!
//! The split happens on the raw template, so a bound value containing `,` never
//! produces extra arguments.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use thiserror::Error;

use crate::core::state::VariableStore;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{(.+?)\}").unwrap());
static INDEX_TERM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+)\[(\d+)\]").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("variable [{name}] is not set")]
    UnresolvedVariable { name: String },
    #[error("index [{index}] is out of range for variable [{name}] with {len} element(s)")]
    IndexOutOfRange {
        name: String,
        index: String,
        len: usize,
    },
}

/// Split `raw` on `,` and resolve every placeholder in every argument.
///
/// Fails on the first unresolvable placeholder; nothing is returned partially.
pub fn resolve(vars: &VariableStore, raw: &str) -> Result<Vec<String>, ResolveError> {
    raw.split(',').map(|arg| resolve_arg(vars, arg)).collect()
}

/// Resolve every placeholder in a single argument, keeping literal text.
pub fn resolve_arg(vars: &VariableStore, arg: &str) -> Result<String, ResolveError> {
    let mut out = String::with_capacity(arg.len());
    let mut last = 0;
    for caps in PLACEHOLDER_RE.captures_iter(arg) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&arg[last..whole.start()]);
        out.push_str(&resolve_expr(vars, &caps)?);
        last = whole.end();
    }
    out.push_str(&arg[last..]);
    Ok(out)
}

fn resolve_expr(vars: &VariableStore, caps: &Captures<'_>) -> Result<String, ResolveError> {
    let expr = &caps[1];
    match parse_index_terms(expr) {
        Some(terms) => {
            let values = terms
                .into_iter()
                .map(|(name, index)| lookup_element(vars, name, index))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(values.join("_"))
        }
        None => lookup(vars, expr).map(str::to_string),
    }
}

/// Parse `IDENT[INT](_IDENT[INT])*`; `None` when `expr` is a plain name.
fn parse_index_terms(expr: &str) -> Option<Vec<(&str, &str)>> {
    let mut terms = Vec::new();
    let mut rest = expr;
    loop {
        let caps = INDEX_TERM_RE.captures(rest)?;
        let (name, index) = (caps.get(1)?.as_str(), caps.get(2)?.as_str());
        terms.push((name, index));
        rest = &rest[caps.get(0)?.end()..];
        if rest.is_empty() {
            return Some(terms);
        }
        rest = rest.strip_prefix('_')?;
    }
}

fn lookup<'a>(vars: &'a VariableStore, name: &str) -> Result<&'a str, ResolveError> {
    vars.get(name).ok_or_else(|| ResolveError::UnresolvedVariable {
        name: name.to_string(),
    })
}

fn lookup_element(vars: &VariableStore, name: &str, index: &str) -> Result<String, ResolveError> {
    let value = lookup(vars, name)?;
    let elements: Vec<&str> = value.split(',').collect();
    index
        .parse::<usize>()
        .ok()
        .and_then(|i| elements.get(i))
        .map(|element| element.to_string())
        .ok_or_else(|| ResolveError::IndexOutOfRange {
            name: name.to_string(),
            index: index.to_string(),
            len: elements.len(),
        })
}
