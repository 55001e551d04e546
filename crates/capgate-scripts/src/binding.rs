// crates/capgate-scripts/src/binding.rs
// ============================================================================
// Module: Argument Binding
// Description: Binds query parameters to declared entrypoint parameters.
// Purpose: Report every missing required parameter before invocation.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Binding walks the declared parameters in order. Supplied values win,
//! declared defaults fill the rest, and undeclared query keys are ignored.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use thiserror::Error;

use crate::handler::ParamSpec;
use crate::handler::ScriptArgs;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Required parameters absent from the call, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("missing required arguments: {}", .0.join(", "))]
pub struct MissingArguments(pub Vec<String>);

// ============================================================================
// SECTION: Binding
// ============================================================================

/// Binds `query` against `params`.
///
/// # Errors
///
/// Returns [`MissingArguments`] listing every required parameter not present
/// in `query`.
pub fn bind_arguments(
    params: &[ParamSpec],
    query: &BTreeMap<String, String>,
) -> Result<ScriptArgs, MissingArguments> {
    let mut values = BTreeMap::new();
    let mut missing = Vec::new();
    for param in params {
        match (query.get(param.name), param.default) {
            (Some(value), _) => {
                values.insert(param.name.to_string(), value.clone());
            }
            (None, Some(default)) => {
                values.insert(param.name.to_string(), default.to_string());
            }
            (None, None) => missing.push(param.name.to_string()),
        }
    }
    if missing.is_empty() { Ok(ScriptArgs::new(values)) } else { Err(MissingArguments(missing)) }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const GREET: [ParamSpec; 2] =
        [ParamSpec::required("nom"), ParamSpec::optional("titre", "Monsieur/Madame")];

    fn query(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(key, value)| ((*key).to_string(), (*value).to_string())).collect()
    }

    #[test]
    fn defaults_fill_optional_parameters() {
        let args = bind_arguments(&GREET, &query(&[("nom", "Paul"), ("extra", "x")]));
        let args = args.ok();
        assert_eq!(args.as_ref().and_then(|args| args.get("nom")), Some("Paul"));
        assert_eq!(args.as_ref().and_then(|args| args.get("titre")), Some("Monsieur/Madame"));
        assert_eq!(args.as_ref().and_then(|args| args.get("extra")), None);
    }

    #[test]
    fn missing_required_parameters_are_listed() {
        let err = bind_arguments(&GREET, &query(&[("titre", "Docteur")])).err();
        assert_eq!(err, Some(MissingArguments(vec!["nom".to_string()])));
        assert_eq!(
            err.map(|err| err.to_string()).as_deref(),
            Some("missing required arguments: nom")
        );
    }
}
