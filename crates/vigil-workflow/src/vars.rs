//! `$name` interpolation against inputs and prior structured outputs.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use vigil_core::{Error, Result};

fn var_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("var pattern compiles"))
}

/// Variable names referenced by `text`, in order of first appearance.
pub fn referenced_vars(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in var_pattern().captures_iter(text) {
        let name = cap[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Substitute every `$name` in `text`. Unknown names are an error — a prompt
/// is never built with a dangling reference.
pub fn interpolate(text: &str, vars: &HashMap<String, String>) -> Result<String> {
    let mut missing = Vec::new();
    let result = var_pattern().replace_all(text, |cap: &regex::Captures<'_>| {
        let name = &cap[1];
        match vars.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });
    if let Some(name) = missing.first() {
        return Err(Error::Internal(format!(
            "unknown variable '${}' in prompt",
            name
        )));
    }
    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_known_vars() {
        let out = interpolate("Analyze $topic in $depth detail", &vars(&[("topic", "go"), ("depth", "full")]))
            .unwrap();
        assert_eq!(out, "Analyze go in full detail");
    }

    #[test]
    fn unknown_var_is_an_error() {
        let err = interpolate("Analyze $mystery", &vars(&[])).unwrap_err();
        assert!(err.to_string().contains("$mystery"));
    }

    #[test]
    fn extraction_dedupes_in_order() {
        assert_eq!(
            referenced_vars("$b then $a then $b again"),
            vec!["b".to_string(), "a".to_string()]
        );
        assert!(referenced_vars("no vars, just $ alone and $1bad").is_empty());
    }
}
