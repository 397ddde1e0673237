//! `${NAME}` expansion in config files.
//!
//! `${NAME}` takes the variable's value and fails when it is unset.
//! `${NAME:-fallback}` takes `fallback` when the variable is unset or empty.
//! `$$` produces a literal `$`. Any other `$` is left as written.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::error::ConfigError;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("Invalid regex pattern")
});

/// Expand placeholders from the process environment.
pub fn interpolate(input: &str) -> Result<String, ConfigError> {
    interpolate_with(input, |name| std::env::var(name).ok())
}

/// Expand placeholders using `lookup` to resolve variable names.
///
/// All unresolved names are collected into one error.
pub fn interpolate_with(
    input: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let mut problems = Vec::new();

    let expanded = PLACEHOLDER.replace_all(input, |caps: &Captures| {
        let Some(name) = caps.get(1).map(|m| m.as_str()) else {
            return "$".to_string();
        };
        let fallback = caps.get(2).map(|m| m.as_str());

        match (lookup(name), fallback) {
            // A value spanning lines could smuggle extra YAML keys in.
            (Some(value), _) if value.contains(['\n', '\r']) => {
                problems.push(format!("{name} contains a line break"));
                String::new()
            }
            (Some(value), Some(fallback)) if value.is_empty() => fallback.to_string(),
            (Some(value), _) => value,
            (None, Some(fallback)) => fallback.to_string(),
            (None, None) => {
                problems.push(format!("{name} is not set"));
                String::new()
            }
        }
    });

    if problems.is_empty() {
        Ok(expanded.into_owned())
    } else {
        Err(ConfigError::EnvInterpolation {
            message: problems.join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn expand(input: &str, vars: &[(&str, &str)]) -> Result<String, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        interpolate_with(input, |name| vars.get(name).cloned())
    }

    #[test]
    fn test_braced_variable() {
        let text = expand(
            "landing_root: ${ROOT}\nbronze_root: ${ROOT}/bronze",
            &[("ROOT", "/data")],
        )
        .unwrap();
        assert_eq!(text, "landing_root: /data\nbronze_root: /data/bronze");
    }

    #[test]
    fn test_fallback_for_unset_and_empty() {
        assert_eq!(expand("${DIR:-/tmp}", &[]).unwrap(), "/tmp");
        assert_eq!(expand("${DIR:-/tmp}", &[("DIR", "")]).unwrap(), "/tmp");
        assert_eq!(expand("${DIR:-/tmp}", &[("DIR", "/srv")]).unwrap(), "/srv");
        assert_eq!(expand("${DIR:-}", &[]).unwrap(), "");
    }

    #[test]
    fn test_unset_names_reported_together() {
        let err = expand("a: ${FIRST}\nb: ${SECOND}", &[]).unwrap_err();
        let ConfigError::EnvInterpolation { message } = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(message, "FIRST is not set\nSECOND is not set");
    }

    #[test]
    fn test_line_break_rejected() {
        let err = expand("root: ${ROOT}", &[("ROOT", "/data\nclusters: {}")]).unwrap_err();
        assert!(err.to_string().contains("ROOT contains a line break"));
    }

    #[test]
    fn test_dollar_escape_and_plain_dollars() {
        assert_eq!(expand("cost: $$5", &[]).unwrap(), "cost: $5");
        assert_eq!(expand("$HOME and $", &[]).unwrap(), "$HOME and $");
    }

    #[test]
    fn test_process_environment() {
        let path = std::env::var("PATH").unwrap();
        assert_eq!(interpolate("${PATH}").unwrap(), path);
    }
}
