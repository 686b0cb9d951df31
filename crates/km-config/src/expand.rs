//! Environment variable expansion for configuration strings.

use crate::ConfigError;

/// Expand `${VAR}` and `${VAR:-default}` references in `value`.
///
/// Bare `$VAR` is left alone. An unset variable without a default is an
/// error naming `field`.
pub(crate) fn expand_env(value: &str, field: &str) -> Result<String, ConfigError> {
    if !value.contains("${") {
        return Ok(value.to_owned());
    }

    shellexpand::env_with_context(value, |var| std::env::var(var).map(Some))
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| ConfigError::EnvVar {
            field: field.to_owned(),
            message: format!("${{{}}} not set", e.var_name),
        })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_expand_var() {
        // SAFETY: variable name is unique to this test
        unsafe {
            std::env::set_var("KM_TEST_EXPAND_HOST", "kroki.internal");
        }
        let result = expand_env("https://${KM_TEST_EXPAND_HOST}:8000", "kroki.server_url").unwrap();
        assert_eq!(result, "https://kroki.internal:8000");
        unsafe {
            std::env::remove_var("KM_TEST_EXPAND_HOST");
        }
    }

    #[test]
    fn test_expand_default_when_unset() {
        // SAFETY: variable name is unique to this test
        unsafe {
            std::env::remove_var("KM_TEST_EXPAND_UNSET");
        }
        let result = expand_env("${KM_TEST_EXPAND_UNSET:-https://kroki.io}", "kroki.server_url")
            .unwrap();
        assert_eq!(result, "https://kroki.io");
    }

    #[test]
    fn test_expand_missing_var_error() {
        // SAFETY: variable name is unique to this test
        unsafe {
            std::env::remove_var("KM_TEST_EXPAND_MISSING");
        }
        let err = expand_env("${KM_TEST_EXPAND_MISSING}", "resolver.workspace_root").unwrap_err();
        assert!(matches!(err, ConfigError::EnvVar { .. }));
        assert_eq!(
            err.to_string(),
            "Environment variable error in resolver.workspace_root: ${KM_TEST_EXPAND_MISSING} not set"
        );
    }

    #[test]
    fn test_literal_and_bare_dollar_unchanged() {
        assert_eq!(expand_env("docs", "f").unwrap(), "docs");
        assert_eq!(expand_env("$HOME/docs", "f").unwrap(), "$HOME/docs");
    }
}
