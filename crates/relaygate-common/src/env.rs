use std::env::VarError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvResolveError {
    #[error("env reference '{reference}' points to unset variable '{var}'")]
    Unset { reference: String, var: String },
    #[error("env reference '{reference}' is not valid unicode")]
    NotUnicode { reference: String },
}

/// Resolves the gateway's `"env.NAME"` config convention: any string-typed
/// config field whose value starts with `env.` is replaced at load time by
/// the named environment variable. A missing variable is a load-time error,
/// never a silent empty string, so a provider can't be misconfigured with a
/// blank key and discover it only on the first failed upstream call.
pub fn resolve(value: &str) -> Result<String, EnvResolveError> {
    let Some(var) = value.strip_prefix("env.") else {
        return Ok(value.to_string());
    };
    match std::env::var(var) {
        Ok(resolved) => Ok(resolved),
        Err(VarError::NotPresent) => Err(EnvResolveError::Unset {
            reference: value.to_string(),
            var: var.to_string(),
        }),
        Err(VarError::NotUnicode(_)) => Err(EnvResolveError::NotUnicode {
            reference: value.to_string(),
        }),
    }
}

/// True if `value` uses the `"env.NAME"` convention (used by config
/// validation to decide whether a field should be re-resolved on reload).
pub fn is_env_reference(value: &str) -> bool {
    value.starts_with("env.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_for_plain_values() {
        assert_eq!(resolve("sk-literal").unwrap(), "sk-literal");
    }

    #[test]
    fn resolves_env_reference() {
        unsafe {
            std::env::set_var("RELAYGATE_TEST_KEY", "sk-from-env");
        }
        assert_eq!(resolve("env.RELAYGATE_TEST_KEY").unwrap(), "sk-from-env");
        unsafe {
            std::env::remove_var("RELAYGATE_TEST_KEY");
        }
    }

    #[test]
    fn missing_env_var_is_an_error() {
        unsafe {
            std::env::remove_var("RELAYGATE_TEST_MISSING");
        }
        assert!(resolve("env.RELAYGATE_TEST_MISSING").is_err());
    }
}
