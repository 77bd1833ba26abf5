//! CLI/ENV value sanitizing and sqlite DSN resolution, grounded on the
//! teacher's `gproxy-core::bootstrap` helpers of the same names.

use std::path::PathBuf;

use anyhow::Context;

pub fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    // Some PaaS systems inject unresolved placeholders like `${VAR}`; treat
    // them as "not set" so startup doesn't fail on DSN/URL parsing.
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

pub fn sanitize_dsn_value(value: Option<String>, data_dir: Option<&str>) -> String {
    sanitize_optional_env_value(value).unwrap_or_else(|| default_dsn(data_dir))
}

fn default_dsn(data_dir: Option<&str>) -> String {
    match data_dir {
        Some(dir) => {
            let dir = dir.trim_end_matches('/');
            format!("sqlite://{dir}/relaygate.db?mode=rwc")
        }
        None => "sqlite://relaygate.db?mode=rwc".to_string(),
    }
}

pub fn ensure_sqlite_parent_dir(dsn: &str) -> anyhow::Result<()> {
    let Some(db_path) = sqlite_file_path_from_dsn(dsn) else {
        return Ok(());
    };
    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).with_context(|| format!("create sqlite parent dir {}", parent.display()))?;
    Ok(())
}

fn sqlite_file_path_from_dsn(dsn: &str) -> Option<PathBuf> {
    let rest = dsn.strip_prefix("sqlite:")?;
    let path_part = rest.split(['?', '#']).next()?.trim();
    if path_part.is_empty() {
        return None;
    }

    let mut normalized = path_part;
    if let Some(stripped) = normalized.strip_prefix("//") {
        normalized = stripped;
    }

    if normalized.eq_ignore_ascii_case(":memory:") {
        return None;
    }

    Some(PathBuf::from(normalized))
}

pub fn parse_u16_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u16>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw.parse::<u16>().with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

pub fn parse_bool_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<bool>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => return Err(anyhow::anyhow!("invalid {env_name} value: {raw}")),
    };
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_dsn_resolves_relative_path() {
        let path = sqlite_file_path_from_dsn("sqlite://relaygate.db?mode=rwc").unwrap();
        assert_eq!(path.to_string_lossy(), "relaygate.db");
    }

    #[test]
    fn sqlite_dsn_resolves_absolute_path() {
        let path = sqlite_file_path_from_dsn("sqlite://app/data/relaygate.db?mode=rwc").unwrap();
        assert_eq!(path.to_string_lossy(), "/app/data/relaygate.db");
    }

    #[test]
    fn sqlite_memory_dsn_is_ignored() {
        assert!(sqlite_file_path_from_dsn("sqlite::memory:").is_none());
        assert!(sqlite_file_path_from_dsn("sqlite://:memory:").is_none());
    }

    #[test]
    fn placeholder_env_value_is_treated_as_unset() {
        assert_eq!(sanitize_optional_env_value(Some("${DATABASE_URL}".to_string())), None);
    }
}
