//! Credential lookup — env var, then .env, then credentials.toml.
//!
//! The credentials file must not be readable by group/other on POSIX.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Default environment variable per provider.
fn default_env_var(provider: &str) -> String {
    format!("{}_API_KEY", provider.to_uppercase())
}

/// Resolve an API key for `provider`.
///
/// Order: the configured env var (or `<PROVIDER>_API_KEY`), a `.env` file in
/// `search_dir`, then `credentials.toml` in `search_dir`. The TOML file must
/// be mode 0400 (no group/other bits) on POSIX.
pub fn lookup(provider: &str, api_key_env: Option<&str>, search_dir: &Path) -> Result<String> {
    let var = api_key_env
        .map(String::from)
        .unwrap_or_else(|| default_env_var(provider));

    if let Ok(key) = std::env::var(&var) {
        if !key.is_empty() {
            return Ok(key);
        }
    }

    let dotenv = search_dir.join(".env");
    if dotenv.is_file() {
        if let Some(key) = read_dotenv(&dotenv)?.remove(&var) {
            return Ok(key);
        }
    }

    let creds = search_dir.join("credentials.toml");
    if creds.is_file() {
        check_permissions(&creds)?;
        let content = std::fs::read_to_string(&creds)?;
        let table: toml::Table = content
            .parse()
            .map_err(|e| Error::Credential(format!("credentials.toml: {}", e)))?;
        if let Some(key) = table
            .get(provider)
            .and_then(|v| v.get("api_key"))
            .and_then(|v| v.as_str())
        {
            return Ok(key.to_string());
        }
    }

    Err(Error::Credential(format!(
        "no API key for provider '{}': set {} or add it to .env / credentials.toml",
        provider, var
    )))
}

fn read_dotenv(path: &Path) -> Result<HashMap<String, String>> {
    let content = std::fs::read_to_string(path)?;
    let mut vars = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            let v = v.trim().trim_matches('"').trim_matches('\'');
            vars.insert(k.trim().to_string(), v.to_string());
        }
    }
    Ok(vars)
}

#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(path)?.permissions().mode();
    if mode & 0o077 != 0 {
        return Err(Error::Credential(format!(
            "{} is readable by group/other (mode {:o}); chmod 0400 it",
            path.display(),
            mode & 0o777
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_wins() {
        std::env::set_var("VIGIL_TEST_PROV_API_KEY", "from-env");
        let dir = tempfile::tempdir().unwrap();
        let key = lookup("vigil_test_prov", None, dir.path()).unwrap();
        assert_eq!(key, "from-env");
        std::env::remove_var("VIGIL_TEST_PROV_API_KEY");
    }

    #[test]
    fn dotenv_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "# keys\nVIGIL_TEST_DOTENV_API_KEY=\"from-dotenv\"\n",
        )
        .unwrap();
        let key = lookup("vigil_test_dotenv", None, dir.path()).unwrap();
        assert_eq!(key, "from-dotenv");
    }

    #[cfg(unix)]
    #[test]
    fn credentials_toml_requires_0400() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.toml");
        std::fs::write(&path, "[vigil_test_toml]\napi_key = \"from-toml\"\n").unwrap();

        // World-readable: rejected.
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(lookup("vigil_test_toml", None, dir.path()).is_err());

        // 0400: accepted.
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o400)).unwrap();
        let key = lookup("vigil_test_toml", None, dir.path()).unwrap();
        assert_eq!(key, "from-toml");
    }

    #[test]
    fn missing_key_reports_var_name() {
        let dir = tempfile::tempdir().unwrap();
        let err = lookup("vigil_test_absent", Some("VIGIL_ABSENT_KEY"), dir.path())
            .unwrap_err()
            .to_string();
        assert!(err.contains("VIGIL_ABSENT_KEY"));
    }
}
