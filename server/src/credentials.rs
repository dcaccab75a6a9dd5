use std::{collections::HashMap, env, fs, path::PathBuf};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret, SecretString};
use url::Url;

use crate::error::AdapterError;

pub static CLIENT_ID_KEY: &str = "TICKTICK_CLIENT_ID";
pub static CLIENT_SECRET_KEY: &str = "TICKTICK_CLIENT_SECRET";
pub static ACCESS_TOKEN_KEY: &str = "TICKTICK_ACCESS_TOKEN";
pub static REFRESH_TOKEN_KEY: &str = "TICKTICK_REFRESH_TOKEN";
pub static TOKEN_EXPIRES_AT_KEY: &str = "TICKTICK_TOKEN_EXPIRES_AT";
pub static BASE_URL_KEY: &str = "TICKTICK_BASE_URL";
pub static AUTH_URL_KEY: &str = "TICKTICK_AUTH_URL";
pub static TOKEN_URL_KEY: &str = "TICKTICK_TOKEN_URL";

/// The credential set owned by the authorization manager. Secrets are held
/// as `SecretString` so debug output stays redacted.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub access_token: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Deployment overrides: the same code targets e.g. Dida365 purely via
    /// these URLs.
    pub base_url: Option<Url>,
    pub auth_url: Option<Url>,
    pub token_url: Option<Url>,
}

impl Credentials {
    pub fn new(client_id: String, client_secret: SecretString) -> Self {
        Credentials {
            client_id,
            client_secret,
            access_token: None,
            refresh_token: None,
            expires_at: None,
            base_url: None,
            auth_url: None,
            token_url: None,
        }
    }

    /// Client id and secret from the process environment, for the first
    /// `auth` run before any store file exists.
    pub fn from_env() -> Result<Self, AdapterError> {
        let client_id = env::var(CLIENT_ID_KEY)
            .map_err(|_| AdapterError::Validation(format!("{CLIENT_ID_KEY} is not set")))?;
        let client_secret = env::var(CLIENT_SECRET_KEY)
            .map_err(|_| AdapterError::Validation(format!("{CLIENT_SECRET_KEY} is not set")))?;
        Ok(Credentials::new(client_id, Secret::new(client_secret)))
    }

    pub fn has_access_token(&self) -> bool {
        self.access_token.is_some()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Text key-value store backing the credential set. One `KEY=value` pair
/// per line, `#` starts a comment. The file must never be group- or
/// world-readable once written.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        CredentialStore { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<Credentials, AdapterError> {
        let content = fs::read_to_string(&self.path).with_context(|| {
            format!(
                "Cannot read credential store {}; run the `auth` command to create it",
                self.path.display()
            )
        })?;
        let values = parse_key_values(&content);

        let client_id = values
            .get(CLIENT_ID_KEY)
            .ok_or_else(|| {
                AdapterError::Validation(format!(
                    "credential store {} is missing {CLIENT_ID_KEY}",
                    self.path.display()
                ))
            })?
            .clone();
        let client_secret = values.get(CLIENT_SECRET_KEY).ok_or_else(|| {
            AdapterError::Validation(format!(
                "credential store {} is missing {CLIENT_SECRET_KEY}",
                self.path.display()
            ))
        })?;

        let expires_at = values
            .get(TOKEN_EXPIRES_AT_KEY)
            .map(|value| {
                DateTime::parse_from_rfc3339(value)
                    .map(|datetime| datetime.with_timezone(&Utc))
                    .map_err(|_| {
                        AdapterError::Validation(format!(
                            "invalid {TOKEN_EXPIRES_AT_KEY} value in credential store"
                        ))
                    })
            })
            .transpose()?;

        Ok(Credentials {
            client_id,
            client_secret: Secret::new(client_secret.clone()),
            access_token: values.get(ACCESS_TOKEN_KEY).cloned().map(Secret::new),
            refresh_token: values.get(REFRESH_TOKEN_KEY).cloned().map(Secret::new),
            expires_at,
            base_url: self.parse_url(&values, BASE_URL_KEY)?,
            auth_url: self.parse_url(&values, AUTH_URL_KEY)?,
            token_url: self.parse_url(&values, TOKEN_URL_KEY)?,
        })
    }

    fn parse_url(
        &self,
        values: &HashMap<String, String>,
        key: &str,
    ) -> Result<Option<Url>, AdapterError> {
        values
            .get(key)
            .map(|value| {
                Url::parse(value).map_err(|_| {
                    AdapterError::Validation(format!("invalid {key} value in credential store"))
                })
            })
            .transpose()
    }

    /// Persist the credential set with owner-only permissions. On Unix the
    /// store refuses to proceed if the permissions cannot be restricted.
    pub fn save(&self, credentials: &Credentials) -> Result<(), AdapterError> {
        let mut lines = vec![
            format!("{CLIENT_ID_KEY}={}", credentials.client_id),
            format!(
                "{CLIENT_SECRET_KEY}={}",
                credentials.client_secret.expose_secret()
            ),
        ];
        if let Some(access_token) = &credentials.access_token {
            lines.push(format!("{ACCESS_TOKEN_KEY}={}", access_token.expose_secret()));
        }
        if let Some(refresh_token) = &credentials.refresh_token {
            lines.push(format!(
                "{REFRESH_TOKEN_KEY}={}",
                refresh_token.expose_secret()
            ));
        }
        if let Some(expires_at) = &credentials.expires_at {
            lines.push(format!("{TOKEN_EXPIRES_AT_KEY}={}", expires_at.to_rfc3339()));
        }
        if let Some(base_url) = &credentials.base_url {
            lines.push(format!("{BASE_URL_KEY}={base_url}"));
        }
        if let Some(auth_url) = &credentials.auth_url {
            lines.push(format!("{AUTH_URL_KEY}={auth_url}"));
        }
        if let Some(token_url) = &credentials.token_url {
            lines.push(format!("{TOKEN_URL_KEY}={token_url}"));
        }
        let content = format!("{}\n", lines.join("\n"));

        self.write_owner_only(&content)
    }

    #[cfg(unix)]
    fn write_owner_only(&self, content: &str) -> Result<(), AdapterError> {
        use std::{
            fs::{OpenOptions, Permissions},
            io::Write,
            os::unix::fs::{OpenOptionsExt, PermissionsExt},
        };

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&self.path)
            .with_context(|| {
                format!("Cannot write credential store {}", self.path.display())
            })?;
        file.write_all(content.as_bytes())
            .context("Cannot write credential store")?;

        // The mode above only applies at creation; clamp pre-existing files
        // as well, then verify.
        fs::set_permissions(&self.path, Permissions::from_mode(0o600))
            .context("Cannot restrict credential store permissions")?;
        let mode = fs::metadata(&self.path)
            .context("Cannot stat credential store")?
            .permissions()
            .mode();
        if mode & 0o077 != 0 {
            return Err(AdapterError::Unexpected(anyhow!(
                "credential store {} is readable by group or others (mode {:o})",
                self.path.display(),
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn write_owner_only(&self, content: &str) -> Result<(), AdapterError> {
        tracing::error!(
            path = %self.path.display(),
            "cannot restrict credential store permissions on this platform"
        );
        fs::write(&self.path, content).with_context(|| {
            format!("Cannot write credential store {}", self.path.display())
        })?;
        Ok(())
    }
}

fn parse_key_values(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (key, value) = line.split_once('=')?;
            let value = value.trim().trim_matches('"');
            if value.is_empty() {
                return None;
            }
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use tempfile::tempdir;

    fn credentials() -> Credentials {
        Credentials {
            client_id: "client123".to_string(),
            client_secret: Secret::new("secret456".to_string()),
            access_token: Some(Secret::new("access789".to_string())),
            refresh_token: Some(Secret::new("refresh000".to_string())),
            expires_at: Some("2025-06-01T12:00:00Z".parse().unwrap()),
            base_url: Some(Url::parse("https://api.dida365.com/open/v1").unwrap()),
            auth_url: None,
            token_url: None,
        }
    }

    #[rstest]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join(".env"));

        store.save(&credentials()).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded.client_id, "client123");
        assert_eq!(loaded.client_secret.expose_secret(), "secret456");
        assert_eq!(
            loaded.access_token.unwrap().expose_secret(),
            "access789"
        );
        assert_eq!(
            loaded.refresh_token.unwrap().expose_secret(),
            "refresh000"
        );
        assert_eq!(loaded.expires_at, credentials().expires_at);
        assert_eq!(
            loaded.base_url.unwrap().as_str(),
            "https://api.dida365.com/open/v1"
        );
        assert_eq!(loaded.auth_url, None);
    }

    #[cfg(unix)]
    #[rstest]
    fn test_store_is_not_group_or_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join(".env"));

        store.save(&credentials()).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0, "mode was {:o}", mode & 0o777);
    }

    #[cfg(unix)]
    #[rstest]
    fn test_save_clamps_a_pre_existing_lax_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "stale").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        let store = CredentialStore::new(path);

        store.save(&credentials()).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    #[rstest]
    fn test_load_ignores_comments_and_strips_quotes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(
            &path,
            "# TickTick credentials\nTICKTICK_CLIENT_ID=\"client123\"\n\nTICKTICK_CLIENT_SECRET=secret456\n",
        )
        .unwrap();
        let store = CredentialStore::new(path);

        let loaded = store.load().unwrap();

        assert_eq!(loaded.client_id, "client123");
        assert!(!loaded.has_access_token());
    }

    #[rstest]
    fn test_load_without_client_id_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "TICKTICK_CLIENT_SECRET=secret456\n").unwrap();
        let store = CredentialStore::new(path);

        let result = store.load();

        assert!(matches!(result, Err(AdapterError::Validation(_))));
    }

    #[rstest]
    fn test_debug_output_redacts_secrets() {
        let rendered = format!("{:?}", credentials());

        assert!(!rendered.contains("secret456"));
        assert!(!rendered.contains("access789"));
        assert!(!rendered.contains("refresh000"));
    }
}
