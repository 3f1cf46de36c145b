use crate::error::{MatrixError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Minimum remaining lifetime for a cached token to be reused
const TOKEN_REUSE_MARGIN_SECS: i64 = 300;

/// Defaults read from `config.toml`; command-line flags take precedence
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub parallel: Option<usize>,

    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    #[serde(default)]
    pub include_report_only: Option<bool>,

    #[serde(default)]
    pub log_level: Option<String>,
}

/// App registration used to reach the tenant
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    DeviceCode,
    ClientCredentials,
}

impl Credentials {
    pub fn auth_type(&self) -> AuthType {
        if self.client_secret.is_some() {
            AuthType::ClientCredentials
        } else {
            AuthType::DeviceCode
        }
    }
}

/// Partially known credentials, merged from several sources
#[derive(Debug, Clone, Default)]
pub struct CredentialOverrides {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl CredentialOverrides {
    fn fill_from(&mut self, vars: &HashMap<String, String>) {
        let lookup = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| vars.get(*k))
                .filter(|v| !v.is_empty())
                .cloned()
        };

        if self.tenant_id.is_none() {
            self.tenant_id = lookup(&["TENANTID", "TENANT_ID"]);
        }
        if self.client_id.is_none() {
            self.client_id = lookup(&["CLIENTID", "CLIENT_ID"]);
        }
        if self.client_secret.is_none() {
            self.client_secret = lookup(&["CLIENTSECRET", "CLIENT_SECRET"]);
        }
    }

    fn is_complete(&self) -> bool {
        self.tenant_id.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }
}

/// Token cache structure
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenCache {
    pub access_token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub tenant_id: String,
}

/// Configuration manager
#[derive(Clone)]
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("com", "camatrix", "camatrix").ok_or_else(|| {
            MatrixError::ConfigError("Failed to determine config directory".into())
        })?;

        Ok(Self::with_dir(project_dirs.config_dir()))
    }

    /// Use an explicit directory instead of the platform config location
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            config_dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn token_cache_file(&self, credentials: &Credentials) -> PathBuf {
        self.config_dir
            .join("cache")
            .join(format!("{}-{}.token", credentials.tenant_id, credentials.client_id))
    }

    /// Load `config.toml`, or defaults when it is absent
    pub fn load_settings(&self) -> Result<Settings> {
        let path = self.settings_file();

        if !path.exists() {
            return Ok(Settings::default());
        }

        let contents = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&contents)?;
        Ok(settings)
    }

    /// Resolve credentials: explicit values first, then `./.env`, then the config dir `.env`
    pub fn resolve_credentials(
        &self,
        explicit: CredentialOverrides,
        working_dir: &Path,
    ) -> Result<Credentials> {
        let mut merged = explicit;

        for env_path in [working_dir.join(".env"), self.config_dir.join(".env")] {
            if merged.is_complete() {
                break;
            }
            if env_path.exists() {
                tracing::debug!("Reading credentials from {}", env_path.display());
                let contents = fs::read_to_string(&env_path)?;
                merged.fill_from(&Self::parse_env_file(&contents));
            }
        }

        let mut missing = Vec::new();
        if merged.tenant_id.is_none() {
            missing.push("tenant ID (TENANTID)");
        }
        if merged.client_id.is_none() {
            missing.push("client ID (CLIENTID)");
        }

        match (merged.tenant_id, merged.client_id) {
            (Some(tenant_id), Some(client_id)) => Ok(Credentials {
                tenant_id,
                client_id,
                client_secret: merged.client_secret,
            }),
            _ => Err(MatrixError::ConfigError(format!(
                "Missing {}.\n\n\
                Set environment variables, pass --tenant-id/--client-id, or create a .env file:\n   \
                   TENANTID=your-tenant-id\n   \
                   CLIENTID=your-client-id\n   \
                   CLIENTSECRET=your-secret",
                missing.join(" and ")
            ))),
        }
    }

    /// Parse simple .env file format
    pub fn parse_env_file(contents: &str) -> HashMap<String, String> {
        let mut vars = HashMap::new();

        for line in contents.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let line = line.strip_prefix("export ").unwrap_or(line);

            if let Some(pos) = line.find('=') {
                let key = line[..pos].trim().to_uppercase();
                let value = line[pos + 1..].trim();

                let value = if value.len() >= 2
                    && ((value.starts_with('"') && value.ends_with('"'))
                        || (value.starts_with('\'') && value.ends_with('\'')))
                {
                    value[1..value.len() - 1].to_string()
                } else {
                    value.to_string()
                };

                vars.insert(key, value);
            }
        }

        vars
    }

    /// Save token cache
    pub fn save_token(&self, credentials: &Credentials, token: &TokenCache) -> Result<()> {
        let cache_dir = self.config_dir.join("cache");
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }

        let contents = serde_json::to_string_pretty(token)?;
        fs::write(self.token_cache_file(credentials), contents)?;
        Ok(())
    }

    /// Load a cached token that is still valid for a while
    pub fn load_token(&self, credentials: &Credentials) -> Result<TokenCache> {
        let token_path = self.token_cache_file(credentials);

        if !token_path.exists() {
            return Err(MatrixError::TokenNotFound);
        }

        let contents = fs::read_to_string(token_path)?;
        let token: TokenCache = serde_json::from_str(&contents)?;

        let margin = chrono::Duration::seconds(TOKEN_REUSE_MARGIN_SECS);
        if token.expires_at < chrono::Utc::now() + margin {
            return Err(MatrixError::AuthError("Token expired".into()));
        }

        Ok(token)
    }
}
