use crate::config::{AuthType, ConfigManager, Credentials, TokenCache};
use crate::error::{MatrixError, Result};
use colored::Colorize;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, DeviceAuthorizationUrl, EmptyExtraDeviceAuthorizationFields,
    Scope, TokenResponse, TokenUrl, basic::BasicClient, reqwest::async_http_client,
};
use std::time::Duration;

pub const MICROSOFT_AUTHORITY: &str = "https://login.microsoftonline.com";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

pub struct GraphAuth {
    config_manager: ConfigManager,
    authority: String,
    use_cache: bool,
}

impl GraphAuth {
    pub fn new(config_manager: ConfigManager) -> Self {
        Self {
            config_manager,
            authority: MICROSOFT_AUTHORITY.to_string(),
            use_cache: true,
        }
    }

    /// Point at a different login authority (sovereign clouds, tests)
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    fn endpoint(&self, tenant_id: &str, leaf: &str) -> String {
        format!("{}/{}/oauth2/v2.0/{}", self.authority, tenant_id, leaf)
    }

    /// Get a valid access token, from the cache when possible
    pub async fn get_access_token(
        &self,
        credentials: &Credentials,
        force_device_code: bool,
    ) -> Result<String> {
        if self.use_cache {
            match self.config_manager.load_token(credentials) {
                Ok(token) => {
                    tracing::debug!("Using cached token (expires {})", token.expires_at);
                    return Ok(token.access_token);
                }
                Err(MatrixError::TokenNotFound) | Err(MatrixError::AuthError(_)) => {}
                Err(e) => tracing::warn!("Ignoring unreadable token cache: {}", e),
            }
        }

        let auth_type = if force_device_code {
            AuthType::DeviceCode
        } else {
            credentials.auth_type()
        };

        let token = match auth_type {
            AuthType::ClientCredentials => self.login_client_credentials(credentials).await?,
            AuthType::DeviceCode => self.login_device_code(credentials).await?,
        };

        if self.use_cache {
            if let Err(e) = self.config_manager.save_token(credentials, &token) {
                tracing::warn!("Could not write token cache: {}", e);
            }
        }

        Ok(token.access_token)
    }

    /// Authenticate using client credentials flow (non-interactive)
    pub async fn login_client_credentials(&self, credentials: &Credentials) -> Result<TokenCache> {
        let client_secret = credentials.client_secret.as_ref().ok_or_else(|| {
            MatrixError::AuthError("Client secret required for client credentials flow".into())
        })?;

        tracing::debug!(
            "Requesting client credentials token for tenant {}",
            credentials.tenant_id
        );

        let tenant_id = &credentials.tenant_id;
        let client_id = ClientId::new(credentials.client_id.clone());
        let client_secret = ClientSecret::new(client_secret.clone());

        let auth_url = AuthUrl::new(self.endpoint(tenant_id, "authorize"))
            .map_err(|e| MatrixError::AuthError(format!("Invalid auth URL: {}", e)))?;

        let token_url = TokenUrl::new(self.endpoint(tenant_id, "token"))
            .map_err(|e| MatrixError::AuthError(format!("Invalid token URL: {}", e)))?;

        let client = BasicClient::new(client_id, Some(client_secret), auth_url, Some(token_url));

        let token = client
            .exchange_client_credentials()
            .add_scope(Scope::new(GRAPH_SCOPE.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| {
                MatrixError::AuthError(format!("Client credentials exchange failed: {}", e))
            })?;

        Ok(TokenCache {
            access_token: token.access_token().secret().clone(),
            expires_at: expiry_from(token.expires_in()),
            tenant_id: tenant_id.clone(),
        })
    }

    /// Authenticate using device code flow (interactive)
    pub async fn login_device_code(&self, credentials: &Credentials) -> Result<TokenCache> {
        println!(
            "{} Starting device code sign-in for tenant '{}'...",
            "→".cyan(),
            credentials.tenant_id
        );

        let tenant_id = &credentials.tenant_id;
        let client_id = ClientId::new(credentials.client_id.clone());

        let auth_url = AuthUrl::new(self.endpoint(tenant_id, "authorize"))
            .map_err(|e| MatrixError::AuthError(format!("Invalid auth URL: {}", e)))?;

        let token_url = TokenUrl::new(self.endpoint(tenant_id, "token"))
            .map_err(|e| MatrixError::AuthError(format!("Invalid token URL: {}", e)))?;

        let device_auth_url = DeviceAuthorizationUrl::new(self.endpoint(tenant_id, "devicecode"))
            .map_err(|e| MatrixError::AuthError(format!("Invalid device auth URL: {}", e)))?;

        let client = BasicClient::new(client_id, None, auth_url, Some(token_url))
            .set_device_authorization_url(device_auth_url);

        let details: oauth2::DeviceAuthorizationResponse<EmptyExtraDeviceAuthorizationFields> =
            client
                .exchange_device_code()
                .map_err(|e| MatrixError::AuthError(format!("Device code exchange failed: {}", e)))?
                .add_scope(Scope::new(GRAPH_SCOPE.to_string()))
                .request_async(async_http_client)
                .await
                .map_err(|e| {
                    MatrixError::AuthError(format!("Device authorization request failed: {}", e))
                })?;

        println!("\n  Visit: {}", details.verification_uri().as_str().bold());
        println!("  Code:  {}\n", details.user_code().secret().bold());

        let token = client
            .exchange_device_access_token(&details)
            .request_async(async_http_client, tokio::time::sleep, None)
            .await
            .map_err(|e| MatrixError::AuthError(format!("Token exchange failed: {}", e)))?;

        println!("{} Signed in", "✓".green());

        Ok(TokenCache {
            access_token: token.access_token().secret().clone(),
            expires_at: expiry_from(token.expires_in()),
            tenant_id: tenant_id.clone(),
        })
    }
}

/// Token expiry, treating a missing `expires_in` as one hour
fn expiry_from(expires_in: Option<Duration>) -> chrono::DateTime<chrono::Utc> {
    let lifetime = expires_in.unwrap_or(Duration::from_secs(3600));
    chrono::Utc::now()
        + chrono::Duration::from_std(lifetime).unwrap_or_else(|_| chrono::Duration::hours(1))
}
