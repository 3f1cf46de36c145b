use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Graph API error: {0}")]
    GraphApiError(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Group '{0}' not found")]
    GroupNotFound(String),

    #[error("Group name '{name}' is ambiguous ({count} groups match); use the object ID instead")]
    AmbiguousGroup { name: String, count: usize },

    #[error("Token not found in cache")]
    TokenNotFound,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, MatrixError>;

/// Parse a Graph API error body into `code: message` with a hint for common failures
pub fn enhance_graph_error(error_response: &str) -> String {
    if let Ok(error_json) = serde_json::from_str::<serde_json::Value>(error_response) {
        if let Some(error_obj) = error_json.get("error") {
            let code = error_obj
                .get("code")
                .and_then(|c| c.as_str())
                .unwrap_or("Unknown");
            let message = error_obj
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("No message");

            let hint = match code {
                "Unauthorized" | "InvalidAuthenticationToken" => {
                    "\nHint: The access token was rejected. Check the tenant and client IDs, or rerun with --no-cache."
                }
                "Forbidden" | "Authorization_RequestDenied" | "InsufficientPrivileges" => {
                    "\nHint: The app registration needs Policy.Read.All, User.Read.All and GroupMember.Read.All with admin consent."
                }
                "Request_ResourceNotFound" | "NotFound" => {
                    "\nHint: The requested object doesn't exist. Check group and user IDs."
                }
                "TooManyRequests" => "\nHint: API rate limit exceeded. Lower --parallel and try again.",
                _ => "",
            };

            return format!("{}: {}{}", code, message, hint);
        }
    }

    error_response.to_string()
}
