use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use octocrab::Octocrab;
use serde::Serialize;
use std::path::Path;

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};
use crate::platform::parse_repo;

#[derive(Debug, Serialize)]
struct JwtClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// Generate a JWT for GitHub App authentication.
pub fn generate_app_jwt(app_id: u64, private_key_path: &Path) -> Result<String> {
    let key_pem = std::fs::read(private_key_path).map_err(|e| {
        AppError::Config(format!(
            "Failed to read private key at {}: {e}",
            private_key_path.display()
        ))
    })?;

    let encoding_key = EncodingKey::from_rsa_pem(&key_pem)
        .map_err(|e| AppError::Config(format!("Invalid RSA private key: {e}")))?;

    let now = chrono::Utc::now().timestamp();
    let claims = JwtClaims {
        iat: now - 60,     // 60 seconds in the past to account for clock drift
        exp: now + 9 * 60, // under the 10 minute maximum
        iss: app_id.to_string(),
    };

    let header = Header::new(Algorithm::RS256);
    encode(&header, &claims, &encoding_key)
        .map_err(|e| AppError::Config(format!("Failed to generate JWT: {e}")))
}

/// Token used for both the REST API and git transport.
///
/// A configured personal token wins; otherwise the GitHub App installation on
/// `repo_full_name` is looked up and an installation token is minted.
pub async fn resolve_token(config: &GitHubConfig, repo_full_name: &str) -> Result<String> {
    if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }

    let (Some(app_id), Some(key_path)) = (config.app_id, config.private_key_path.as_deref())
    else {
        return Err(AppError::Config(
            "No GitHub token or App credentials configured".to_string(),
        ));
    };

    let (owner, repo) = parse_repo(repo_full_name)
        .ok_or_else(|| AppError::Config(format!("Invalid repo name: {repo_full_name}")))?;

    let jwt = generate_app_jwt(app_id, key_path)?;
    let client = Octocrab::builder()
        .personal_token(jwt)
        .build()
        .map_err(|e| AppError::GitHubApi(format!("Failed to build JWT client: {e}")))?;

    let installation: serde_json::Value = client
        .get(format!("/repos/{owner}/{repo}/installation"), None::<&()>)
        .await
        .map_err(|e| {
            AppError::GitHubApi(format!(
                "GitHub App is not installed on {repo_full_name}: {e}"
            ))
        })?;

    let installation_id = installation["id"]
        .as_u64()
        .ok_or_else(|| AppError::GitHubApi("No installation id in response".to_string()))?;

    let url = format!("/app/installations/{installation_id}/access_tokens");
    let response: serde_json::Value = client
        .post(&url, None::<&()>)
        .await
        .map_err(|e| AppError::GitHubApi(format!("Failed to create installation token: {e}")))?;

    let token = response["token"]
        .as_str()
        .ok_or_else(|| AppError::GitHubApi("No token in response".to_string()))?
        .to_string();

    let expires_at = response["expires_at"]
        .as_str()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc));

    tracing::info!(
        installation_id,
        expires_at = ?expires_at,
        "Obtained GitHub App installation token"
    );

    Ok(token)
}
