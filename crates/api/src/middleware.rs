use anyhow::anyhow;
use axum::body::Body;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::{extract::Request, response::Response};
use serde::{Deserialize, Serialize};

use coursehub_clients::PostgresClient;
use coursehub_common::{decrypt, get_current_timestamp, EnvVars, ModuleClient};
use coursehub_runtime::User;

use crate::env::ApiServerEnv;
use crate::response::AppError;
use crate::utils::extract_bearer_token;

/// Maximum age of a signed authentication payload.
const AUTH_FRESHNESS_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedRequest {
    pub user_id: String,
    pub timestamp: i64,
    pub origin: String,
}

/// Decrypts the bearer token and stashes the external user id as a request
/// extension. Tokens older than the freshness window are rejected.
pub async fn authenticate(mut req: Request, next: Next) -> Result<Response<Body>, AppError> {
    let env = ApiServerEnv::load();
    let token = extract_bearer_token(&req)?;
    let decrypted = decrypt(&token, &env.get_env_var("SECRET_SALT"))
        .map_err(|e| AppError::new(StatusCode::UNAUTHORIZED, anyhow!(e)))?;
    let authenticated = serde_json::from_str::<AuthenticatedRequest>(&decrypted)
        .map_err(|e| AppError::new(StatusCode::UNAUTHORIZED, anyhow!(e)))?;

    if authenticated.timestamp < get_current_timestamp() - AUTH_FRESHNESS_SECS {
        return Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            anyhow!("authenticate expired"),
        ));
    }

    req.extensions_mut().insert(authenticated.user_id);
    Ok(next.run(req).await)
}

/// Provisions (or fetches) the account behind an authenticated external id.
pub async fn ensure_account(db: &PostgresClient, user_id_str: &str) -> Result<User, AppError> {
    let mut conn = db.get_client().acquire().await?;
    let aka = user_id_str
        .split("email_")
        .nth(1)
        .unwrap_or(user_id_str)
        .to_string();
    let user = User::get_or_create(&mut conn, user_id_str, &aka).await?;
    Ok(user)
}

/// `ensure_account` plus an admin-role gate for the admin surface.
pub async fn require_admin(db: &PostgresClient, user_id_str: &str) -> Result<User, AppError> {
    let user = ensure_account(db, user_id_str).await?;
    if !user.is_admin() {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            anyhow!("admin role required"),
        ));
    }
    Ok(user)
}
