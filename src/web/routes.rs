use crate::db::IdentityDescriptor;
use crate::engine::{CodeResolver, CredentialManager};
use crate::error::{AppError, AppResult};
use crate::web::schemas::*;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared state for every handler
#[derive(Clone)]
pub struct AppState {
    pub credentials: Arc<CredentialManager>,
    pub resolver: CodeResolver,
}

impl AppState {
    pub fn new(credentials: Arc<CredentialManager>) -> Self {
        let resolver = CodeResolver::new(credentials.clone());
        Self {
            credentials,
            resolver,
        }
    }
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Transport public key for provisioning clients
pub async fn get_public_key(State(state): State<AppState>) -> Json<PublicKeyResponse> {
    Json(PublicKeyResponse {
        public_key: state.credentials.public_key_pem().to_string(),
    })
}

pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<IdentityDescriptor>)> {
    let identity = state
        .credentials
        .create_identity(&req.username, req.category)
        .await?;
    Ok((StatusCode::CREATED, Json(IdentityDescriptor::from(&identity))))
}

pub async fn list_users(State(state): State<AppState>) -> AppResult<Json<Vec<IdentityDescriptor>>> {
    let identities = state.credentials.list().await?;
    Ok(Json(identities.iter().map(IdentityDescriptor::from).collect()))
}

pub async fn get_user(
    Path(username): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<IdentityDescriptor>> {
    let identity = state.credentials.get(&username).await?;
    Ok(Json(IdentityDescriptor::from(&identity)))
}

/// Store a plaintext base32 secret
pub async fn save_secret(
    State(state): State<AppState>,
    Json(req): Json<SaveSecretRequest>,
) -> AppResult<Json<MessageResponse>> {
    state
        .credentials
        .set_plaintext_secret(&req.username, &req.secret_plain, req.secret_expires_at)
        .await?;
    Ok(Json(MessageResponse::new("Secret saved")))
}

/// Store a secret encrypted under the transport public key
pub async fn save_encrypted_secret(
    State(state): State<AppState>,
    Json(req): Json<EncryptedSecretRequest>,
) -> AppResult<Json<MessageResponse>> {
    let ciphertext = BASE64.decode(req.encrypted_secret.trim()).map_err(|e| {
        warn!("Encrypted secret for {} is not valid base64: {}", req.username, e);
        AppError::Decryption
    })?;

    state
        .credentials
        .provision_secret(&req.username, &ciphertext, req.secret_expires_at)
        .await?;
    Ok(Json(MessageResponse::new("Encrypted secret saved")))
}

pub async fn revoke_secret(
    Path(username): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<MessageResponse>> {
    state.credentials.revoke(&username).await?;
    Ok(Json(MessageResponse::new("Secret revoked")))
}

pub async fn delete_user(
    Path(username): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<MessageResponse>> {
    state.credentials.delete(&username).await?;
    Ok(Json(MessageResponse::new("User deleted")))
}

/// Verify a code for a named identity
pub async fn verify(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> AppResult<Json<VerifyResponse>> {
    let outcome = state
        .credentials
        .verify(&req.username, &req.totp_code)
        .await?;
    Ok(Json(VerifyResponse::from(outcome)))
}

/// Anonymous reader endpoint: resolve a bare code to an identity
pub async fn verify_code(
    State(state): State<AppState>,
    Json(req): Json<ReaderRequest>,
) -> AppResult<Json<ReaderResponse>> {
    let outcome = state.resolver.resolve(&req.code).await?;
    info!(
        method = ?req.method,
        granted = outcome.is_granted(),
        "Reader code processed"
    );
    Ok(Json(ReaderResponse::new(&outcome, req.method)))
}

/// Create the web router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/controller/public-key", get(get_public_key))
        .route("/controller/users", post(create_user).get(list_users))
        .route("/controller/users/secret", post(save_secret))
        .route("/controller/users/encrypted-secret", post(save_encrypted_secret))
        .route("/controller/users/{username}", get(get_user).delete(delete_user))
        .route("/controller/users/{username}/secret", delete(revoke_secret))
        .route("/controller/verify", post(verify))
        .route("/reader/verify-code", post(verify_code))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
