//! OIDC discovery and JWKS handlers.
//!
//! Task targets verify the emulator's bearer tokens against these
//! endpoints, exactly as they would verify Google's against its
//! well-known configuration.

use axum::Json;
use axum::extract::State;

use mimiq_core::{DiscoveryDocument, JwkSet};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// `GET /.well-known/openid-configuration`
///
/// Enabled by configuring an issuer.
pub(crate) async fn discovery(State(state): State<AppState>) -> ApiResult<Json<DiscoveryDocument>> {
    if state.config.openid_issuer.is_none() {
        return Err(ApiError::not_found(
            "openid discovery is disabled; start the emulator with --openid-issuer",
        ));
    }
    let issuer = state.signer.issuer().to_string();
    Ok(Json(state.signer.discovery_document(&issuer)))
}

/// `GET /jwks`
pub(crate) async fn jwks(State(state): State<AppState>) -> Json<JwkSet> {
    Json(state.signer.jwks().clone())
}
