// src/services/api_server.rs
//! API Server for the DID anchoring service
//!
//! Thin axum binding over [`CredentialIssuer`] and the registry client:
//! - Request nonce issuance bound to the caller's IP
//! - Pre-signed DID registration and DID document resolution
//! - Credential issuance, revocation, renewal and status
//! - Recent on-chain attribute changes of a credential
//!
//! Verification and replay failures map to 401. Chain and storage failures
//! map to a generic 500 so no internal state leaks to callers.

use crate::contracts::did_registry::PresignedRegistration;
use crate::errors::DidError;
use crate::models::credential::CredentialState;
use crate::models::did::DIDDocument;
use crate::models::presentation::VerifiablePresentation;
use crate::services::credential_issuer::{CredentialIssuer, CredentialReceipt};
use crate::utils::crypto::SignatureTriple;
use axum::{
    extract::{ConnectInfo, Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use ethers_core::types::{Address, H256};
use ethers_core::utils::hex;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

// API request and response structures

/// Response carrying a fresh request nonce
#[derive(Serialize, Deserialize)]
struct NonceResponse {
    nonce: String,
}

/// Request payload for relaying a holder-signed DID registration
#[derive(Serialize, Deserialize)]
struct RegisterDIDRequest {
    did: String,
    /// Hex account address the DID is bound to
    account: String,
    v: u8,
    /// Hex, 32 bytes
    r: String,
    /// Hex, 32 bytes
    s: String,
}

/// Response carrying a submitted transaction hash
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxResponse {
    tx_hash: H256,
}

/// Response for DID resolution
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveDIDResponse {
    did_document: DIDDocument,
    content_hash: String,
}

/// Request payload for issuing a verifiable credential
#[derive(Serialize, Deserialize)]
struct IssueCredentialRequest {
    /// Credential kind, e.g. "WifiAccess"
    #[serde(rename = "type")]
    credential_type: String,
    subject: serde_json::Value,
    #[serde(default)]
    description: Option<String>,
}

/// Response for credential status
#[derive(Serialize, Deserialize)]
struct CredentialStatusResponse {
    id: String,
    state: CredentialState,
    revoked: bool,
    /// Past `expirationDate`; an expired credential may still be renewed.
    expired: bool,
}

/// One on-chain attribute change
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttributeChangeResponse {
    field_name: String,
    value: String,
    block_number: Option<u64>,
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for DidError {
    fn into_response(self) -> Response {
        let status = match &self {
            DidError::VerificationFailure | DidError::ReplayRejected(_) => StatusCode::UNAUTHORIZED,
            DidError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            DidError::NotFound(_) => StatusCode::NOT_FOUND,
            DidError::InvalidTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {}", self);
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

fn parse_word(name: &str, value: &str) -> Result<[u8; 32], DidError> {
    let bytes = hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| DidError::InvalidInput(format!("{} is not hex: {}", name, e)))?;
    bytes
        .try_into()
        .map_err(|_| DidError::InvalidInput(format!("{} must be 32 bytes", name)))
}

/// API server state containing all service dependencies
pub struct ApiServer {
    credential_issuer: Arc<CredentialIssuer>,
}

impl ApiServer {
    pub fn new(credential_issuer: Arc<CredentialIssuer>) -> Self {
        ApiServer { credential_issuer }
    }

    /// Routes of the service. Handlers read the caller's address, so the
    /// router must be served with connect info.
    pub fn router(self) -> Router {
        Router::new()
            .route("/nonce", get(Self::nonce_handler))
            .route("/did/register", post(Self::register_did_handler))
            .route("/did/:did", get(Self::resolve_did_handler))
            .route("/vc/issue", post(Self::issue_credential_handler))
            .route("/vc/revoke", post(Self::revoke_credential_handler))
            .route("/vc/renew", post(Self::renew_credential_handler))
            .route("/vc/:id/status", get(Self::credential_status_handler))
            .route("/vc/:id/events", get(Self::credential_events_handler))
            .with_state(Arc::new(self))
    }

    /// Starts the API server and serves until the listener fails.
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "127.0.0.1:8888")
    pub async fn run(self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("listening on {}", addr);
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    }

    // =====================
    // Nonce and DID Handlers
    // =====================

    /// Issues a request nonce for the caller's IP, replacing any earlier one.
    ///
    /// # Endpoint
    /// GET /nonce
    async fn nonce_handler(
        State(state): State<Arc<ApiServer>>,
        ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ) -> Json<NonceResponse> {
        let nonce = state
            .credential_issuer
            .nonces()
            .issue(&peer.ip().to_string());
        Json(NonceResponse { nonce })
    }

    /// Submits a DID registration signed by the holder.
    ///
    /// # Endpoint
    /// POST /did/register
    ///
    /// # Responses
    /// - 200 OK: Returns transaction hash
    /// - 400 Bad Request: Malformed account or signature
    /// - 401 Unauthorized: Signature does not match the account's nonce
    async fn register_did_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<RegisterDIDRequest>,
    ) -> Result<Json<TxResponse>, DidError> {
        let account = Address::from_str(&payload.account)
            .map_err(|e| DidError::InvalidInput(format!("account is not an address: {}", e)))?;
        let signature = SignatureTriple::from_parts(
            parse_word("r", &payload.r)?,
            parse_word("s", &payload.s)?,
            payload.v,
        )?;
        let registration = PresignedRegistration {
            did: payload.did,
            account,
            signature,
        };
        let tx_hash = state
            .credential_issuer
            .submit_registration(&registration)
            .await?;
        Ok(Json(TxResponse { tx_hash }))
    }

    /// Resolves a DID to its document representation.
    ///
    /// # Endpoint
    /// GET /did/:did
    async fn resolve_did_handler(
        State(state): State<Arc<ApiServer>>,
        Path(did): Path<String>,
    ) -> Result<Json<ResolveDIDResponse>, DidError> {
        let (did_document, content_hash) = state
            .credential_issuer
            .registry()
            .resolve_did_document(&did)
            .await?;
        Ok(Json(ResolveDIDResponse {
            did_document,
            content_hash: format!("0x{}", hex::encode(content_hash)),
        }))
    }

    // =====================
    // Credential Handlers
    // =====================

    /// # Endpoint
    /// POST /vc/issue
    async fn issue_credential_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<IssueCredentialRequest>,
    ) -> Result<Json<CredentialReceipt>, DidError> {
        state
            .credential_issuer
            .issue_credential(&payload.credential_type, payload.subject, payload.description)
            .await
            .map(Json)
    }

    /// # Endpoint
    /// POST /vc/revoke
    ///
    /// # Request Body
    /// Verifiable presentation carrying the credential and a nonce from
    /// `GET /nonce`.
    async fn revoke_credential_handler(
        State(state): State<Arc<ApiServer>>,
        ConnectInfo(peer): ConnectInfo<SocketAddr>,
        Json(presentation): Json<VerifiablePresentation>,
    ) -> Result<Json<CredentialReceipt>, DidError> {
        state
            .credential_issuer
            .revoke_credential(&peer.ip().to_string(), presentation)
            .await
            .map(Json)
    }

    /// # Endpoint
    /// POST /vc/renew
    async fn renew_credential_handler(
        State(state): State<Arc<ApiServer>>,
        ConnectInfo(peer): ConnectInfo<SocketAddr>,
        Json(presentation): Json<VerifiablePresentation>,
    ) -> Result<Json<CredentialReceipt>, DidError> {
        state
            .credential_issuer
            .renew_credential(&peer.ip().to_string(), presentation)
            .await
            .map(Json)
    }

    /// # Endpoint
    /// GET /vc/:id/status
    async fn credential_status_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
    ) -> Result<Json<CredentialStatusResponse>, DidError> {
        let stored = state
            .credential_issuer
            .store()
            .get_credential(&id)?
            .ok_or_else(|| DidError::NotFound(format!("credential {} is not stored", id)))?;
        Ok(Json(CredentialStatusResponse {
            id,
            state: stored.state,
            revoked: stored.state.is_terminal(),
            expired: stored.credential.is_expired(Utc::now()),
        }))
    }

    /// # Endpoint
    /// GET /vc/:id/events
    async fn credential_events_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
    ) -> Result<Json<Vec<AttributeChangeResponse>>, DidError> {
        let changes = state
            .credential_issuer
            .registry()
            .query_vc_changed_events(&id)
            .await?;
        Ok(Json(
            changes
                .into_iter()
                .map(|change| AttributeChangeResponse {
                    field_name: change.field_name,
                    value: String::from_utf8_lossy(&change.value).into_owned(),
                    block_number: change.block_number,
                })
                .collect(),
        ))
    }
}
