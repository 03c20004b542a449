//! HTTP routes over the ledger.
//!
//! Payloads travel hex-encoded in JSON bodies; the hash algorithm is chosen
//! with the `algorithm` query parameter (`sha256` or `blake2`).
//!
//! Block creation runs on the blocking pool while holding the ledger lock;
//! readers wait for it asynchronously.
use crate::batch::BatchHasher;
use crate::block::{Block, CANONICAL_FORMAT_VERSION};
use crate::blockchain::Blockchain;
use crate::errors::LedgerError;
use crate::storage::{BlockMetadata, Storage};
use crate::types::HashAlgorithm;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared application state passed to the handlers.
pub struct AppState<S: Storage> {
    ledger: Arc<Mutex<Blockchain<S>>>,
    pooled: Arc<BatchHasher>,
    sequential: Arc<BatchHasher>,
    cancel_mining: Arc<AtomicBool>,
}

impl<S: Storage> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            pooled: Arc::clone(&self.pooled),
            sequential: Arc::clone(&self.sequential),
            cancel_mining: Arc::clone(&self.cancel_mining),
        }
    }
}

impl<S: Storage> AppState<S> {
    pub fn new(blockchain: Blockchain<S>, pooled: BatchHasher) -> Self {
        Self {
            cancel_mining: blockchain.cancel_handle(),
            ledger: Arc::new(Mutex::new(blockchain)),
            pooled: Arc::new(pooled),
            sequential: Arc::new(BatchHasher::sequential()),
        }
    }

    fn hasher(&self, mode: HashMode) -> Arc<BatchHasher> {
        match mode {
            HashMode::Sequential => Arc::clone(&self.sequential),
            HashMode::Parallel => Arc::clone(&self.pooled),
        }
    }

    /// the ledger, once every other handle to the state is gone
    pub fn into_ledger(self) -> Option<Blockchain<S>> {
        Arc::try_unwrap(self.ledger).ok().map(Mutex::into_inner)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashMode {
    #[default]
    Sequential,
    Parallel,
}

#[derive(Debug, Deserialize)]
pub struct AddBlocksQuery {
    pub algorithm: String,
    #[serde(default)]
    pub mode: HashMode,
}

#[derive(Debug, Deserialize)]
pub struct PayloadBatch {
    pub payloads: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub payload: String,
}

#[derive(Serialize)]
struct ChainResponse<'a> {
    chain: &'a [Block],
    length: usize,
    /// canonical byte form the block hashes were computed over
    format_version: u8,
}

/// Errors surfaced to HTTP clients as `{"message": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Ledger(LedgerError),
    Worker(tokio::task::JoinError),
}

impl From<LedgerError> for ApiError {
    fn from(value: LedgerError) -> Self {
        ApiError::Ledger(value)
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(value: tokio::task::JoinError) -> Self {
        ApiError::Worker(value)
    }
}

/// HTTP status reported for a ledger error
pub fn status_code(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::UnsupportedAlgorithm(_) | LedgerError::MalformedInput(_) => {
            StatusCode::BAD_REQUEST
        }
        LedgerError::ChainNotBootstrapped { .. } => StatusCode::CONFLICT,
        LedgerError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        LedgerError::MiningCancelled => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Ledger(err) => (status_code(&err), err.to_string()),
            ApiError::Worker(err) => {
                error!("block worker failed: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Error adding block".to_string())
            }
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

/// decode every hex payload, rejecting the whole batch on the first bad one
pub fn decode_payloads(payloads: &[String]) -> Result<Vec<Vec<u8>>, LedgerError> {
    payloads
        .iter()
        .enumerate()
        .map(|(position, payload)| {
            hex::decode(payload.trim()).map_err(|err| {
                LedgerError::MalformedInput(format!("payload {}: {}", position, err))
            })
        })
        .collect()
}

/// POST /blocks
async fn add_blocks<S>(
    State(state): State<AppState<S>>,
    Query(query): Query<AddBlocksQuery>,
    Json(batch): Json<PayloadBatch>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError>
where
    S: Storage + Send + 'static,
{
    let algorithm: HashAlgorithm = query.algorithm.parse()?;
    let payloads = decode_payloads(&batch.payloads)?;
    let hasher = state.hasher(query.mode);

    let blocks: Vec<BlockMetadata> = tokio::task::spawn_blocking(move || {
        let mut ledger = state.ledger.blocking_lock();
        hasher.commit(&mut *ledger, &payloads, algorithm)
    })
    .await??;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Blocks created successfully", "blocks": blocks })),
    ))
}

/// POST /block
async fn add_block<S>(
    State(state): State<AppState<S>>,
    Query(query): Query<AddBlocksQuery>,
    Json(batch): Json<PayloadBatch>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError>
where
    S: Storage + Send + 'static,
{
    let algorithm: HashAlgorithm = query.algorithm.parse()?;
    let payloads = decode_payloads(&batch.payloads)?;
    let hasher = state.hasher(query.mode);

    let (block, timing) = tokio::task::spawn_blocking(move || {
        let mut ledger = state.ledger.blocking_lock();
        let timing = hasher.commit_single(&mut *ledger, &payloads, algorithm)?;
        let block = ledger.get_last_block().cloned();
        Ok::<_, LedgerError>((block, timing))
    })
    .await??;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Pictures added and a block is MINED",
            "block": block,
            "algorithm": algorithm,
            "execution_time": timing.elapsed_time,
        })),
    ))
}

/// POST /search
async fn search<S>(
    State(state): State<AppState<S>>,
    Json(request): Json<SearchRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError>
where
    S: Storage + Send + 'static,
{
    let payload = hex::decode(request.payload.trim())
        .map_err(|err| LedgerError::MalformedInput(format!("payload: {}", err)))?;
    let outcome = state.ledger.lock().await.search_payload(&payload);
    let status = if outcome.is_found() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    let mut body = json!({ "message": outcome.message() });
    if let Some(block_index) = outcome.block_index() {
        body["block_index"] = json!(block_index);
    }
    Ok((status, Json(body)))
}

/// GET /chain
async fn chain<S>(State(state): State<AppState<S>>) -> Json<serde_json::Value>
where
    S: Storage + Send + 'static,
{
    let ledger = state.ledger.lock().await;
    let body = json!(ChainResponse {
        chain: ledger.blocks(),
        length: ledger.len(),
        format_version: CANONICAL_FORMAT_VERSION,
    });
    Json(body)
}

/// GET /valid
async fn valid<S>(State(state): State<AppState<S>>) -> Json<serde_json::Value>
where
    S: Storage + Send + 'static,
{
    let report = state.ledger.lock().await.validate_chain();
    Json(json!(report))
}

/// GET /audit
async fn audit<S>(State(state): State<AppState<S>>) -> Json<serde_json::Value>
where
    S: Storage + Send + 'static,
{
    let mismatched = state.ledger.lock().await.audit_block_hashes();
    Json(json!({ "consistent": mismatched.is_empty(), "mismatched_blocks": mismatched }))
}

/// GET /metadata, the series an external plotter draws
async fn metadata<S>(
    State(state): State<AppState<S>>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError>
where
    S: Storage + Send + 'static,
{
    let records = state.ledger.lock().await.block_metadata()?;
    if records.is_empty() {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "No block metadata available to plot" })),
        ));
    }
    let series: Vec<_> = records
        .iter()
        .map(|record| json!({ "block_index": record.block_index, "elapsed_time": record.elapsed_time }))
        .collect();
    Ok((StatusCode::OK, Json(json!({ "metadata": series }))))
}

pub fn router<S>(state: AppState<S>) -> Router
where
    S: Storage + Send + 'static,
{
    Router::new()
        .route("/blocks", post(add_blocks::<S>))
        .route("/block", post(add_block::<S>))
        .route("/search", post(search::<S>))
        .route("/chain", get(chain::<S>))
        .route("/valid", get(valid::<S>))
        .route("/audit", get(audit::<S>))
        .route("/metadata", get(metadata::<S>))
        .with_state(state)
}

/// Serve `state` on `addr` until ctrl-c.
///
/// On shutdown a block still searching for its proof is abandoned, its
/// request answered with 503.
pub async fn serve<S>(addr: SocketAddr, state: AppState<S>) -> std::io::Result<()>
where
    S: Storage + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("running on http://{}", listener.local_addr()?);
    let cancel_mining = Arc::clone(&state.cancel_mining);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl-c: {}", err);
            }
            info!("shutting down");
            cancel_mining.store(true, Ordering::Relaxed);
        })
        .await
}
