//! Ledger HTTP server: shared state, routes and error mapping.
//!
//! Serves the four ledger operations on [`LEDGER_PATH`]:
//!
//! - `GET` returns every row,
//! - `POST` with an array body upserts a batch,
//! - `POST ?method=UPDATE` replaces one row (404 if unknown),
//! - `POST ?method=DELETE` removes one row (unknown ids succeed).
//!
//! A maintenance switch makes every ledger request answer 503, which is how
//! outages are simulated in end-to-end tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Json;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use moneybook_proto::flat::{DeleteRequest, FlatRecord};
use moneybook_proto::ledger::{LEDGER_PATH, LedgerErrorBody, WriteAck, WriteMethod, WriteQuery};
use serde::{Deserialize, Serialize};

use crate::store::LedgerTable;

/// Default maximum number of rows in one batch create.
///
/// Clients send every queued create in a single batch, so this bounds how
/// many records a client may create offline before its adds are refused.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10_000;

/// Default maximum request body size in bytes (16 MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Path of the maintenance switch.
pub const MAINTENANCE_PATH: &str = "/admin/maintenance";

/// Errors answered to ledger clients.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The ledger is switched to maintenance.
    #[error("ledger is in maintenance")]
    Maintenance,

    /// The batch holds more rows than allowed.
    #[error("batch of {len} rows exceeds the limit of {max}")]
    BatchTooLarge {
        /// Rows received.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// No row has the requested id.
    #[error("no row with id {0}")]
    NotFound(String),

    /// The body does not match the selected operation.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl LedgerError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::Maintenance => StatusCode::SERVICE_UNAVAILABLE,
            Self::BatchTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let body = LedgerErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Body of the maintenance switch, in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceSwitch {
    /// `true` makes every ledger request answer 503.
    pub enabled: bool,
}

/// Shared ledger server state.
pub struct LedgerState {
    /// Stored rows.
    pub table: LedgerTable,
    maintenance: AtomicBool,
    max_batch_size: usize,
    max_body_size: usize,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerState {
    /// Creates an empty ledger with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_BODY_SIZE, LedgerTable::new())
    }

    /// Creates a ledger with custom limits over `table`.
    #[must_use]
    pub fn with_config(max_batch_size: usize, max_body_size: usize, table: LedgerTable) -> Self {
        Self {
            table,
            maintenance: AtomicBool::new(false),
            max_batch_size,
            max_body_size,
        }
    }

    /// Turns maintenance mode on or off.
    pub fn set_maintenance(&self, enabled: bool) {
        let was = self.maintenance.swap(enabled, Ordering::AcqRel);
        if was != enabled {
            tracing::info!(enabled, "maintenance mode changed");
        }
    }

    /// Returns `true` while in maintenance mode.
    #[must_use]
    pub fn in_maintenance(&self) -> bool {
        self.maintenance.load(Ordering::Acquire)
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.in_maintenance() {
            Err(LedgerError::Maintenance)
        } else {
            Ok(())
        }
    }
}

/// Builds the ledger router over `state`.
pub fn router(state: Arc<LedgerState>) -> axum::Router {
    let body_limit = state.max_body_size;
    axum::Router::new()
        .route(LEDGER_PATH, axum::routing::get(list_rows).post(write_rows))
        .route(MAINTENANCE_PATH, axum::routing::post(switch_maintenance))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Starts the ledger server on `addr` with an empty table.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(LedgerState::new())).await
}

/// Starts the ledger server with a pre-configured [`LedgerState`].
///
/// Returns the bound address (useful with port 0) and the server task.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<LedgerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "ledger server error");
        }
    });

    Ok((bound_addr, handle))
}

async fn list_rows(
    State(state): State<Arc<LedgerState>>,
) -> Result<Json<Vec<FlatRecord>>, LedgerError> {
    state.check_available()?;
    let rows = state.table.all().await;
    tracing::debug!(rows = rows.len(), "rows listed");
    Ok(Json(rows))
}

async fn write_rows(
    State(state): State<Arc<LedgerState>>,
    Query(query): Query<WriteQuery>,
    body: Bytes,
) -> Result<Json<WriteAck>, LedgerError> {
    state.check_available()?;
    let affected = match query.method {
        None => {
            let batch: Vec<FlatRecord> = parse(&body)?;
            if batch.len() > state.max_batch_size {
                return Err(LedgerError::BatchTooLarge {
                    len: batch.len(),
                    max: state.max_batch_size,
                });
            }
            let len = batch.len();
            let inserted = state.table.upsert_batch(batch).await;
            tracing::info!(rows = len, inserted, "batch created");
            len
        }
        Some(WriteMethod::Update) => {
            let row: FlatRecord = parse(&body)?;
            let id = row.id.clone();
            if !state.table.update(row).await {
                return Err(LedgerError::NotFound(id));
            }
            tracing::info!(id = %id, "row updated");
            1
        }
        Some(WriteMethod::Delete) => {
            let request: DeleteRequest = parse(&body)?;
            let removed = state.table.delete(&request.id).await;
            tracing::info!(id = %request.id, removed, "row deleted");
            usize::from(removed)
        }
    };
    Ok(Json(WriteAck::success(affected)))
}

async fn switch_maintenance(
    State(state): State<Arc<LedgerState>>,
    Json(switch): Json<MaintenanceSwitch>,
) -> Json<MaintenanceSwitch> {
    state.set_maintenance(switch.enabled);
    Json(switch)
}

fn parse<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, LedgerError> {
    serde_json::from_slice(body).map_err(|e| LedgerError::BadRequest(e.to_string()))
}
