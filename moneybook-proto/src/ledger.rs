//! Request and response types of the remote ledger HTTP interface.
//!
//! The ledger exposes one endpoint. `GET` returns every row; `POST` writes,
//! with a `method` query parameter selecting the operation:
//!
//! | request | body | effect |
//! |---|---|---|
//! | `GET <endpoint>` | | all rows as `[FlatRecord]` |
//! | `POST <endpoint>` | `[FlatRecord]` | batch create |
//! | `POST <endpoint>?method=UPDATE` | `FlatRecord` | update by id |
//! | `POST <endpoint>?method=DELETE` | `{"id": ..}` | delete by id |

use serde::{Deserialize, Serialize};

/// Query parameter that selects a write operation.
pub const METHOD_PARAM: &str = "method";

/// Path the reference ledger server mounts the endpoint on.
pub const LEDGER_PATH: &str = "/ledger";

/// Write operation selected through [`METHOD_PARAM`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WriteMethod {
    /// Update one row by id.
    Update,
    /// Delete one row by id.
    Delete,
}

impl WriteMethod {
    /// Value used in the query string.
    #[must_use]
    pub const fn as_query_value(self) -> &'static str {
        match self {
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// Query string of a write request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteQuery {
    /// Absent for batch create.
    pub method: Option<WriteMethod>,
}

/// Body the ledger answers successful writes with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAck {
    /// Always `"success"` for a 2xx answer.
    pub status: String,
    /// Rows created, updated or deleted.
    pub affected: usize,
}

impl WriteAck {
    /// Acknowledgement for `affected` rows.
    #[must_use]
    pub fn success(affected: usize) -> Self {
        Self {
            status: "success".to_string(),
            affected,
        }
    }
}

/// Body of a non-2xx answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerErrorBody {
    /// Human-readable reason.
    pub error: String,
}
