//! HTTP client for the remote ledger.

use std::time::Duration;

use moneybook_proto::flat::{DeleteRequest, FlatRecord};
use moneybook_proto::ledger::{LedgerErrorBody, METHOD_PARAM, WriteMethod};
use moneybook_proto::record::RecordId;
use reqwest::{Client, Response};
use url::Url;

use super::{RemoteError, RemoteLedger};

/// Remote ledger reached over HTTP with JSON bodies.
pub struct HttpLedger {
    client: Client,
    endpoint: Url,
}

impl HttpLedger {
    /// Builds a client for `endpoint`.
    ///
    /// `request_timeout` bounds a whole call; a timed-out call is reported
    /// as [`RemoteError::Timeout`].
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidEndpoint`] if `endpoint` does not parse
    /// as an absolute URL, or [`RemoteError::Http`] if the client cannot be
    /// built.
    pub fn new(
        endpoint: &str,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| RemoteError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client, endpoint })
    }

    /// The endpoint this client talks to.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Endpoint with `method=<m>` appended to whatever query it already has.
    fn write_url(&self, method: WriteMethod) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair(METHOD_PARAM, method.as_query_value());
        url
    }

    fn map_send_error(&self, e: reqwest::Error) -> RemoteError {
        if e.is_timeout() {
            RemoteError::Timeout
        } else if e.is_connect() {
            RemoteError::Unreachable(format!("cannot connect to {}", self.endpoint))
        } else {
            RemoteError::Http(e)
        }
    }

    async fn check(&self, response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.map_err(|e| self.map_send_error(e))?;
        let message = serde_json::from_str::<LedgerErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);
        Err(RemoteError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

impl RemoteLedger for HttpLedger {
    async fn fetch_all(&self) -> Result<Vec<FlatRecord>, RemoteError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let bytes = self
            .check(response)
            .await?
            .bytes()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let rows: Vec<FlatRecord> =
            serde_json::from_slice(&bytes).map_err(|e| RemoteError::Malformed(e.to_string()))?;
        tracing::debug!(rows = rows.len(), "fetched ledger rows");
        Ok(rows)
    }

    async fn create_batch(&self, records: &[FlatRecord]) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(records)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        self.check(response).await?;
        Ok(())
    }

    async fn update(&self, record: &FlatRecord) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.write_url(WriteMethod::Update))
            .json(record)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        self.check(response).await?;
        Ok(())
    }

    async fn delete(&self, id: &RecordId) -> Result<(), RemoteError> {
        let body = DeleteRequest {
            id: id.as_str().to_string(),
        };
        let response = self
            .client
            .post(self.write_url(WriteMethod::Delete))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        self.check(response).await?;
        Ok(())
    }
}
