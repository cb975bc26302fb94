//! HTTP/1.1 JSON client for cells.
//!
//! Cells expose two endpoints:
//!
//! | Method | Path | Body | Response |
//! |---|---|---|---|
//! | GET | `/state` | none | `CellState` |
//! | POST | `/work` | `Work` | rejected `Work` |

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use tracing::debug;

use crate::client::CellClient;
use crate::error::ClientError;
use crate::types::{CellState, Work};

/// Talks to one cell at `address` (`host:port`).
#[derive(Debug)]
pub struct HttpCellClient {
    address: String,
    state_timeout: Mutex<Duration>,
    communication_timeout: Duration,
}

impl HttpCellClient {
    pub fn new(address: &str, state_timeout: Duration, communication_timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            state_timeout: Mutex::new(state_timeout),
            communication_timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn round_trip(
        &self,
        method: http::Method,
        path: &str,
        body: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, ClientError> {
        let uri = format!("http://{}{}", self.address, path);

        let exchange = async {
            let stream = tokio::net::TcpStream::connect(&self.address)
                .await
                .map_err(|e| ClientError::Connect {
                    address: self.address.clone(),
                    reason: e.to_string(),
                })?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| ClientError::Http(e.to_string()))?;

            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "cell connection closed with error");
                }
            });

            let req = http::Request::builder()
                .method(method)
                .uri(&uri)
                .header("host", &self.address)
                .header("content-type", "application/json")
                .header("user-agent", "auction/0.1")
                .body(Full::new(body))
                .map_err(|e| ClientError::Http(e.to_string()))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| ClientError::Http(e.to_string()))?;

            let status = resp.status();
            let payload = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| ClientError::Http(e.to_string()))?
                .to_bytes();

            if !status.is_success() {
                debug!(%status, %uri, "cell returned non-2xx");
                return Err(ClientError::UnexpectedStatus(status.as_u16()));
            }
            Ok::<Bytes, ClientError>(payload)
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%uri, ?timeout, "cell request timed out");
                Err(ClientError::Timeout(timeout))
            }
        }
    }
}

#[async_trait]
impl CellClient for HttpCellClient {
    async fn fetch_state(&self) -> Result<CellState, ClientError> {
        let timeout = self.state_timeout();
        let payload = self
            .round_trip(http::Method::GET, "/state", Bytes::new(), timeout)
            .await?;
        Ok(serde_json::from_slice(&payload)?)
    }

    async fn perform(&self, work: &Work) -> Result<Work, ClientError> {
        let body = Bytes::from(serde_json::to_vec(work)?);
        let payload = self
            .round_trip(http::Method::POST, "/work", body, self.communication_timeout)
            .await?;
        Ok(serde_json::from_slice(&payload)?)
    }

    fn state_timeout(&self) -> Duration {
        *self.state_timeout.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state_timeout(&self, timeout: Duration) {
        *self.state_timeout.lock().unwrap_or_else(PoisonError::into_inner) = timeout;
    }
}
