use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;

use super::error::RemoteError;
use super::types::{Ack, CredentialsRequest, NodeBalance, NodeInfo};
use crate::config::Credentials;

const INFO_PATH: &str = "/node/info";
const BALANCE_PATH: &str = "/node/balance";
const UPDATE_PATH: &str = "/node/update";

/// The three node API operations the console depends on.
///
/// `None` means the node was unavailable for this call: non-2xx status,
/// timeout, transport error or undecodable body. It is never fatal.
pub trait NodeApi: Send + Sync {
    fn fetch_info(&self) -> impl Future<Output = Option<NodeInfo>> + Send;

    fn fetch_balance(&self) -> impl Future<Output = Option<NodeBalance>> + Send;

    fn register_credentials(&self) -> impl Future<Output = Option<Ack>> + Send;
}

pub struct NodeClient {
    client: Client,
    base_url: String,
    api_key: String,
    wallet_address: String,
    private_key: String,
}

impl NodeClient {
    pub fn new(credentials: &Credentials, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: credentials.api_url.trim_end_matches('/').to_string(),
            api_key: credentials.api_key.clone(),
            wallet_address: credentials.wallet_address.clone(),
            private_key: credentials.private_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        let response = self
            .client
            .get(self.url(path))
            .header("x-api-key", &self.api_key)
            .header("accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn put_credentials(&self) -> Result<Ack, RemoteError> {
        let body = CredentialsRequest {
            wallet_address: &self.wallet_address,
            private_key: &self.private_key,
        };
        let response = self
            .client
            .put(self.url(UPDATE_PATH))
            .header("x-api-key", &self.api_key)
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
            });
        }

        // The acknowledgment is opaque; an empty or non-JSON 200 still counts.
        let bytes = response.bytes().await?;
        Ok(Ack(serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)))
    }
}

impl NodeApi for NodeClient {
    async fn fetch_info(&self) -> Option<NodeInfo> {
        self.get_json(INFO_PATH)
            .await
            .inspect_err(|e| {
                tracing::debug!(endpoint = INFO_PATH, error = %e, "node info unavailable")
            })
            .ok()
    }

    async fn fetch_balance(&self) -> Option<NodeBalance> {
        self.get_json(BALANCE_PATH)
            .await
            .inspect_err(|e| {
                tracing::debug!(endpoint = BALANCE_PATH, error = %e, "node balance unavailable")
            })
            .ok()
    }

    async fn register_credentials(&self) -> Option<Ack> {
        self.put_credentials()
            .await
            .inspect_err(|e| {
                tracing::warn!(endpoint = UPDATE_PATH, error = %e, "credential update rejected")
            })
            .ok()
    }
}
