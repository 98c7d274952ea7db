//! JSON-RPC ledger for nodes that manage the sender account.

use std::time::{Duration, Instant};

use alloy_core::primitives::{Address, Bytes, Selector, TxHash};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use super::{Ledger, Receipt, calldata, creation_code};
use crate::error::LedgerError;

/// Default timeout for a single RPC request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time allowed for a transaction to reach the confirmation depth.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Default interval between receipt and block-number polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Errors from a single JSON-RPC exchange.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc error {code}: {message}")]
    Node {
        code: i64,
        message: String,
        data: Option<Bytes>,
    },
    #[error("unexpected response to {method}: {reason}")]
    Decode { method: String, reason: String },
}

impl From<RpcError> for LedgerError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Transport(e) => LedgerError::Unavailable(e.to_string()),
            RpcError::Node { message, data, .. }
                if data.is_some() || message.to_lowercase().contains("revert") =>
            {
                LedgerError::Reverted {
                    tx_hash: None,
                    data,
                    message: Some(message),
                }
            }
            RpcError::Node { message, .. } => LedgerError::Rejected(message),
            err @ RpcError::Decode { .. } => LedgerError::Rejected(err.to_string()),
        }
    }
}

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, RpcError> {
    Ok(reqwest::Client::builder()
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()?)
}

/// Make a JSON-RPC call and deserialize the result.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &Url,
    method: &str,
    params: Vec<Value>,
) -> Result<T, RpcError> {
    let response: Value = client
        .post(url.clone())
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await?
        .json()
        .await?;

    if let Some(error) = response.get("error") {
        return Err(node_error(error));
    }

    let result = response.get("result").cloned().ok_or_else(|| RpcError::Decode {
        method: method.to_string(),
        reason: "no result in response".to_string(),
    })?;

    serde_json::from_value(result).map_err(|e| RpcError::Decode {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

/// Extract code, message and revert data from a JSON-RPC error object.
///
/// Nodes disagree on where revert data lives: it is either the `data` string
/// itself or nested one level down as `data.data`.
fn node_error(error: &Value) -> RpcError {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let data = error
        .get("data")
        .and_then(|d| d.as_str().or_else(|| d.get("data").and_then(Value::as_str)))
        .and_then(|hex_str| hex::decode(hex_str.trim_start_matches("0x")).ok())
        .map(Bytes::from);

    RpcError::Node {
        code,
        message,
        data,
    }
}

/// Parse a `0x`-prefixed hex quantity.
fn parse_hex_u64(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

/// Deserialize a u64 from a hex string (with 0x prefix).
fn deserialize_u64_from_hex<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    parse_hex_u64(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid quantity: {s}")))
}

fn deserialize_opt_u64_from_hex<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(deserializer)?;
    s.map(|s| {
        parse_hex_u64(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid quantity: {s}")))
    })
    .transpose()
}

/// The subset of a transaction receipt the ledger needs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: TxHash,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    block_number: u64,
    contract_address: Option<Address>,
    /// `0x1` on success, `0x0` on revert. Absent before Byzantium.
    #[serde(default, deserialize_with = "deserialize_opt_u64_from_hex")]
    status: Option<u64>,
}

impl RpcReceipt {
    fn succeeded(&self) -> bool {
        self.status != Some(0)
    }
}

/// A [`Ledger`] backed by an Ethereum JSON-RPC endpoint.
///
/// Transactions are sent with `eth_sendTransaction`, so the node must hold the
/// key for `from`. A transaction counts as confirmed once the head is
/// `confirmations - 1` blocks past the receipt's block.
#[derive(Debug, Clone)]
pub struct RpcLedger {
    client: reqwest::Client,
    url: Url,
    from: Address,
    confirmations: u64,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl RpcLedger {
    pub fn new(url: Url, from: Address) -> Result<Self, LedgerError> {
        Ok(Self {
            client: create_client()?,
            url,
            from,
            confirmations: 1,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Set the number of blocks (including the inclusion block) to wait for.
    pub fn confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations.max(1);
        self
    }

    pub fn confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        let number: String =
            json_rpc_call(&self.client, &self.url, "eth_blockNumber", vec![]).await?;
        parse_hex_u64(&number).ok_or_else(|| RpcError::Decode {
            method: "eth_blockNumber".to_string(),
            reason: format!("invalid quantity: {number}"),
        })
    }

    /// Submit `tx` and wait until it is confirmed.
    async fn send(&self, tx: Value) -> Result<Receipt, LedgerError> {
        let tx_hash: TxHash =
            json_rpc_call(&self.client, &self.url, "eth_sendTransaction", vec![tx.clone()])
                .await?;
        tracing::debug!(tx_hash = %tx_hash, "Transaction submitted");

        let deadline = Instant::now() + self.confirmation_timeout;

        let receipt: RpcReceipt = self
            .poll(tx_hash, deadline, move || async move {
                json_rpc_call::<Option<RpcReceipt>>(
                    &self.client,
                    &self.url,
                    "eth_getTransactionReceipt",
                    vec![serde_json::json!(tx_hash)],
                )
                .await
            })
            .await?;

        if !receipt.succeeded() {
            let (data, message) = self.revert_reason(&tx, receipt.block_number).await;
            return Err(LedgerError::Reverted {
                tx_hash: Some(tx_hash),
                data,
                message,
            });
        }

        let target = receipt.block_number + self.confirmations - 1;
        self.poll(tx_hash, deadline, move || async move {
            let head = self.block_number().await?;
            tracing::trace!(tx_hash = %tx_hash, head, target, "Waiting for confirmations");
            Ok((head >= target).then_some(head))
        })
        .await?;

        tracing::debug!(
            tx_hash = %tx_hash,
            block = receipt.block_number,
            confirmations = self.confirmations,
            "Transaction confirmed"
        );

        Ok(Receipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            contract_address: receipt.contract_address,
        })
    }

    /// Poll `check` until it yields a value or `deadline` passes.
    ///
    /// Errors from individual polls are logged and retried; only the deadline
    /// ends the wait.
    async fn poll<T, F, Fut>(
        &self,
        tx_hash: TxHash,
        deadline: Instant,
        check: F,
    ) -> Result<T, LedgerError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<Option<T>, RpcError>>,
    {
        loop {
            match check().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(e) => {
                    tracing::trace!(error = %e, tx_hash = %tx_hash, "Poll failed, retrying...");
                }
            }

            if Instant::now() >= deadline {
                return Err(LedgerError::Timeout {
                    tx_hash,
                    timeout: self.confirmation_timeout,
                });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Replay a reverted transaction with `eth_call` to recover its reason.
    async fn revert_reason(&self, tx: &Value, block: u64) -> (Option<Bytes>, Option<String>) {
        let result = json_rpc_call::<Value>(
            &self.client,
            &self.url,
            "eth_call",
            vec![tx.clone(), Value::String(format!("{block:#x}"))],
        )
        .await;

        match result {
            Err(RpcError::Node { message, data, .. }) => (data, Some(message)),
            Err(e) => {
                tracing::debug!(error = %e, "Could not replay reverted transaction");
                (None, None)
            }
            Ok(_) => (None, None),
        }
    }
}

impl Ledger for RpcLedger {
    fn sender(&self) -> Address {
        self.from
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        let id: String = json_rpc_call(&self.client, &self.url, "eth_chainId", vec![]).await?;
        parse_hex_u64(&id)
            .ok_or_else(|| LedgerError::Rejected(format!("invalid chain id returned: {id}")))
    }

    async fn publish(
        &self,
        bytecode: &Bytes,
        constructor_args: &Bytes,
    ) -> Result<Receipt, LedgerError> {
        let tx = serde_json::json!({
            "from": self.from,
            "data": creation_code(bytecode, constructor_args),
        });
        self.send(tx).await
    }

    async fn call(
        &self,
        to: Address,
        selector: Selector,
        args: &Bytes,
    ) -> Result<Receipt, LedgerError> {
        let tx = serde_json::json!({
            "from": self.from,
            "to": to,
            "data": calldata(selector, args),
        });
        self.send(tx).await
    }
}
