//! Ethereum JSON-RPC node adapter over HTTP.
//!
//! Live log subscriptions are emulated with `eth_newFilter` and a polling
//! task calling `eth_getFilterChanges`. The task ends (and with it the
//! stream) after `MAX_FILTER_POLL_FAILURES` consecutive failed polls or when
//! the receiver is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_types::{Identity, TxHash};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::{
    BlockTag, CallRequest, LogFilter, RawLog, TransactionReceipt, TransactionRequest,
};
use crate::error::{LedgerError, LedgerResult};
use crate::ports::{LedgerNode, LogStream, NodeConnector};

/// Default HTTP timeout per request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between `eth_getFilterChanges` polls.
pub const DEFAULT_FILTER_POLL_INTERVAL: Duration = Duration::from_secs(1);

const LOG_BUFFER: usize = 256;

/// Consecutive failed `eth_getFilterChanges` polls before the filter is
/// considered lost.
pub const MAX_FILTER_POLL_FAILURES: u32 = 3;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    method: &'a str,
    params: P,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
    contract_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcTransaction {
    from: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    data: String,
    block_number: Option<String>,
    transaction_hash: Option<String>,
    log_index: Option<String>,
}

/// Cheap to clone; shared by the node and its filter-polling tasks.
#[derive(Clone)]
struct RpcClient {
    http_client: reqwest::Client,
    rpc_url: Arc<str>,
    request_id: Arc<AtomicU64>,
}

impl RpcClient {
    fn new(rpc_url: &str, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http_client,
            rpc_url: Arc::from(rpc_url),
            request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> LedgerResult<R> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };

        let response = self
            .http_client
            .post(&*self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LedgerError::NodeUnreachable {
                reason: format!("{method}: {e}"),
            })?;

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::unexpected(format!("{method}: {e}")))?;

        if let Some(error) = rpc_response.error {
            return Err(LedgerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        serde_json::from_value(rpc_response.result.unwrap_or(Value::Null))
            .map_err(|e| LedgerError::unexpected(format!("{method}: {e}")))
    }
}

pub struct JsonRpcLedgerNode {
    rpc: RpcClient,
    filter_poll_interval: Duration,
}

impl JsonRpcLedgerNode {
    pub fn new(rpc_url: &str, timeout: Duration, filter_poll_interval: Duration) -> Self {
        Self {
            rpc: RpcClient::new(rpc_url, timeout),
            filter_poll_interval,
        }
    }
}

#[async_trait]
impl LedgerNode for JsonRpcLedgerNode {
    async fn is_listening(&self) -> LedgerResult<bool> {
        self.rpc.call("net_listening", Vec::<()>::new()).await
    }

    async fn send_transaction(&self, request: TransactionRequest) -> LedgerResult<TxHash> {
        let hash: String = self
            .rpc
            .call("eth_sendTransaction", [transaction_object(&request)])
            .await?;
        Ok(TxHash::from_hex(&hash)?)
    }

    async fn call(&self, request: CallRequest) -> LedgerResult<Vec<u8>> {
        let mut call = json!({
            "to": request.to.as_str(),
            "data": hex_bytes(&request.data),
        });
        if let Some(from) = &request.from {
            call["from"] = json!(from.as_str());
        }
        let output: String = self.rpc.call("eth_call", json!([call, "latest"])).await?;
        parse_hex_bytes(&output)
    }

    async fn transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> LedgerResult<Option<TransactionReceipt>> {
        let receipt: Option<RpcReceipt> = self
            .rpc
            .call("eth_getTransactionReceipt", [tx_hash.to_string()])
            .await?;
        receipt.map(convert_receipt).transpose()
    }

    async fn block_number(&self) -> LedgerResult<u64> {
        let number: String = self.rpc.call("eth_blockNumber", Vec::<()>::new()).await?;
        parse_hex_u64(&number)
    }

    async fn transaction_sender(&self, tx_hash: TxHash) -> LedgerResult<Option<Identity>> {
        let tx: Option<RpcTransaction> = self
            .rpc
            .call("eth_getTransactionByHash", [tx_hash.to_string()])
            .await?;
        tx.map(|tx| Identity::parse(&tx.from).map_err(LedgerError::from))
            .transpose()
    }

    async fn subscribe_logs(&self, filter: LogFilter) -> LedgerResult<LogStream> {
        let filter_id: String = self
            .rpc
            .call("eth_newFilter", [filter_object(&filter)])
            .await?;
        debug!(filter_id = %filter_id, "[rpc] Installed log filter");

        let (sender, receiver) = mpsc::channel(LOG_BUFFER);
        tokio::spawn(poll_filter(
            self.rpc.clone(),
            filter_id,
            self.filter_poll_interval,
            sender,
        ));
        Ok(receiver)
    }

    async fn past_logs(&self, filter: LogFilter) -> LedgerResult<Vec<RawLog>> {
        let logs: Vec<RpcLog> = self
            .rpc
            .call("eth_getLogs", [filter_object(&filter)])
            .await?;
        logs.into_iter().map(convert_log).collect()
    }
}

async fn poll_filter(
    rpc: RpcClient,
    filter_id: String,
    interval: Duration,
    sender: mpsc::Sender<RawLog>,
) {
    let mut failures = 0;
    loop {
        tokio::select! {
            _ = sender.closed() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let changes: Vec<RpcLog> = match rpc.call("eth_getFilterChanges", [&filter_id]).await {
            Ok(changes) => {
                failures = 0;
                changes
            }
            Err(e) => {
                failures += 1;
                if failures >= MAX_FILTER_POLL_FAILURES {
                    warn!(filter_id = %filter_id, error = %e, "[rpc] Log filter lost");
                    break;
                }
                debug!(filter_id = %filter_id, failures, error = %e, "[rpc] Filter poll failed, retrying");
                continue;
            }
        };

        for log in changes {
            match convert_log(log) {
                Ok(raw) => {
                    if sender.send(raw).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(filter_id = %filter_id, error = %e, "[rpc] Dropping malformed log"),
            }
        }
    }

    let _ = rpc
        .call::<_, Value>("eth_uninstallFilter", [&filter_id])
        .await;
}

fn hex_bytes(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn parse_hex_bytes(raw: &str) -> LedgerResult<Vec<u8>> {
    let body = raw.trim_start_matches("0x");
    hex::decode(body).map_err(|e| LedgerError::unexpected(format!("invalid hex data {raw}: {e}")))
}

fn parse_hex_u64(raw: &str) -> LedgerResult<u64> {
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| LedgerError::unexpected(format!("invalid hex quantity {raw}: {e}")))
}

fn parse_topic(raw: &str) -> LedgerResult<[u8; 32]> {
    parse_hex_bytes(raw)?
        .try_into()
        .map_err(|_| LedgerError::unexpected(format!("topic {raw} is not 32 bytes")))
}

fn block_tag(tag: BlockTag) -> Value {
    match tag {
        BlockTag::Earliest => json!("earliest"),
        BlockTag::Latest => json!("latest"),
        BlockTag::Number(n) => json!(format!("0x{n:x}")),
    }
}

fn transaction_object(request: &TransactionRequest) -> Value {
    let mut tx = json!({
        "from": request.from.as_str(),
        "data": hex_bytes(&request.data),
    });
    if let Some(to) = &request.to {
        tx["to"] = json!(to.as_str());
    }
    if let Some(gas) = request.gas {
        tx["gas"] = json!(format!("0x{gas:x}"));
    }
    tx
}

fn filter_object(filter: &LogFilter) -> Value {
    let mut object = json!({
        "address": filter.address.as_str(),
        "fromBlock": block_tag(filter.from_block),
    });
    if !filter.topics.is_empty() {
        let first: Vec<String> = filter.topics.iter().map(|t| hex_bytes(t)).collect();
        object["topics"] = json!([first]);
    }
    object
}

fn convert_receipt(receipt: RpcReceipt) -> LedgerResult<TransactionReceipt> {
    let success = match receipt.status.as_deref() {
        Some(status) => parse_hex_u64(status)? == 1,
        None => true,
    };
    Ok(TransactionReceipt {
        tx_hash: TxHash::from_hex(&receipt.transaction_hash)?,
        block_number: receipt
            .block_number
            .as_deref()
            .map(parse_hex_u64)
            .transpose()?
            .unwrap_or_default(),
        success,
        contract_address: receipt
            .contract_address
            .as_deref()
            .map(Identity::parse)
            .transpose()?,
    })
}

fn convert_log(log: RpcLog) -> LedgerResult<RawLog> {
    Ok(RawLog {
        address: Identity::parse(&log.address)?,
        topics: log
            .topics
            .iter()
            .map(|t| parse_topic(t))
            .collect::<LedgerResult<_>>()?,
        data: parse_hex_bytes(&log.data)?,
        block_number: log.block_number.as_deref().map(parse_hex_u64).transpose()?,
        tx_hash: log
            .transaction_hash
            .as_deref()
            .map(TxHash::from_hex)
            .transpose()?,
        log_index: log.log_index.as_deref().map(parse_hex_u64).transpose()?,
    })
}

/// Dials [`JsonRpcLedgerNode`]s for one endpoint.
pub struct JsonRpcConnector {
    rpc_url: String,
    timeout: Duration,
    filter_poll_interval: Duration,
}

impl JsonRpcConnector {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            filter_poll_interval: DEFAULT_FILTER_POLL_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_filter_poll_interval(mut self, interval: Duration) -> Self {
        self.filter_poll_interval = interval;
        self
    }
}

impl NodeConnector for JsonRpcConnector {
    fn connect(&self) -> LedgerResult<Arc<dyn LedgerNode>> {
        Ok(Arc::new(JsonRpcLedgerNode::new(
            &self.rpc_url,
            self.timeout,
            self.filter_poll_interval,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_object_omits_absent_fields() {
        let request = TransactionRequest {
            from: Identity::parse("0xC0").unwrap(),
            to: None,
            data: vec![0x60, 0x80],
            gas: None,
        };
        let tx = transaction_object(&request);
        assert_eq!(tx, json!({"from": "0xc0", "data": "0x6080"}));

        let with_gas = TransactionRequest {
            to: Some(Identity::parse("0xff").unwrap()),
            gas: Some(21000),
            ..request
        };
        let tx = transaction_object(&with_gas);
        assert_eq!(tx["to"], json!("0xff"));
        assert_eq!(tx["gas"], json!("0x5208"));
    }

    #[test]
    fn test_filter_object_topics() {
        let filter = LogFilter {
            address: Identity::parse("0xff").unwrap(),
            topics: vec![[0xab; 32]],
            from_block: BlockTag::Earliest,
        };
        let object = filter_object(&filter);
        assert_eq!(object["fromBlock"], json!("earliest"));
        assert_eq!(object["topics"][0][0], json!(format!("0x{}", "ab".repeat(32))));

        let catch_all = LogFilter {
            topics: vec![],
            from_block: BlockTag::Number(16),
            ..filter
        };
        let object = filter_object(&catch_all);
        assert!(object.get("topics").is_none());
        assert_eq!(object["fromBlock"], json!("0x10"));
    }

    #[test]
    fn test_convert_receipt_status() {
        let hash = format!("0x{}", "11".repeat(32));
        let receipt: RpcReceipt = serde_json::from_value(json!({
            "transactionHash": hash,
            "blockNumber": "0x1b",
            "status": "0x0",
            "contractAddress": null,
        }))
        .unwrap();
        let converted = convert_receipt(receipt).unwrap();
        assert!(!converted.success);
        assert_eq!(converted.block_number, 27);
        assert_eq!(converted.contract_address, None);
    }

    #[test]
    fn test_convert_log() {
        let log: RpcLog = serde_json::from_value(json!({
            "address": "0x00000000000000000000000000000000000000FF",
            "topics": [format!("0x{}", "22".repeat(32))],
            "data": "0x",
            "blockNumber": "0x2",
            "transactionHash": format!("0x{}", "33".repeat(32)),
            "logIndex": "0x0",
        }))
        .unwrap();
        let raw = convert_log(log).unwrap();
        assert_eq!(
            raw.address.as_str(),
            "0x00000000000000000000000000000000000000ff"
        );
        assert_eq!(raw.topics, vec![[0x22; 32]]);
        assert!(raw.data.is_empty());
        assert_eq!(raw.block_number, Some(2));
        assert_eq!(raw.log_index, Some(0));
    }

    #[test]
    fn test_short_topic_is_rejected() {
        assert!(parse_topic("0xabcd").is_err());
        assert!(parse_hex_u64("0xzz").is_err());
    }

    /// Serves `eth_getFilterChanges` from a script of failures (`true`) and
    /// empty results, counting polls.
    async fn scripted_filter_node(script: Vec<bool>) -> (String, Arc<AtomicU64>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let polls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&polls);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.ends_with(b"}") {
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let body = if String::from_utf8_lossy(&request).contains("eth_getFilterChanges") {
                    let n = counter.fetch_add(1, Ordering::SeqCst) as usize;
                    if script.get(n).copied().unwrap_or(true) {
                        r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"filter not found"}}"#
                    } else {
                        r#"{"jsonrpc":"2.0","id":1,"result":[]}"#
                    }
                } else {
                    r#"{"jsonrpc":"2.0","id":1,"result":true}"#
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        (url, polls)
    }

    #[tokio::test]
    async fn test_filter_poll_retries_before_giving_up() {
        let (url, polls) = scripted_filter_node(vec![true, false, true, true, true]).await;
        let (sender, mut receiver) = mpsc::channel(4);

        tokio::time::timeout(
            Duration::from_secs(10),
            poll_filter(
                RpcClient::new(&url, Duration::from_secs(2)),
                "0x1".to_string(),
                Duration::from_millis(5),
                sender,
            ),
        )
        .await
        .unwrap();

        assert!(receiver.recv().await.is_none());
        assert_eq!(polls.load(Ordering::SeqCst), 2 + u64::from(MAX_FILTER_POLL_FAILURES));
    }

    #[tokio::test]
    async fn test_unreachable_node() {
        let node = JsonRpcConnector::new("http://127.0.0.1:9")
            .with_timeout(Duration::from_millis(200))
            .connect()
            .unwrap();
        assert!(matches!(
            node.is_listening().await,
            Err(LedgerError::NodeUnreachable { .. })
        ));
    }
}
