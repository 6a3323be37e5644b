//! In-memory doubles for the outbound ports.
//!
//! Exported so downstream crates and integration tests can drive the
//! subsystem without a ledger node or a controller endpoint.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use shared_types::{DataState, Identity, SubjectId, TxHash};
use tokio::sync::{mpsc, OwnedRwLockWriteGuard, RwLock};

use crate::domain::{
    keccak256, AbiError, CallRequest, ContractAbi, Function, LedgerEvent, LogFilter, RawLog,
    Token, TransactionReceipt, TransactionRequest,
};
use crate::error::{CallSite, LedgerError, LedgerResult, WorkflowError, WorkflowResult};
use crate::ports::{ConsentLedgerApi, LedgerNode, LogStream, NodeConnector, PeerDataSource};

/// Scripted outcome of one receipt poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptPoll {
    NotYet,
    RpcError,
    Mined,
    Reverted,
}

struct LiveFilter {
    filter: LogFilter,
    sender: mpsc::Sender<RawLog>,
}

/// Ledger node double with scripted receipts and call results.
///
/// Every RPC is appended to a journal under its JSON-RPC method name.
pub struct MockLedgerNode {
    listening: AtomicBool,
    probes: AtomicU32,
    auto_mine: AtomicBool,
    receipt_script: Mutex<VecDeque<ReceiptPoll>>,
    receipt_polls: AtomicU32,
    call_results: Mutex<HashMap<[u8; 4], Vec<u8>>>,
    sent: Mutex<Vec<(TxHash, TransactionRequest)>>,
    senders: Mutex<HashMap<TxHash, Identity>>,
    deploy_address: Mutex<Option<Identity>>,
    event_sender: Mutex<Option<Identity>>,
    filters: Mutex<Vec<LiveFilter>>,
    filters_opened: AtomicU32,
    history: Mutex<Vec<RawLog>>,
    journal: Mutex<Vec<String>>,
    nonce: AtomicU64,
    block: AtomicU64,
}

impl MockLedgerNode {
    pub fn new() -> Self {
        Self {
            listening: AtomicBool::new(true),
            probes: AtomicU32::new(0),
            auto_mine: AtomicBool::new(true),
            receipt_script: Mutex::new(VecDeque::new()),
            receipt_polls: AtomicU32::new(0),
            call_results: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            senders: Mutex::new(HashMap::new()),
            deploy_address: Mutex::new(None),
            event_sender: Mutex::new(None),
            filters: Mutex::new(Vec::new()),
            filters_opened: AtomicU32::new(0),
            history: Mutex::new(Vec::new()),
            journal: Mutex::new(Vec::new()),
            nonce: AtomicU64::new(0),
            block: AtomicU64::new(0),
        }
    }

    pub fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::SeqCst);
    }

    /// Liveness probes answered so far.
    pub fn probe_count(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    /// When the script is exhausted, `true` mines every transaction and
    /// `false` leaves it pending forever.
    pub fn set_auto_mine(&self, enabled: bool) {
        self.auto_mine.store(enabled, Ordering::SeqCst);
    }

    pub fn script_receipts(&self, polls: impl IntoIterator<Item = ReceiptPoll>) {
        self.receipt_script.lock().extend(polls);
    }

    pub fn receipt_polls(&self) -> u32 {
        self.receipt_polls.load(Ordering::SeqCst)
    }

    /// Answer every call of `function` with `values`.
    pub fn set_call_result(&self, function: &Function, values: &[Token]) -> Result<(), AbiError> {
        let encoded = function.encode_output(values)?;
        self.call_results.lock().insert(function.selector(), encoded);
        Ok(())
    }

    pub fn set_deploy_address(&self, address: Identity) {
        *self.deploy_address.lock() = Some(address);
    }

    /// Sender reported for transactions that emitted events.
    pub fn set_event_sender(&self, sender: Identity) {
        *self.event_sender.lock() = Some(sender);
    }

    pub fn sent_transactions(&self) -> Vec<TransactionRequest> {
        self.sent.lock().iter().map(|(_, tx)| tx.clone()).collect()
    }

    pub fn last_tx_hash(&self) -> Option<TxHash> {
        self.sent.lock().last().map(|(hash, _)| *hash)
    }

    /// Live log filters opened over the node's lifetime.
    pub fn subscription_count(&self) -> u32 {
        self.filters_opened.load(Ordering::SeqCst)
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    /// End every live log stream, as a lost connection would.
    pub fn drop_subscriptions(&self) {
        self.filters.lock().clear();
    }

    /// Append a log to history and deliver it to matching live filters.
    pub fn emit(&self, log: RawLog) {
        self.history.lock().push(log.clone());
        self.filters.lock().retain(|live| {
            if live.sender.is_closed() {
                return false;
            }
            if live.filter.matches(&log) {
                let _ = live.sender.try_send(log.clone());
            }
            true
        });
    }

    /// Encode and emit a contract event.
    pub fn emit_event(
        &self,
        abi_json: &str,
        contract: &str,
        event: &str,
        values: &[Token],
    ) -> LedgerResult<TxHash> {
        let abi = ContractAbi::from_json(abi_json)?;
        let descriptor = abi
            .event(event)
            .ok_or_else(|| LedgerError::UnknownEvent(event.to_string()))?;
        let (topics, data) = descriptor.encode_log(values)?;

        let tx_hash = self.next_hash();
        if let Some(sender) = self.event_sender.lock().clone() {
            self.senders.lock().insert(tx_hash, sender);
        }
        self.emit(RawLog {
            address: Identity::parse(contract)?,
            topics,
            data,
            block_number: Some(self.block.fetch_add(1, Ordering::SeqCst) + 1),
            tx_hash: Some(tx_hash),
            log_index: Some(0),
        });
        Ok(tx_hash)
    }

    fn next_hash(&self) -> TxHash {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        TxHash(keccak256(&nonce.to_be_bytes()))
    }

    fn record(&self, method: &str) {
        self.journal.lock().push(method.to_string());
    }
}

impl Default for MockLedgerNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerNode for MockLedgerNode {
    async fn is_listening(&self) -> LedgerResult<bool> {
        self.record("net_listening");
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.listening.load(Ordering::SeqCst))
    }

    async fn send_transaction(&self, request: TransactionRequest) -> LedgerResult<TxHash> {
        self.record("eth_sendTransaction");
        let tx_hash = self.next_hash();
        self.senders.lock().insert(tx_hash, request.from.clone());
        self.sent.lock().push((tx_hash, request));
        Ok(tx_hash)
    }

    async fn call(&self, request: CallRequest) -> LedgerResult<Vec<u8>> {
        self.record("eth_call");
        let selector: [u8; 4] = request
            .data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| LedgerError::unexpected("call data without selector"))?;
        self.call_results
            .lock()
            .get(&selector)
            .cloned()
            .ok_or_else(|| LedgerError::Rpc {
                code: 3,
                message: "execution reverted".to_string(),
            })
    }

    async fn transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> LedgerResult<Option<TransactionReceipt>> {
        self.record("eth_getTransactionReceipt");
        self.receipt_polls.fetch_add(1, Ordering::SeqCst);

        let scripted = self.receipt_script.lock().pop_front();
        let poll = scripted.unwrap_or(if self.auto_mine.load(Ordering::SeqCst) {
            ReceiptPoll::Mined
        } else {
            ReceiptPoll::NotYet
        });

        let success = match poll {
            ReceiptPoll::NotYet => return Ok(None),
            ReceiptPoll::RpcError => {
                return Err(LedgerError::NodeUnreachable {
                    reason: "connection reset".to_string(),
                })
            }
            ReceiptPoll::Mined => true,
            ReceiptPoll::Reverted => false,
        };

        let is_deployment = self
            .sent
            .lock()
            .iter()
            .any(|(hash, tx)| *hash == tx_hash && tx.to.is_none());
        let contract_address = if is_deployment {
            self.deploy_address.lock().clone()
        } else {
            None
        };

        Ok(Some(TransactionReceipt {
            tx_hash,
            block_number: self.block.fetch_add(1, Ordering::SeqCst) + 1,
            success,
            contract_address,
        }))
    }

    async fn block_number(&self) -> LedgerResult<u64> {
        self.record("eth_blockNumber");
        Ok(self.block.load(Ordering::SeqCst))
    }

    async fn transaction_sender(&self, tx_hash: TxHash) -> LedgerResult<Option<Identity>> {
        self.record("eth_getTransactionByHash");
        Ok(self.senders.lock().get(&tx_hash).cloned())
    }

    async fn subscribe_logs(&self, filter: LogFilter) -> LedgerResult<LogStream> {
        self.record("eth_newFilter");
        self.filters_opened.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::channel(64);
        self.filters.lock().push(LiveFilter { filter, sender });
        Ok(receiver)
    }

    async fn past_logs(&self, filter: LogFilter) -> LedgerResult<Vec<RawLog>> {
        self.record("eth_getLogs");
        Ok(self
            .history
            .lock()
            .iter()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect())
    }
}

/// Connector that always dials the same mock node.
pub struct MockConnector {
    node: Arc<MockLedgerNode>,
    failures: AtomicU32,
    connects: AtomicU32,
}

impl MockConnector {
    pub fn new(node: Arc<MockLedgerNode>) -> Self {
        Self {
            node,
            failures: AtomicU32::new(0),
            connects: AtomicU32::new(0),
        }
    }

    /// Fail the next `count` dials with `NodeUnreachable`.
    pub fn fail_next_connects(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

impl NodeConnector for MockConnector {
    fn connect(&self) -> LedgerResult<Arc<dyn LedgerNode>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LedgerError::NodeUnreachable {
                reason: "connection refused".to_string(),
            });
        }
        Ok(Arc::clone(&self.node) as Arc<dyn LedgerNode>)
    }
}

/// Controller endpoint double returning `{"subjectId": ...}`.
pub struct MockPeerDataSource {
    fetches: AtomicU32,
    failures: AtomicU32,
    gate: Arc<RwLock<()>>,
}

impl MockPeerDataSource {
    pub fn new() -> Self {
        Self {
            fetches: AtomicU32::new(0),
            failures: AtomicU32::new(0),
            gate: Arc::new(RwLock::new(())),
        }
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Block fetches until the returned guard is dropped.
    pub fn hold(&self) -> Option<OwnedRwLockWriteGuard<()>> {
        Arc::clone(&self.gate).try_write_owned().ok()
    }

    /// Wait until at least `count` fetches have started.
    pub async fn wait_for_fetches(&self, count: u32) {
        while self.fetch_count() < count {
            tokio::task::yield_now().await;
        }
    }
}

impl Default for MockPeerDataSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerDataSource for MockPeerDataSource {
    async fn fetch_subject_data(&self, subject: &SubjectId) -> WorkflowResult<Value> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let _open = self.gate.read().await;

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(WorkflowError::PeerFetch {
                subject: subject.clone(),
                reason: "controller responded with 503".to_string(),
            });
        }
        Ok(json!({ "subjectId": subject.as_str() }))
    }
}

/// Contract double that records writes as readable lines.
pub struct RecordingLedgerApi {
    registered: Mutex<Option<Vec<Identity>>>,
    reject_sets: AtomicBool,
    data_state: Mutex<DataState>,
    fail_writes: AtomicBool,
    writes: Mutex<Vec<String>>,
}

impl RecordingLedgerApi {
    pub fn new() -> Self {
        Self {
            registered: Mutex::new(None),
            reject_sets: AtomicBool::new(false),
            data_state: Mutex::new(DataState::NoData),
            fail_writes: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Restrict the processor registry; unrestricted by default.
    pub fn set_registered(&self, processors: &[&str]) {
        let parsed = processors
            .iter()
            .filter_map(|raw| Identity::parse(raw).ok())
            .collect();
        *self.registered.lock() = Some(parsed);
    }

    /// Make `areAllValidProcessors` fail regardless of the registry.
    pub fn reject_processor_sets(&self, reject: bool) {
        self.reject_sets.store(reject, Ordering::SeqCst);
    }

    pub fn set_data_state(&self, state: DataState) {
        *self.data_state.lock() = state;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    fn write(&self, method: &str, line: String) -> LedgerResult<TransactionReceipt> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::TransactionTimeout {
                tx_hash: TxHash::default(),
                attempts: 20,
                call: CallSite::new(method, ""),
            });
        }
        let mut writes = self.writes.lock();
        writes.push(line);
        Ok(TransactionReceipt {
            tx_hash: TxHash(keccak256(&writes.len().to_be_bytes())),
            block_number: writes.len() as u64,
            success: true,
            contract_address: None,
        })
    }

    fn is_registered(&self, processor: &Identity) -> bool {
        self.registered
            .lock()
            .as_ref()
            .map_or(true, |list| list.contains(processor))
    }
}

impl Default for RecordingLedgerApi {
    fn default() -> Self {
        Self::new()
    }
}

fn join(identities: &[Identity]) -> String {
    identities
        .iter()
        .map(Identity::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl ConsentLedgerApi for RecordingLedgerApi {
    async fn get_is_erased(&self, _subject: &SubjectId) -> LedgerResult<bool> {
        Ok(*self.data_state.lock() == DataState::Erased)
    }

    async fn get_subject_data_state(
        &self,
        _subject: &SubjectId,
        _processor: Option<&Identity>,
    ) -> LedgerResult<DataState> {
        Ok(*self.data_state.lock())
    }

    async fn get_processors(&self) -> LedgerResult<Vec<Identity>> {
        Ok(self.registered.lock().clone().unwrap_or_default())
    }

    async fn is_processor(&self, processor: &Identity) -> LedgerResult<bool> {
        Ok(self.is_registered(processor))
    }

    async fn are_all_valid_processors(&self, processors: &[Identity]) -> LedgerResult<bool> {
        if self.reject_sets.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(processors.iter().all(|p| self.is_registered(p)))
    }

    async fn set_subject_data_state(
        &self,
        subject: &SubjectId,
        processor: &Identity,
        state: DataState,
    ) -> LedgerResult<TransactionReceipt> {
        let receipt = self.write(
            "setSubjectDataState",
            format!("setSubjectDataState {subject} {processor} {state:?}"),
        )?;
        *self.data_state.lock() = state;
        Ok(receipt)
    }

    async fn set_processors(&self, processors: &[Identity]) -> LedgerResult<TransactionReceipt> {
        self.write(
            "setProcessors",
            format!("setProcessors [{}]", join(processors)),
        )
    }

    async fn record_processors_update(
        &self,
        processors: &[Identity],
    ) -> LedgerResult<TransactionReceipt> {
        self.write(
            "recordProcessorsUpdate",
            format!("recordProcessorsUpdate [{}]", join(processors)),
        )
    }

    async fn record_consent_given_to(
        &self,
        subject: &SubjectId,
        processors: &[Identity],
    ) -> LedgerResult<TransactionReceipt> {
        self.write(
            "recordConsentGivenTo",
            format!("recordConsentGivenTo {subject} [{}]", join(processors)),
        )
    }

    async fn record_access_by_controller(
        &self,
        subject: &SubjectId,
    ) -> LedgerResult<TransactionReceipt> {
        self.write(
            "recordAccessByController",
            format!("recordAccessByController {subject}"),
        )
    }

    async fn record_erasure_by_controller(
        &self,
        subject: &SubjectId,
    ) -> LedgerResult<TransactionReceipt> {
        self.write(
            "recordErasureByController",
            format!("recordErasureByController {subject}"),
        )
    }

    async fn record_erasure_by_processor(
        &self,
        subject: &SubjectId,
    ) -> LedgerResult<TransactionReceipt> {
        self.write(
            "recordErasureByProcessor",
            format!("recordErasureByProcessor {subject}"),
        )
    }

    async fn past_events(&self, _event_name: &str) -> LedgerResult<Vec<LedgerEvent>> {
        Ok(Vec::new())
    }
}
