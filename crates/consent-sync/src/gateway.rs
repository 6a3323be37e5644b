//! Ledger Gateway
//!
//! Binds to the currently deployed contract and exposes read calls and
//! fire-and-forget write submission. The node connection is never cached:
//! every operation fetches it from the shared [`NodeSlot`].

use std::sync::Arc;

use parking_lot::RwLock;
use shared_types::{Identity, TxHash};
use tracing::{debug, info};

use crate::confirmation::{poll_receipt, ConfirmationConfig};
use crate::domain::{
    render_tokens, BlockTag, CallRequest, ContractAbi, Function, LedgerEvent, LogFilter, Token,
    TransactionRequest,
};
use crate::error::{LedgerError, LedgerResult};
use crate::ports::{ConfigStore, ContractConfig, LedgerNode};
use crate::shutdown::ShutdownSignal;

/// Configuration-store key holding the deployed contract binding.
pub const CONTRACT_CONFIG_KEY: &str = "CONTRACT_CONFIG";

/// The single process-wide node connection.
///
/// Only the readiness monitor replaces it; everyone else reads through
/// [`NodeSlot::current`] on each use.
pub struct NodeSlot {
    current: RwLock<Arc<dyn LedgerNode>>,
}

impl NodeSlot {
    pub fn new(node: Arc<dyn LedgerNode>) -> Self {
        Self {
            current: RwLock::new(node),
        }
    }

    pub fn current(&self) -> Arc<dyn LedgerNode> {
        Arc::clone(&self.current.read())
    }

    /// Swap in a new connection in one step.
    pub fn replace(&self, node: Arc<dyn LedgerNode>) {
        *self.current.write() = node;
    }
}

/// Contract bound to the connection that was current when it was resolved.
#[derive(Clone)]
pub struct ContractHandle {
    pub address: Identity,
    pub abi: Arc<ContractAbi>,
    node: Arc<dyn LedgerNode>,
}

impl ContractHandle {
    pub fn node(&self) -> &Arc<dyn LedgerNode> {
        &self.node
    }

    pub fn function(&self, method: &str) -> LedgerResult<&Function> {
        self.abi
            .function(method)
            .ok_or_else(|| LedgerError::UnknownMethod(method.to_string()))
    }

    /// Filter for one named event, or every event when `event_name` is `None`.
    pub fn log_filter(&self, event_name: Option<&str>, from_block: BlockTag) -> LedgerResult<LogFilter> {
        let topics = match event_name {
            Some(name) => {
                let event = self
                    .abi
                    .event(name)
                    .ok_or_else(|| LedgerError::UnknownEvent(name.to_string()))?;
                vec![event.topic()]
            }
            None => Vec::new(),
        };
        Ok(LogFilter {
            address: self.address.clone(),
            topics,
            from_block,
        })
    }
}

/// Gateway to the shared ledger.
pub struct LedgerGateway {
    slot: Arc<NodeSlot>,
    config_store: Arc<dyn ConfigStore>,
    /// Account this node sends transactions from.
    account: Identity,
    /// The controller organization's identity.
    controller: Identity,
    /// Used only to await deployment receipts.
    deploy_confirmation: ConfirmationConfig,
}

impl LedgerGateway {
    pub fn new(
        slot: Arc<NodeSlot>,
        config_store: Arc<dyn ConfigStore>,
        account: Identity,
        controller: Identity,
    ) -> Self {
        Self {
            slot,
            config_store,
            account,
            controller,
            deploy_confirmation: ConfirmationConfig::default(),
        }
    }

    pub fn with_deploy_confirmation(mut self, config: ConfirmationConfig) -> Self {
        self.deploy_confirmation = config;
        self
    }

    pub fn account(&self) -> &Identity {
        &self.account
    }

    pub fn controller(&self) -> &Identity {
        &self.controller
    }

    /// Current node connection.
    pub fn node(&self) -> Arc<dyn LedgerNode> {
        self.slot.current()
    }

    /// Load the deployed contract binding from the configuration store.
    pub async fn resolve_contract(&self) -> LedgerResult<ContractHandle> {
        let config = self
            .config_store
            .get_config(CONTRACT_CONFIG_KEY)
            .await?
            .ok_or_else(|| LedgerError::ContractNotDeployed {
                key: CONTRACT_CONFIG_KEY.to_string(),
            })?;

        let address = Identity::parse(&config.address).map_err(|e| LedgerError::InvalidConfig {
            reason: format!("contract address: {e}"),
        })?;
        let abi = ContractAbi::from_json(&config.abi_json).map_err(|e| {
            LedgerError::InvalidConfig {
                reason: format!("interface descriptor: {e}"),
            }
        })?;

        Ok(ContractHandle {
            address,
            abi: Arc::new(abi),
            node: self.slot.current(),
        })
    }

    /// Submit a state-changing method without waiting for confirmation.
    pub async fn submit(&self, method: &str, params: Vec<Token>) -> LedgerResult<TxHash> {
        let contract = self.resolve_contract().await?;
        let data = contract.function(method)?.encode_call(&params)?;

        let tx_hash = contract
            .node
            .send_transaction(TransactionRequest {
                from: self.account.clone(),
                to: Some(contract.address.clone()),
                data,
                gas: None,
            })
            .await?;

        debug!(
            method,
            params = %render_tokens(&params),
            tx_hash = %tx_hash,
            "[gateway] Submitted contract method"
        );
        Ok(tx_hash)
    }

    /// Read-only call; returns the decoded outputs.
    pub async fn read(&self, method: &str, params: Vec<Token>) -> LedgerResult<Vec<Token>> {
        let contract = self.resolve_contract().await?;
        let function = contract.function(method)?;
        let data = function.encode_call(&params)?;

        let output = contract
            .node
            .call(CallRequest {
                from: Some(self.account.clone()),
                to: contract.address.clone(),
                data,
            })
            .await?;

        Ok(function.decode_output(&output)?)
    }

    /// Deploy a new contract, persist its binding and seed the processor list
    /// with the controller as the sole trusted party.
    pub async fn deploy(&self, abi_json: &str, bytecode: &[u8]) -> LedgerResult<Identity> {
        let abi = ContractAbi::from_json(abi_json)?;
        let node = self.slot.current();

        let tx_hash = node
            .send_transaction(TransactionRequest {
                from: self.account.clone(),
                to: None,
                data: bytecode.to_vec(),
                gas: None,
            })
            .await?;
        info!(tx_hash = %tx_hash, "[gateway] Deployment transaction submitted");

        let receipt = poll_receipt(
            node.as_ref(),
            tx_hash,
            &self.deploy_confirmation,
            &mut ShutdownSignal::never(),
        )
        .await
        .map_err(|e| e.with_call("deploy", "[]"))?;

        let address = receipt.contract_address.ok_or_else(|| {
            LedgerError::unexpected(format!("deployment receipt {tx_hash} has no contract address"))
        })?;

        if abi.function("setProcessors").is_none() {
            return Err(LedgerError::UnknownMethod("setProcessors".to_string()));
        }

        self.config_store
            .put_config(
                CONTRACT_CONFIG_KEY,
                ContractConfig {
                    address: address.to_string(),
                    abi_json: abi_json.to_string(),
                },
            )
            .await?;
        info!(address = %address, "[gateway] Contract deployed");

        self.submit(
            "setProcessors",
            vec![Token::addresses(std::slice::from_ref(&self.controller))?],
        )
        .await?;

        Ok(address)
    }

    /// Every historical instance of a named event.
    pub async fn past_events(&self, event_name: &str) -> LedgerResult<Vec<LedgerEvent>> {
        let contract = self.resolve_contract().await?;
        let filter = contract.log_filter(Some(event_name), BlockTag::Earliest)?;
        let logs = contract.node.past_logs(filter).await?;

        logs.iter()
            .map(|log| LedgerEvent::decode(&contract.abi, log).map_err(LedgerError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryConfigStore, MockLedgerNode};
    use crate::domain::TransactionReceipt;

    const ABI: &str = include_str!("../tests/fixtures/consent_registry.abi.json");

    fn ids() -> (Identity, Identity) {
        (
            Identity::parse("0x00000000000000000000000000000000000000c0").unwrap(),
            Identity::parse("0x00000000000000000000000000000000000000a1").unwrap(),
        )
    }

    async fn deployed(node: Arc<MockLedgerNode>) -> LedgerGateway {
        let (controller, _) = ids();
        let store = Arc::new(InMemoryConfigStore::new());
        store
            .put_config(
                CONTRACT_CONFIG_KEY,
                ContractConfig {
                    address: "0x00000000000000000000000000000000000000ff".into(),
                    abi_json: ABI.into(),
                },
            )
            .await
            .unwrap();
        LedgerGateway::new(
            Arc::new(NodeSlot::new(node)),
            store,
            controller.clone(),
            controller,
        )
    }

    #[tokio::test]
    async fn test_missing_config_is_contract_not_deployed() {
        let (controller, _) = ids();
        let gateway = LedgerGateway::new(
            Arc::new(NodeSlot::new(Arc::new(MockLedgerNode::new()))),
            Arc::new(InMemoryConfigStore::new()),
            controller.clone(),
            controller,
        );

        assert!(matches!(
            gateway.resolve_contract().await,
            Err(LedgerError::ContractNotDeployed { .. })
        ));
        assert!(matches!(
            gateway.submit("setProcessors", vec![]).await,
            Err(LedgerError::ContractNotDeployed { .. })
        ));
        assert!(matches!(
            gateway.read("getProcessors", vec![]).await,
            Err(LedgerError::ContractNotDeployed { .. })
        ));
    }

    #[tokio::test]
    async fn test_submit_encodes_call_for_contract() {
        let node = Arc::new(MockLedgerNode::new());
        let gateway = deployed(Arc::clone(&node)).await;

        gateway
            .submit("recordErasureByController", vec![Token::string("abc")])
            .await
            .unwrap();

        let sent = node.sent_transactions();
        assert_eq!(sent.len(), 1);
        let contract = gateway.resolve_contract().await.unwrap();
        let selector = contract.function("recordErasureByController").unwrap().selector();
        assert_eq!(&sent[0].data[..4], &selector);
        assert_eq!(sent[0].to, Some(contract.address));
    }

    #[tokio::test]
    async fn test_unknown_method_and_bad_arguments() {
        let gateway = deployed(Arc::new(MockLedgerNode::new())).await;

        assert!(matches!(
            gateway.submit("selfDestruct", vec![]).await,
            Err(LedgerError::UnknownMethod(_))
        ));
        assert!(matches!(
            gateway.submit("recordErasureByController", vec![Token::uint(1)]).await,
            Err(LedgerError::Abi(_))
        ));
    }

    #[tokio::test]
    async fn test_read_decodes_outputs() {
        let node = Arc::new(MockLedgerNode::new());
        let gateway = deployed(Arc::clone(&node)).await;
        let contract = gateway.resolve_contract().await.unwrap();
        let function = contract.function("getIsErased").unwrap();
        node.set_call_result(function, &[Token::Bool(true)]).unwrap();

        let out = gateway
            .read("getIsErased", vec![Token::string("abc")])
            .await
            .unwrap();
        assert_eq!(out, vec![Token::Bool(true)]);
    }

    #[tokio::test]
    async fn test_handle_follows_replaced_connection() {
        let first = Arc::new(MockLedgerNode::new());
        let second = Arc::new(MockLedgerNode::new());
        let (controller, _) = ids();
        let store = Arc::new(InMemoryConfigStore::new());
        store
            .put_config(
                CONTRACT_CONFIG_KEY,
                ContractConfig {
                    address: "0x00000000000000000000000000000000000000ff".into(),
                    abi_json: ABI.into(),
                },
            )
            .await
            .unwrap();
        let slot = Arc::new(NodeSlot::new(first.clone()));
        let gateway = LedgerGateway::new(Arc::clone(&slot), store, controller.clone(), controller);

        slot.replace(second.clone());
        gateway
            .submit("recordAccessByController", vec![Token::string("abc")])
            .await
            .unwrap();

        assert!(first.sent_transactions().is_empty());
        assert_eq!(second.sent_transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_deploy_persists_binding_and_seeds_controller() {
        let node = Arc::new(MockLedgerNode::new());
        let new_address = Identity::parse("0x00000000000000000000000000000000000000dd").unwrap();
        node.set_deploy_address(new_address.clone());

        let (controller, _) = ids();
        let store = Arc::new(InMemoryConfigStore::new());
        let gateway = LedgerGateway::new(
            Arc::new(NodeSlot::new(node.clone())),
            store.clone(),
            controller.clone(),
            controller.clone(),
        );

        let address = gateway.deploy(ABI, &[0x60, 0x80]).await.unwrap();
        assert_eq!(address, new_address);

        let stored = store.get_config(CONTRACT_CONFIG_KEY).await.unwrap().unwrap();
        assert_eq!(stored.address, new_address.to_string());

        let sent = node.sent_transactions();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, None);
        let contract = gateway.resolve_contract().await.unwrap();
        let set_processors = contract.function("setProcessors").unwrap();
        assert_eq!(&sent[1].data[..4], &set_processors.selector());
        let args = crate::domain::abi::decode(
            &[crate::domain::abi::ParamType::Array(Box::new(
                crate::domain::abi::ParamType::Address,
            ))],
            &sent[1].data[4..],
        )
        .unwrap();
        assert_eq!(args[0].as_array().unwrap()[0].as_identity(), Some(controller));

        let receipt: Option<TransactionReceipt> =
            node.transaction_receipt(node.last_tx_hash().unwrap()).await.unwrap();
        assert!(receipt.is_some());
    }

    #[tokio::test]
    async fn test_invalid_stored_config() {
        let (controller, _) = ids();
        let store = Arc::new(InMemoryConfigStore::new());
        store
            .put_config(
                CONTRACT_CONFIG_KEY,
                ContractConfig {
                    address: "0xff".into(),
                    abi_json: "not json".into(),
                },
            )
            .await
            .unwrap();
        let gateway = LedgerGateway::new(
            Arc::new(NodeSlot::new(Arc::new(MockLedgerNode::new()))),
            store,
            controller.clone(),
            controller,
        );
        assert!(matches!(
            gateway.resolve_contract().await,
            Err(LedgerError::InvalidConfig { .. })
        ));
    }
}
