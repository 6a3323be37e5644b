//! Typed consent-contract operations over the gateway and confirmation tracker.

use std::sync::Arc;

use async_trait::async_trait;
use shared_types::{whitelist_with_controller, DataState, Identity, SubjectId};

use crate::confirmation::ConfirmationTracker;
use crate::domain::{LedgerEvent, Token, TransactionReceipt};
use crate::error::{LedgerError, LedgerResult};
use crate::gateway::LedgerGateway;
use crate::ports::ConsentLedgerApi;

pub struct ConsentContract {
    gateway: Arc<LedgerGateway>,
    tracker: ConfirmationTracker,
}

impl ConsentContract {
    pub fn new(gateway: Arc<LedgerGateway>, tracker: ConfirmationTracker) -> Self {
        Self { gateway, tracker }
    }

    async fn read_one(&self, method: &str, params: Vec<Token>) -> LedgerResult<Token> {
        self.gateway
            .read(method, params)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::unexpected(format!("{method} returned no value")))
    }

    async fn read_bool(&self, method: &str, params: Vec<Token>) -> LedgerResult<bool> {
        self.read_one(method, params)
            .await?
            .as_bool()
            .ok_or_else(|| LedgerError::unexpected(format!("{method} did not return a bool")))
    }
}

fn subject_token(subject: &SubjectId) -> Token {
    Token::string(subject.as_str())
}

#[async_trait]
impl ConsentLedgerApi for ConsentContract {
    async fn get_is_erased(&self, subject: &SubjectId) -> LedgerResult<bool> {
        self.read_bool("getIsErased", vec![subject_token(subject)])
            .await
    }

    async fn get_subject_data_state(
        &self,
        subject: &SubjectId,
        processor: Option<&Identity>,
    ) -> LedgerResult<DataState> {
        let processor = processor.unwrap_or(self.gateway.controller());
        let value = self
            .read_one(
                "getSubjectDataState",
                vec![subject_token(subject), Token::address(processor)?],
            )
            .await?;
        let discriminant = value
            .as_u64()
            .ok_or_else(|| LedgerError::unexpected("getSubjectDataState did not return a uint"))?;
        DataState::from_discriminant(discriminant).map_err(|e| LedgerError::unexpected(e.to_string()))
    }

    async fn get_processors(&self) -> LedgerResult<Vec<Identity>> {
        let value = self.read_one("getProcessors", vec![]).await?;
        let items = value
            .as_array()
            .ok_or_else(|| LedgerError::unexpected("getProcessors did not return an array"))?;
        items
            .iter()
            .map(|item| {
                item.as_identity()
                    .ok_or_else(|| LedgerError::unexpected("getProcessors returned a non-address"))
            })
            .collect()
    }

    async fn is_processor(&self, processor: &Identity) -> LedgerResult<bool> {
        self.read_bool("isProcessor", vec![Token::address(processor)?])
            .await
    }

    async fn are_all_valid_processors(&self, processors: &[Identity]) -> LedgerResult<bool> {
        self.read_bool("areAllValidProcessors", vec![Token::addresses(processors)?])
            .await
    }

    async fn set_subject_data_state(
        &self,
        subject: &SubjectId,
        processor: &Identity,
        state: DataState,
    ) -> LedgerResult<TransactionReceipt> {
        self.tracker
            .run_method(
                "setSubjectDataState",
                vec![
                    subject_token(subject),
                    Token::address(processor)?,
                    Token::uint(u64::from(state.discriminant())),
                ],
            )
            .await
    }

    async fn set_processors(&self, processors: &[Identity]) -> LedgerResult<TransactionReceipt> {
        let list = whitelist_with_controller(self.gateway.controller(), processors.iter().cloned());
        self.tracker
            .run_method("setProcessors", vec![Token::addresses(&list)?])
            .await
    }

    async fn record_processors_update(
        &self,
        processors: &[Identity],
    ) -> LedgerResult<TransactionReceipt> {
        self.tracker
            .run_method("recordProcessorsUpdate", vec![Token::addresses(processors)?])
            .await
    }

    async fn record_consent_given_to(
        &self,
        subject: &SubjectId,
        processors: &[Identity],
    ) -> LedgerResult<TransactionReceipt> {
        let list = whitelist_with_controller(self.gateway.controller(), processors.iter().cloned());
        self.tracker
            .run_method(
                "recordConsentGivenTo",
                vec![subject_token(subject), Token::addresses(&list)?],
            )
            .await
    }

    async fn record_access_by_controller(
        &self,
        subject: &SubjectId,
    ) -> LedgerResult<TransactionReceipt> {
        self.tracker
            .run_method("recordAccessByController", vec![subject_token(subject)])
            .await
    }

    async fn record_erasure_by_controller(
        &self,
        subject: &SubjectId,
    ) -> LedgerResult<TransactionReceipt> {
        self.tracker
            .run_method("recordErasureByController", vec![subject_token(subject)])
            .await
    }

    async fn record_erasure_by_processor(
        &self,
        subject: &SubjectId,
    ) -> LedgerResult<TransactionReceipt> {
        let own = Token::address(self.gateway.account())?;
        self.tracker
            .run_method("recordErasureByProcessor", vec![subject_token(subject), own])
            .await
    }

    async fn past_events(&self, event_name: &str) -> LedgerResult<Vec<LedgerEvent>> {
        self.gateway.past_events(event_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryConfigStore, MockLedgerNode};
    use crate::confirmation::ConfirmationConfig;
    use crate::domain::abi::{decode, ParamType};
    use crate::domain::CONSENT_GIVEN_EVENT;
    use crate::gateway::{NodeSlot, CONTRACT_CONFIG_KEY};
    use crate::ports::{ConfigStore, ContractConfig};

    const ABI: &str = include_str!("../tests/fixtures/consent_registry.abi.json");
    const CONTRACT: &str = "0x00000000000000000000000000000000000000ff";

    fn id(last: u8) -> Identity {
        let mut bytes = [0u8; 20];
        bytes[19] = last;
        Identity::from_bytes(bytes)
    }

    async fn contract(node: Arc<MockLedgerNode>, account: Identity) -> (Arc<LedgerGateway>, ConsentContract) {
        let store = Arc::new(InMemoryConfigStore::new());
        store
            .put_config(
                CONTRACT_CONFIG_KEY,
                ContractConfig {
                    address: CONTRACT.into(),
                    abi_json: ABI.into(),
                },
            )
            .await
            .unwrap();
        let gateway = Arc::new(LedgerGateway::new(
            Arc::new(NodeSlot::new(node)),
            store,
            account,
            id(0xc0),
        ));
        let tracker = ConfirmationTracker::new(Arc::clone(&gateway), ConfirmationConfig::default());
        (Arc::clone(&gateway), ConsentContract::new(gateway, tracker))
    }

    #[tokio::test]
    async fn test_consent_whitelist_starts_with_controller() {
        let node = Arc::new(MockLedgerNode::new());
        let (gateway, contract) = contract(node.clone(), id(0xc0)).await;

        contract
            .record_consent_given_to(&SubjectId::from_hash("abc"), &[id(1), id(0xc0), id(2)])
            .await
            .unwrap();

        let sent = node.sent_transactions();
        let handle = gateway.resolve_contract().await.unwrap();
        let function = handle.function("recordConsentGivenTo").unwrap();
        assert_eq!(&sent[0].data[..4], &function.selector());
        let args = decode(
            &[
                ParamType::String,
                ParamType::Array(Box::new(ParamType::Address)),
            ],
            &sent[0].data[4..],
        )
        .unwrap();
        let whitelist: Vec<Identity> = args[1]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Token::as_identity)
            .collect();
        assert_eq!(whitelist, vec![id(0xc0), id(1), id(2)]);
    }

    #[tokio::test]
    async fn test_reads_decode_typed_values() {
        let node = Arc::new(MockLedgerNode::new());
        let (gateway, contract) = contract(node.clone(), id(0xc0)).await;
        let handle = gateway.resolve_contract().await.unwrap();

        node.set_call_result(handle.function("getSubjectDataState").unwrap(), &[Token::uint(2)])
            .unwrap();
        node.set_call_result(
            handle.function("getProcessors").unwrap(),
            &[Token::addresses(&[id(0xc0), id(1)]).unwrap()],
        )
        .unwrap();
        node.set_call_result(handle.function("isProcessor").unwrap(), &[Token::Bool(false)])
            .unwrap();

        let subject = SubjectId::from_hash("abc");
        assert_eq!(
            contract.get_subject_data_state(&subject, None).await.unwrap(),
            DataState::Erased
        );
        assert_eq!(contract.get_processors().await.unwrap(), vec![id(0xc0), id(1)]);
        assert!(!contract.is_processor(&id(7)).await.unwrap());
    }

    #[tokio::test]
    async fn test_out_of_range_data_state_is_rejected() {
        let node = Arc::new(MockLedgerNode::new());
        let (gateway, contract) = contract(node.clone(), id(0xc0)).await;
        let handle = gateway.resolve_contract().await.unwrap();
        node.set_call_result(handle.function("getSubjectDataState").unwrap(), &[Token::uint(9)])
            .unwrap();

        let err = contract
            .get_subject_data_state(&SubjectId::from_hash("abc"), Some(&id(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnexpectedResponse { .. }));
    }

    #[tokio::test]
    async fn test_processor_erasure_names_own_account() {
        let node = Arc::new(MockLedgerNode::new());
        let (gateway, contract) = contract(node.clone(), id(1)).await;

        contract
            .record_erasure_by_processor(&SubjectId::from_hash("abc"))
            .await
            .unwrap();

        let sent = node.sent_transactions();
        let handle = gateway.resolve_contract().await.unwrap();
        assert_eq!(
            &sent[0].data[..4],
            &handle.function("recordErasureByProcessor").unwrap().selector()
        );
        let args = decode(&[ParamType::String, ParamType::Address], &sent[0].data[4..]).unwrap();
        assert_eq!(args[1].as_identity(), Some(id(1)));
        assert_eq!(sent[0].from, id(1));
    }

    #[tokio::test]
    async fn test_past_events_are_decoded() {
        let node = Arc::new(MockLedgerNode::new());
        let (_, contract) = contract(node.clone(), id(0xc0)).await;
        node.emit_event(
            ABI,
            CONTRACT,
            CONSENT_GIVEN_EVENT,
            &[
                Token::string("abc"),
                Token::addresses(&[id(0xc0), id(1)]).unwrap(),
            ],
        )
        .unwrap();

        let events = contract.past_events(CONSENT_GIVEN_EVENT).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].params["subjectIdHash"], serde_json::json!("abc"));
    }
}
