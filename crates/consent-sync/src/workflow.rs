//! Consent/Erasure Reaction Workflow
//!
//! Turns ledger events and local actions into per-subject transitions.
//!
//! ## Execution
//!
//! 1. Claim the subject: compute the transition from its current state and
//!    mark it in flight (at most one transition per subject at a time).
//! 2. Apply the pending state.
//! 3. Run the side effects in order.
//! 4. Commit the next state. If a side effect failed, the pending state is
//!    kept and the error is returned.
//! 5. Replay the events that arrived for the subject while it was in flight.
//!
//! Subjects are only tracked once an event or action moves them out of
//! `Unknown`.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shared_types::{DataState, Identity, NodeRole, SubjectId};
use tracing::{debug, error, info, warn};

use crate::domain::{
    reduce_local, EventPayload, HandlerRegistry, LedgerEvent, LocalAction, ReactionContext,
    SideEffect, SubjectState, Transition,
};
use crate::error::{WorkflowError, WorkflowResult};
use crate::ports::{ConsentLedgerApi, PeerDataSource, SubjectService};
use crate::subscription::EventHandler;

#[derive(Debug, Clone, Default)]
struct SubjectEntry {
    state: SubjectState,
    in_flight: bool,
    /// Events delivered while a transition was in flight, in arrival order.
    deferred: Vec<LedgerEvent>,
}

enum Claim {
    /// Nothing to do from the current state.
    Idle,
    /// Queued behind the running transition.
    Deferred,
    Claimed(Transition),
}

/// Clears the in-flight mark if a transition is abandoned mid-way
/// (panic or cancelled task). The pending state is kept.
struct InFlightGuard<'a> {
    states: &'a DashMap<SubjectId, SubjectEntry>,
    subject: &'a SubjectId,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(mut entry) = self.states.get_mut(self.subject) {
            entry.in_flight = false;
            error!(
                subject = %self.subject,
                state = ?entry.state,
                deferred = entry.deferred.len(),
                "[workflow] Transition abandoned"
            );
        }
    }
}

pub struct ConsentWorkflow {
    ctx: ReactionContext,
    contract: Arc<dyn ConsentLedgerApi>,
    peer: Arc<dyn PeerDataSource>,
    subjects: Arc<dyn SubjectService>,
    registry: HandlerRegistry,
    /// Check grants against the ledger's processor list before writing.
    verify_processors: bool,
    states: DashMap<SubjectId, SubjectEntry>,
}

impl ConsentWorkflow {
    pub fn new(
        role: NodeRole,
        own_identity: Identity,
        contract: Arc<dyn ConsentLedgerApi>,
        peer: Arc<dyn PeerDataSource>,
        subjects: Arc<dyn SubjectService>,
    ) -> Self {
        Self {
            ctx: ReactionContext { own_identity, role },
            contract,
            peer,
            subjects,
            registry: HandlerRegistry::processor_defaults(),
            verify_processors: true,
            states: DashMap::new(),
        }
    }

    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_processor_verification(mut self, enabled: bool) -> Self {
        self.verify_processors = enabled;
        self
    }

    pub fn role(&self) -> NodeRole {
        self.ctx.role
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Local mirror of a subject's state.
    pub fn state_of(&self, subject: &SubjectId) -> SubjectState {
        self.states
            .get(subject)
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    /// Number of subjects with a state beyond `Unknown`.
    pub fn tracked_subjects(&self) -> usize {
        self.states.len()
    }

    /// Controller grants consent to `processors` for `subject`.
    pub async fn grant_consent(
        &self,
        subject: &SubjectId,
        processors: &[Identity],
    ) -> WorkflowResult<()> {
        if !self.ctx.role.is_controller() {
            return Err(WorkflowError::WrongRole {
                operation: "grant consent",
                role: self.ctx.role,
            });
        }

        if self.verify_processors && !self.contract.are_all_valid_processors(processors).await? {
            let mut unknown = Vec::new();
            for processor in processors {
                if !self.contract.is_processor(processor).await? {
                    unknown.push(processor.clone());
                }
            }
            // The ledger rejected the set as a whole without naming a member.
            if unknown.is_empty() {
                unknown = processors.to_vec();
            }
            return Err(WorkflowError::UnknownProcessors {
                processors: unknown,
            });
        }

        let action = LocalAction::GrantConsent {
            processors: processors.to_vec(),
        };
        match self.claim(subject, |state| reduce_local(state, &action), None)? {
            Some(Claim::Claimed(transition)) => self.execute(subject, transition).await,
            Some(Claim::Idle | Claim::Deferred) => Ok(()),
            None => Err(WorkflowError::InvalidTransition {
                subject: subject.clone(),
                from: self.state_of(subject),
                action: "grant consent to",
            }),
        }
    }

    /// Erase the subject locally and record the erasure on the ledger.
    pub async fn erase(&self, subject: &SubjectId) -> WorkflowResult<()> {
        match self.claim(subject, |state| reduce_local(state, &LocalAction::Erase), None)? {
            Some(Claim::Claimed(transition)) => self.execute(subject, transition).await,
            Some(Claim::Idle | Claim::Deferred) => {
                debug!(subject = %subject, "[workflow] Subject already erased");
                Ok(())
            }
            None => Err(WorkflowError::InvalidTransition {
                subject: subject.clone(),
                from: self.state_of(subject),
                action: "erase",
            }),
        }
    }

    /// React to a delivered ledger event.
    ///
    /// An event for a subject with a transition in flight is queued and
    /// replayed once that transition settles.
    pub async fn react(&self, event: &LedgerEvent) -> WorkflowResult<()> {
        match self.claim_event(event)? {
            Some((subject, Claim::Claimed(transition))) => {
                info!(
                    subject = %subject,
                    event = %event.event_type,
                    next = ?transition.next,
                    "[workflow] Reacting to event"
                );
                self.execute(&subject, transition).await
            }
            Some((subject, Claim::Deferred)) => {
                debug!(
                    subject = %subject,
                    event = %event.event_type,
                    "[workflow] Transition running, event queued"
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn claim_event(&self, event: &LedgerEvent) -> WorkflowResult<Option<(SubjectId, Claim)>> {
        let Some(reducer) = self.registry.get(&event.event_type) else {
            debug!(event = %event.event_type, "[workflow] No handler registered");
            return Ok(None);
        };
        let Some(payload) = EventPayload::from_event(event)? else {
            return Ok(None);
        };
        let subject = payload.subject().clone();
        let claim = self.claim(
            &subject,
            |state| Some(reducer(state, &payload, &self.ctx)),
            Some(event),
        )?;
        Ok(claim.map(|claim| (subject, claim)))
    }

    /// Compute and claim a transition under the subject's entry lock.
    ///
    /// `Ok(None)` when the reducer rejected the action. While the subject is
    /// in flight, `defer` is queued and local actions get `SubjectBusy`.
    fn claim(
        &self,
        subject: &SubjectId,
        reduce: impl FnOnce(SubjectState) -> Option<Transition>,
        defer: Option<&LedgerEvent>,
    ) -> WorkflowResult<Option<Claim>> {
        match self.states.entry(subject.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.in_flight {
                    let Some(event) = defer else {
                        return Err(WorkflowError::SubjectBusy {
                            subject: subject.clone(),
                        });
                    };
                    if !entry.deferred.contains(event) {
                        entry.deferred.push(event.clone());
                    }
                    return Ok(Some(Claim::Deferred));
                }
                Ok(Self::claim_entry(entry, reduce))
            }
            Entry::Vacant(vacant) => {
                let mut entry = SubjectEntry::default();
                let claim = Self::claim_entry(&mut entry, reduce);
                if matches!(claim, Some(Claim::Claimed(_))) {
                    vacant.insert(entry);
                }
                Ok(claim)
            }
        }
    }

    fn claim_entry(
        entry: &mut SubjectEntry,
        reduce: impl FnOnce(SubjectState) -> Option<Transition>,
    ) -> Option<Claim> {
        let transition = reduce(entry.state)?;
        if transition.is_noop(entry.state) {
            return Some(Claim::Idle);
        }
        if let Some(pending) = transition.pending {
            entry.state = pending;
        }
        entry.in_flight = true;
        Some(Claim::Claimed(transition))
    }

    /// Run a claimed transition, then drain the events queued behind it.
    async fn execute(&self, subject: &SubjectId, transition: Transition) -> WorkflowResult<()> {
        let (outcome, deferred) = self.settle(subject, transition).await;

        let mut backlog: VecDeque<LedgerEvent> = deferred.into();
        while let Some(event) = backlog.pop_front() {
            match self.claim_event(&event) {
                Ok(Some((queued_subject, Claim::Claimed(transition)))) => {
                    info!(
                        subject = %queued_subject,
                        event = %event.event_type,
                        next = ?transition.next,
                        "[workflow] Replaying queued event"
                    );
                    let (replayed, more) = self.settle(&queued_subject, transition).await;
                    if let Err(e) = replayed {
                        warn!(event = %event.event_type, error = %e, "[workflow] Queued event failed");
                    }
                    backlog.extend(more);
                }
                Ok(_) => {}
                Err(e) => warn!(event = %event.event_type, error = %e, "[workflow] Queued event rejected"),
            }
        }
        outcome
    }

    /// Run the effects and commit. Returns the events queued meanwhile.
    async fn settle(
        &self,
        subject: &SubjectId,
        transition: Transition,
    ) -> (WorkflowResult<()>, Vec<LedgerEvent>) {
        let mut guard = InFlightGuard {
            states: &self.states,
            subject,
            armed: true,
        };

        let mut outcome = Ok(());
        for effect in &transition.effects {
            if let Err(e) = self.run_effect(subject, effect).await {
                outcome = Err(e);
                break;
            }
        }

        guard.armed = false;
        let deferred = match self.states.get_mut(subject) {
            Some(mut entry) => {
                entry.in_flight = false;
                if outcome.is_ok() {
                    entry.state = transition.next;
                }
                std::mem::take(&mut entry.deferred)
            }
            None => Vec::new(),
        };

        match &outcome {
            Ok(()) => info!(subject = %subject, state = ?transition.next, "[workflow] Transition committed"),
            Err(e) => warn!(
                subject = %subject,
                state = ?self.state_of(subject),
                error = %e,
                "[workflow] Transition failed"
            ),
        }
        (outcome, deferred)
    }

    async fn run_effect(&self, subject: &SubjectId, effect: &SideEffect) -> WorkflowResult<()> {
        match effect {
            SideEffect::FetchAndStore => {
                let payload = self.peer.fetch_subject_data(subject).await?;
                self.subjects.initialize_user(subject, payload).await
            }
            SideEffect::EraseLocalCopy => self.subjects.erase_data_and_revoke_consent(subject).await,
            SideEffect::RecordConsent { processors } => {
                self.contract
                    .record_consent_given_to(subject, processors)
                    .await?;
                Ok(())
            }
            SideEffect::RecordErasure => self.record_erasure(subject).await,
        }
    }

    async fn record_erasure(&self, subject: &SubjectId) -> WorkflowResult<()> {
        let own = &self.ctx.own_identity;
        let current = self
            .contract
            .get_subject_data_state(subject, Some(own))
            .await?;
        if current == DataState::Erased {
            debug!(subject = %subject, "[workflow] Ledger already records erasure");
        } else {
            let next = current.transition_to(DataState::Erased)?;
            self.contract
                .set_subject_data_state(subject, own, next)
                .await?;
        }

        match self.ctx.role {
            NodeRole::Controller => self.contract.record_erasure_by_controller(subject).await?,
            NodeRole::Processor => self.contract.record_erasure_by_processor(subject).await?,
        };
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ConsentWorkflow {
    async fn handle(&self, event: LedgerEvent) -> WorkflowResult<()> {
        self.react(&event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemorySubjectStore, MockPeerDataSource, RecordingLedgerApi};
    use crate::domain::{CONSENT_GIVEN_EVENT, CONTROLLER_ERASURE_EVENT, PROCESSOR_ERASURE_EVENT};
    use serde_json::{json, Value};

    struct Fixture {
        workflow: ConsentWorkflow,
        ledger: Arc<RecordingLedgerApi>,
        peer: Arc<MockPeerDataSource>,
        store: Arc<InMemorySubjectStore>,
    }

    fn fixture(role: NodeRole, own: &str) -> Fixture {
        let ledger = Arc::new(RecordingLedgerApi::new());
        let peer = Arc::new(MockPeerDataSource::new());
        let store = Arc::new(InMemorySubjectStore::new());
        let workflow = ConsentWorkflow::new(
            role,
            Identity::parse(own).unwrap(),
            ledger.clone(),
            peer.clone(),
            store.clone(),
        );
        Fixture {
            workflow,
            ledger,
            peer,
            store,
        }
    }

    fn event(event_type: &str, params: Value) -> LedgerEvent {
        let Value::Object(map) = params else {
            panic!("params must be an object");
        };
        LedgerEvent::new(event_type, map)
    }

    fn consent(processors: &[&str]) -> LedgerEvent {
        event(
            CONSENT_GIVEN_EVENT,
            json!({"subjectIdHash": "abc", "newProcessorsWhiteListed": processors}),
        )
    }

    fn controller_erasure() -> LedgerEvent {
        event(CONTROLLER_ERASURE_EVENT, json!({"subjectIdHash": "abc"}))
    }

    fn abc() -> SubjectId {
        SubjectId::from_hash("abc")
    }

    #[tokio::test]
    async fn test_consent_naming_self_fetches_once() {
        let f = fixture(NodeRole::Processor, "0xp1");

        f.workflow.react(&consent(&["0xP1"])).await.unwrap();

        assert_eq!(f.peer.fetch_count(), 1);
        assert_eq!(f.workflow.state_of(&abc()), SubjectState::Consented);
        assert!(f.store.contains(&abc()));

        f.workflow.react(&consent(&["0xP1"])).await.unwrap();
        assert_eq!(f.peer.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_consent_for_other_processor_is_ignored() {
        let f = fixture(NodeRole::Processor, "0xp1");

        f.workflow.react(&consent(&["0xp2", "0xc0"])).await.unwrap();

        assert_eq!(f.peer.fetch_count(), 0);
        assert_eq!(f.workflow.state_of(&abc()), SubjectState::Unknown);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_pending_and_redelivery_retries() {
        let f = fixture(NodeRole::Processor, "0xp1");
        f.peer.fail_next(1);

        let err = f.workflow.react(&consent(&["0xp1"])).await.unwrap_err();
        assert!(matches!(err, WorkflowError::PeerFetch { .. }));
        assert_eq!(f.workflow.state_of(&abc()), SubjectState::ConsentPending);
        assert!(!f.store.contains(&abc()));

        f.workflow.react(&consent(&["0xp1"])).await.unwrap();
        assert_eq!(f.peer.fetch_count(), 2);
        assert_eq!(f.workflow.state_of(&abc()), SubjectState::Consented);
    }

    #[tokio::test]
    async fn test_erasure_event_is_idempotent() {
        let f = fixture(NodeRole::Processor, "0xp1");
        f.workflow.react(&consent(&["0xp1"])).await.unwrap();

        f.workflow.react(&controller_erasure()).await.unwrap();
        f.workflow.react(&controller_erasure()).await.unwrap();

        assert_eq!(f.workflow.state_of(&abc()), SubjectState::Erased);
        assert_eq!(f.store.erase_count(&abc()), 1);
        assert_eq!(f.peer.fetch_count(), 1);
        assert!(f.ledger.writes().is_empty());
    }

    #[tokio::test]
    async fn test_consent_after_erasure_is_ignored() {
        let f = fixture(NodeRole::Processor, "0xp1");
        f.workflow.react(&controller_erasure()).await.unwrap();

        f.workflow.react(&consent(&["0xp1"])).await.unwrap();
        assert_eq!(f.peer.fetch_count(), 0);
        assert_eq!(f.workflow.state_of(&abc()), SubjectState::Erased);
    }

    #[tokio::test]
    async fn test_processor_erasure_event_is_not_handled() {
        let f = fixture(NodeRole::Processor, "0xp1");
        f.workflow
            .react(&event(
                PROCESSOR_ERASURE_EVENT,
                json!({"subjectIdHash": "abc", "processorIdHash": "0xp2"}),
            ))
            .await
            .unwrap();
        assert_eq!(f.store.erase_count(&abc()), 0);
        assert_eq!(f.workflow.state_of(&abc()), SubjectState::Unknown);
    }

    #[tokio::test]
    async fn test_ignored_events_leave_subjects_untracked() {
        let f = fixture(NodeRole::Processor, "0xp1");
        for n in 0..5 {
            let subject = format!("other{n}");
            f.workflow
                .react(&event(
                    CONSENT_GIVEN_EVENT,
                    json!({"subjectIdHash": subject, "newProcessorsWhiteListed": ["0xp2"]}),
                ))
                .await
                .unwrap();
            f.workflow
                .react(&event(
                    PROCESSOR_ERASURE_EVENT,
                    json!({"subjectIdHash": subject, "processorIdHash": "0xp2"}),
                ))
                .await
                .unwrap();
        }
        assert_eq!(f.workflow.tracked_subjects(), 0);

        f.workflow.react(&consent(&["0xp1"])).await.unwrap();
        assert_eq!(f.workflow.tracked_subjects(), 1);
    }

    #[tokio::test]
    async fn test_controller_grants_consent() {
        let f = fixture(NodeRole::Controller, "0xc0");
        let processors = vec![Identity::parse("0xp1").unwrap()];

        f.workflow.grant_consent(&abc(), &processors).await.unwrap();

        assert_eq!(f.workflow.state_of(&abc()), SubjectState::Consented);
        assert_eq!(
            f.ledger.writes(),
            vec!["recordConsentGivenTo abc [0xp1]".to_string()]
        );
    }

    #[tokio::test]
    async fn test_grant_rejects_unknown_processors() {
        let f = fixture(NodeRole::Controller, "0xc0");
        f.ledger.set_registered(&["0xp1"]);
        let processors = vec![
            Identity::parse("0xp1").unwrap(),
            Identity::parse("0xp9").unwrap(),
        ];

        let err = f.workflow.grant_consent(&abc(), &processors).await.unwrap_err();
        match err {
            WorkflowError::UnknownProcessors { processors } => {
                assert_eq!(processors, vec![Identity::parse("0xp9").unwrap()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(f.ledger.writes().is_empty());
        assert_eq!(f.workflow.state_of(&abc()), SubjectState::Unknown);
    }

    #[tokio::test]
    async fn test_grant_rejected_as_a_set_names_every_processor() {
        let f = fixture(NodeRole::Controller, "0xc0");
        f.ledger.reject_processor_sets(true);
        let processors = vec![
            Identity::parse("0xp1").unwrap(),
            Identity::parse("0xp2").unwrap(),
        ];

        let err = f.workflow.grant_consent(&abc(), &processors).await.unwrap_err();
        match err {
            WorkflowError::UnknownProcessors { processors: unknown } => {
                assert_eq!(unknown, processors);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(f.ledger.writes().is_empty());
    }

    #[tokio::test]
    async fn test_grant_on_erased_subject_is_rejected() {
        let f = fixture(NodeRole::Controller, "0xc0");
        f.workflow.erase(&abc()).await.unwrap();

        let err = f
            .workflow
            .grant_consent(&abc(), &[Identity::parse("0xp1").unwrap()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidTransition {
                from: SubjectState::Erased,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_processor_cannot_grant() {
        let f = fixture(NodeRole::Processor, "0xp1");
        let err = f.workflow.grant_consent(&abc(), &[]).await.unwrap_err();
        assert!(matches!(err, WorkflowError::WrongRole { .. }));
    }

    #[tokio::test]
    async fn test_controller_erasure_writes_state_then_record() {
        let f = fixture(NodeRole::Controller, "0xc0");
        f.ledger.set_data_state(DataState::Consented);

        f.workflow.erase(&abc()).await.unwrap();
        f.workflow.erase(&abc()).await.unwrap();

        assert_eq!(f.workflow.state_of(&abc()), SubjectState::Erased);
        assert_eq!(f.store.erase_count(&abc()), 1);
        assert_eq!(
            f.ledger.writes(),
            vec![
                "setSubjectDataState abc 0xc0 Erased".to_string(),
                "recordErasureByController abc".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_processor_erasure_skips_state_already_erased() {
        let f = fixture(NodeRole::Processor, "0xp1");
        f.ledger.set_data_state(DataState::Erased);

        f.workflow.erase(&abc()).await.unwrap();

        assert_eq!(
            f.ledger.writes(),
            vec!["recordErasureByProcessor abc".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_ledger_write_keeps_erasure_requested() {
        let f = fixture(NodeRole::Controller, "0xc0");
        f.ledger.fail_writes(true);

        assert!(f.workflow.erase(&abc()).await.is_err());
        assert_eq!(f.workflow.state_of(&abc()), SubjectState::ErasureRequested);

        f.ledger.fail_writes(false);
        f.workflow.erase(&abc()).await.unwrap();
        assert_eq!(f.workflow.state_of(&abc()), SubjectState::Erased);
    }

    #[tokio::test]
    async fn test_in_flight_subject_is_not_claimed_twice() {
        let f = fixture(NodeRole::Processor, "0xp1");
        let workflow = Arc::new(f.workflow);
        let gate = f.peer.hold();

        let first = {
            let workflow = Arc::clone(&workflow);
            tokio::spawn(async move { workflow.react(&consent(&["0xp1"])).await })
        };
        tokio::task::yield_now().await;
        f.peer.wait_for_fetches(1).await;

        workflow.react(&consent(&["0xp1"])).await.unwrap();
        let err = workflow.erase(&abc()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::SubjectBusy { .. }));

        drop(gate);
        first.await.unwrap().unwrap();
        assert_eq!(f.peer.fetch_count(), 1);
        assert_eq!(workflow.state_of(&abc()), SubjectState::Consented);
    }

    #[tokio::test]
    async fn test_erasure_during_fetch_runs_after_consent_commits() {
        let f = fixture(NodeRole::Processor, "0xp1");
        let workflow = Arc::new(f.workflow);
        let gate = f.peer.hold();

        let first = {
            let workflow = Arc::clone(&workflow);
            tokio::spawn(async move { workflow.react(&consent(&["0xp1"])).await })
        };
        f.peer.wait_for_fetches(1).await;

        workflow.react(&controller_erasure()).await.unwrap();
        workflow.react(&controller_erasure()).await.unwrap();
        assert_eq!(workflow.state_of(&abc()), SubjectState::ConsentPending);

        drop(gate);
        first.await.unwrap().unwrap();
        assert_eq!(workflow.state_of(&abc()), SubjectState::Erased);
        assert_eq!(f.store.erase_count(&abc()), 1);
        assert!(!f.store.contains(&abc()));
    }

    /// Panics on the first store, then behaves like the in-memory store.
    struct PanickingStore {
        inner: InMemorySubjectStore,
        armed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl SubjectService for PanickingStore {
        async fn initialize_user(&self, subject: &SubjectId, payload: Value) -> WorkflowResult<()> {
            if self.armed.swap(false, std::sync::atomic::Ordering::SeqCst) {
                panic!("store crashed");
            }
            self.inner.initialize_user(subject, payload).await
        }

        async fn erase_data_and_revoke_consent(&self, subject: &SubjectId) -> WorkflowResult<()> {
            self.inner.erase_data_and_revoke_consent(subject).await
        }
    }

    #[tokio::test]
    async fn test_panicking_transition_releases_subject() {
        let store = Arc::new(PanickingStore {
            inner: InMemorySubjectStore::new(),
            armed: std::sync::atomic::AtomicBool::new(true),
        });
        let peer = Arc::new(MockPeerDataSource::new());
        let workflow = Arc::new(ConsentWorkflow::new(
            NodeRole::Processor,
            Identity::parse("0xp1").unwrap(),
            Arc::new(RecordingLedgerApi::new()),
            peer.clone(),
            store.clone(),
        ));

        let crashed = {
            let workflow = Arc::clone(&workflow);
            tokio::spawn(async move { workflow.react(&consent(&["0xp1"])).await })
        };
        assert!(crashed.await.unwrap_err().is_panic());
        assert_eq!(workflow.state_of(&abc()), SubjectState::ConsentPending);

        workflow.react(&consent(&["0xp1"])).await.unwrap();
        assert_eq!(workflow.state_of(&abc()), SubjectState::Consented);
        assert!(store.inner.contains(&abc()));
        assert_eq!(peer.fetch_count(), 2);
    }
}
