//! Per-subject consent/erasure state machine.
//!
//! ```text
//! Unknown ──→ ConsentPending ──→ Consented ──→ ErasureRequested ──→ Erased
//!    │                                                                ↑
//!    └──────────────────────── erasure request ───────────────────────┘
//! ```
//!
//! Reducers are pure: `(state, input, context) → Transition`. They never
//! perform I/O; the workflow executes the side effects they ask for.

use std::collections::HashMap;

use shared_types::{Identity, NodeRole};

use crate::domain::events::{EventPayload, CONSENT_GIVEN_EVENT, CONTROLLER_ERASURE_EVENT};

/// Local mirror of where a subject is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SubjectState {
    #[default]
    Unknown,
    ConsentPending,
    Consented,
    ErasureRequested,
    /// Terminal.
    Erased,
}

impl SubjectState {
    pub fn is_terminal(self) -> bool {
        self == Self::Erased
    }
}

/// I/O a transition requires, executed in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    /// Pull the subject's payload from the controller and store it locally.
    FetchAndStore,
    /// Drop the local copy and revoke the local consent record.
    EraseLocalCopy,
    /// Confirmed `recordConsentGivenTo` write.
    RecordConsent { processors: Vec<Identity> },
    /// Own data state to `Erased`, then the role's erasure record.
    RecordErasure,
}

/// Outcome of a reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Held while the side effects run, and kept if one of them fails.
    pub pending: Option<SubjectState>,
    /// Committed once every side effect succeeded.
    pub next: SubjectState,
    pub effects: Vec<SideEffect>,
}

impl Transition {
    /// No change, nothing to do.
    pub fn stay(state: SubjectState) -> Self {
        Self {
            pending: None,
            next: state,
            effects: Vec::new(),
        }
    }

    pub fn is_noop(&self, current: SubjectState) -> bool {
        self.effects.is_empty() && self.next == current
    }
}

/// Who is reacting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionContext {
    pub own_identity: Identity,
    pub role: NodeRole,
}

/// Pure event reducer.
pub type Reducer = fn(SubjectState, &EventPayload, &ReactionContext) -> Transition;

/// Consent naming this node: fetch the data unless we already hold it.
pub fn on_consent_given(
    state: SubjectState,
    payload: &EventPayload,
    ctx: &ReactionContext,
) -> Transition {
    if !payload.names(&ctx.own_identity) {
        return Transition::stay(state);
    }
    match state {
        SubjectState::Unknown | SubjectState::ConsentPending => Transition {
            pending: Some(SubjectState::ConsentPending),
            next: SubjectState::Consented,
            effects: vec![SideEffect::FetchAndStore],
        },
        _ => Transition::stay(state),
    }
}

/// Controller-issued erasure: drop the local copy, once.
pub fn on_erasure_requested(
    state: SubjectState,
    payload: &EventPayload,
    _ctx: &ReactionContext,
) -> Transition {
    if !matches!(payload, EventPayload::ControllerErasure { .. }) || state.is_terminal() {
        return Transition::stay(state);
    }
    Transition {
        pending: Some(SubjectState::ErasureRequested),
        next: SubjectState::Erased,
        effects: vec![SideEffect::EraseLocalCopy],
    }
}

/// Explicit handler registry keyed by event type.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    reducers: HashMap<String, Reducer>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reducers a processor reacts with.
    pub fn processor_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(CONSENT_GIVEN_EVENT, on_consent_given);
        registry.register(CONTROLLER_ERASURE_EVENT, on_erasure_requested);
        registry
    }

    pub fn register(&mut self, event_type: &str, reducer: Reducer) {
        self.reducers.insert(event_type.to_string(), reducer);
    }

    pub fn get(&self, event_type: &str) -> Option<Reducer> {
        self.reducers.get(event_type).copied()
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.reducers.keys().map(String::as_str)
    }
}

/// Actions initiated locally rather than by a ledger event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalAction {
    GrantConsent { processors: Vec<Identity> },
    Erase,
}

/// `None` means the action is not allowed from `state`.
pub fn reduce_local(state: SubjectState, action: &LocalAction) -> Option<Transition> {
    match action {
        LocalAction::GrantConsent { processors } => match state {
            SubjectState::Erased | SubjectState::ErasureRequested => None,
            SubjectState::Consented => Some(Transition {
                pending: None,
                next: SubjectState::Consented,
                effects: vec![SideEffect::RecordConsent {
                    processors: processors.clone(),
                }],
            }),
            SubjectState::Unknown | SubjectState::ConsentPending => Some(Transition {
                pending: Some(SubjectState::ConsentPending),
                next: SubjectState::Consented,
                effects: vec![SideEffect::RecordConsent {
                    processors: processors.clone(),
                }],
            }),
        },
        LocalAction::Erase => {
            if state.is_terminal() {
                Some(Transition::stay(state))
            } else {
                Some(Transition {
                    pending: Some(SubjectState::ErasureRequested),
                    next: SubjectState::Erased,
                    effects: vec![SideEffect::EraseLocalCopy, SideEffect::RecordErasure],
                })
            }
        }
    }
}
