//! Optimistic toggle of a boolean relation with an aggregate counter.
//!
//! The displayed state flips immediately, the backend is asked once, and the
//! outcome either confirms the guess (server values win) or rolls it back
//! completely. While a request is in flight further toggles are ignored.

use chirp_types::{ActorId, EntityId, RelationKind, Severity};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;

use crate::error::BackendError;
use crate::gateway::Gateway;

const TAG: &str = "TOGGLE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ToggleState {
    Settled {
        value: bool,
        count: u32,
    },
    Pending {
        previous_value: bool,
        previous_count: u32,
        optimistic_value: bool,
        optimistic_count: u32,
    },
}

impl ToggleState {
    pub fn settled(value: bool, count: u32) -> Self {
        ToggleState::Settled { value, count }
    }

    /// Value to display: the optimistic guess while pending.
    pub fn value(&self) -> bool {
        match *self {
            ToggleState::Settled { value, .. } => value,
            ToggleState::Pending {
                optimistic_value, ..
            } => optimistic_value,
        }
    }

    pub fn count(&self) -> u32 {
        match *self {
            ToggleState::Settled { count, .. } => count,
            ToggleState::Pending {
                optimistic_count, ..
            } => optimistic_count,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ToggleState::Pending { .. })
    }

    /// Settled -> Pending. Returns the value to request, or `None` when a
    /// request is already in flight.
    pub fn begin(&mut self) -> Option<bool> {
        let ToggleState::Settled { value, count } = *self else {
            return None;
        };
        let optimistic_value = !value;
        let optimistic_count = if value {
            count.saturating_sub(1)
        } else {
            count.saturating_add(1)
        };
        *self = ToggleState::Pending {
            previous_value: value,
            previous_count: count,
            optimistic_value,
            optimistic_count,
        };
        Some(optimistic_value)
    }

    /// Pending -> Settled with the server's values, keeping the guess for
    /// anything the server left out.
    pub fn confirm(&mut self, server_value: Option<bool>, server_count: Option<u32>) {
        if let ToggleState::Pending {
            optimistic_value,
            optimistic_count,
            ..
        } = *self
        {
            *self = ToggleState::Settled {
                value: server_value.unwrap_or(optimistic_value),
                count: server_count.unwrap_or(optimistic_count),
            };
        }
    }

    /// Pending -> Settled with the values held before `begin`.
    pub fn rollback(&mut self) {
        if let ToggleState::Pending {
            previous_value,
            previous_count,
            ..
        } = *self
        {
            *self = ToggleState::Settled {
                value: previous_value,
                count: previous_count,
            };
        }
    }
}

/// What a call to [`ToggleController::toggle`] ended with.
#[derive(Debug, Clone, PartialEq)]
pub enum ToggleOutcome {
    Confirmed { value: bool, count: u32 },
    RolledBack { value: bool, count: u32, error: BackendError },
    /// A request was already in flight; nothing was sent.
    Ignored,
}

pub type RollbackHook = Box<dyn Fn(&BackendError) + Send + Sync>;

struct Inner {
    state: ToggleState,
    /// Bumped on every `begin`, so a refresh that overlapped a toggle is dropped.
    epoch: u64,
}

/// One relation edge (actor -> target) with optimistic updates.
pub struct ToggleController {
    gateway: Gateway,
    kind: RelationKind,
    actor: ActorId,
    target: EntityId,
    inner: Mutex<Inner>,
    tx: watch::Sender<ToggleState>,
    on_rollback: Option<RollbackHook>,
}

impl ToggleController {
    pub fn new(
        gateway: Gateway,
        kind: RelationKind,
        actor: ActorId,
        target: EntityId,
        initial: ToggleState,
    ) -> Self {
        let initial = match initial {
            settled @ ToggleState::Settled { .. } => settled,
            pending => ToggleState::settled(pending.value(), pending.count()),
        };
        let (tx, _) = watch::channel(initial);
        Self {
            gateway,
            kind,
            actor,
            target,
            inner: Mutex::new(Inner {
                state: initial,
                epoch: 0,
            }),
            tx,
            on_rollback: None,
        }
    }

    /// Called with the backend error after every rollback.
    pub fn on_rollback(mut self, hook: impl Fn(&BackendError) + Send + Sync + 'static) -> Self {
        self.on_rollback = Some(Box::new(hook));
        self
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn state(&self) -> ToggleState {
        self.inner.lock().state
    }

    pub fn subscribe(&self) -> watch::Receiver<ToggleState> {
        self.tx.subscribe()
    }

    fn publish(&self, state: ToggleState) {
        self.tx.send_replace(state);
    }

    /// Flip the relation. Issues at most one gateway call and never returns
    /// an error: failures roll the state back and are reported through the
    /// outcome, the diagnostic log and the rollback hook.
    pub async fn toggle(&self) -> ToggleOutcome {
        let desired = {
            let mut inner = self.inner.lock();
            let Some(desired) = inner.state.begin() else {
                return ToggleOutcome::Ignored;
            };
            inner.epoch += 1;
            self.publish(inner.state);
            desired
        };

        let in_flight = InFlight {
            controller: self,
            armed: true,
        };
        let response = self
            .gateway
            .set_relation_logged(self.kind, &self.actor, &self.target, desired, Severity::Warn)
            .await;
        in_flight.disarm();

        if response.success {
            let (value, count) = match response.data {
                Some(status) => (Some(status.value), status.count),
                None => (None, None),
            };
            let state = {
                let mut inner = self.inner.lock();
                inner.state.confirm(value, count);
                self.publish(inner.state);
                inner.state
            };
            return ToggleOutcome::Confirmed {
                value: state.value(),
                count: state.count(),
            };
        }

        let error = response
            .error
            .unwrap_or_else(|| BackendError::new(format!("set_{} failed", self.kind)));
        let state = {
            let mut inner = self.inner.lock();
            inner.state.rollback();
            self.publish(inner.state);
            inner.state
        };
        self.gateway.log().error(
            TAG,
            &format!("{} toggle rolled back: {}", self.kind, error.message),
            Some(json!({
                "actor": self.actor.as_str(),
                "target": self.target.to_json(),
                "restored": state.value(),
            })),
        );
        if let Some(hook) = &self.on_rollback {
            hook(&error);
        }
        ToggleOutcome::RolledBack {
            value: state.value(),
            count: state.count(),
            error,
        }
    }

    /// Re-read the relation from the server and re-seed the settled state.
    /// The count is kept, since status reads do not report one. A refresh that
    /// overlaps a toggle is discarded.
    pub async fn refresh(&self) -> Result<ToggleState, BackendError> {
        let epoch = {
            let inner = self.inner.lock();
            if inner.state.is_pending() {
                return Ok(inner.state);
            }
            inner.epoch
        };

        let response = self
            .gateway
            .relation_status(self.kind, &self.actor, &self.target)
            .await;
        let status = response.into_result()?;

        let mut inner = self.inner.lock();
        if inner.epoch != epoch || inner.state.is_pending() {
            return Ok(inner.state);
        }
        if let Some(status) = status {
            let count = status.count.unwrap_or_else(|| inner.state.count());
            inner.state = ToggleState::settled(status.value, count);
            self.publish(inner.state);
        }
        Ok(inner.state)
    }
}

/// Rolls the pending state back when a `toggle` future is dropped before the
/// backend answered. Whether the request reached the server is unknown, so the
/// last confirmed state is restored; `refresh` can re-read it.
struct InFlight<'a> {
    controller: &'a ToggleController,
    armed: bool,
}

impl InFlight<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let controller = self.controller;
        let state = {
            let mut inner = controller.inner.lock();
            inner.state.rollback();
            controller.publish(inner.state);
            inner.state
        };
        controller.gateway.log().warn(
            TAG,
            &format!("{} toggle cancelled before the backend answered", controller.kind),
            Some(json!({
                "actor": controller.actor.as_str(),
                "target": controller.target.to_json(),
                "restored": state.value(),
            })),
        );
    }
}

impl std::fmt::Debug for ToggleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToggleController")
            .field("kind", &self.kind)
            .field("actor", &self.actor)
            .field("target", &self.target)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
