//! In-process store holding the client state

use parking_lot::RwLock;
use std::sync::Arc;

use crate::actions::ClientAction;
use crate::api::Dispatch;
use crate::state::ClientState;

#[derive(Default)]
pub struct ClientStore {
    state: Arc<RwLock<ClientState>>,
    history: Arc<RwLock<Vec<ClientAction>>>,
}

impl ClientStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current state
    pub fn state(&self) -> ClientState {
        self.state.read().clone()
    }

    /// Every action dispatched so far, oldest first
    pub fn history(&self) -> Vec<ClientAction> {
        self.history.read().clone()
    }

    pub fn action_types(&self) -> Vec<&'static str> {
        self.history.read().iter().map(ClientAction::action_type).collect()
    }
}

impl Dispatch for ClientStore {
    fn dispatch(&self, action: ClientAction) {
        match action.error() {
            Some(error) => tracing::warn!(
                action = action.action_type(),
                label = %error.label,
                "Dispatching failure: {}",
                error.message
            ),
            None => tracing::debug!(action = action.action_type(), "Dispatching action"),
        }

        self.state.write().reduce(&action);
        self.history.write().push(action);
    }
}

impl Clone for ClientStore {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            history: Arc::clone(&self.history),
        }
    }
}
