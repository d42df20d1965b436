//! Client state and its reducer

use serde::{Deserialize, Serialize};

use crate::actions::ClientAction;
use crate::api::RegisteredClient;
use crate::error::BackendError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
    pub clients: Vec<RegisteredClient>,
    pub is_fetching: bool,
    /// Set once this device registered a new client in the current session
    pub is_new_client: bool,
    pub error: Option<BackendError>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reduce(&mut self, action: &ClientAction) {
        match action {
            ClientAction::GetAllClientsStart
            | ClientAction::RemoveClientStart
            | ClientAction::CreateClientStart => {
                self.is_fetching = true;
                self.error = None;
            }
            ClientAction::GetAllClientsSuccess(clients) => {
                self.clients = clients.clone();
                self.is_fetching = false;
                self.error = None;
            }
            ClientAction::RemoveClientSuccess(client_id) => {
                self.clients.retain(|client| client.id != *client_id);
                self.is_fetching = false;
                self.error = None;
            }
            ClientAction::CreateClientSuccess => {
                self.is_new_client = true;
                self.is_fetching = false;
                self.error = None;
            }
            ClientAction::GetAllClientsFailed(error)
            | ClientAction::RemoveClientFailed(error)
            | ClientAction::CreateClientFailed(error) => {
                self.is_fetching = false;
                self.error = Some(error.clone());
            }
        }
    }

    pub fn find(&self, client_id: &str) -> Option<&RegisteredClient> {
        self.clients.iter().find(|client| client.id == client_id)
    }
}
