//! Client action vocabulary

use crate::api::RegisteredClient;
use crate::error::BackendError;

pub mod action_type {
    pub const CLIENTS_FETCH_START: &str = "CLIENTS_FETCH_START";
    pub const CLIENTS_FETCH_SUCCESS: &str = "CLIENTS_FETCH_SUCCESS";
    pub const CLIENTS_FETCH_FAILED: &str = "CLIENTS_FETCH_FAILED";
    pub const CLIENT_REMOVE_START: &str = "CLIENT_REMOVE_START";
    pub const CLIENT_REMOVE_SUCCESS: &str = "CLIENT_REMOVE_SUCCESS";
    pub const CLIENT_REMOVE_FAILED: &str = "CLIENT_REMOVE_FAILED";
    pub const CLIENT_INIT_START: &str = "CLIENT_INIT_START";
    pub const CLIENT_INIT_SUCCESS: &str = "CLIENT_INIT_SUCCESS";
    pub const CLIENT_INIT_FAILED: &str = "CLIENT_INIT_FAILED";
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction {
    GetAllClientsStart,
    GetAllClientsSuccess(Vec<RegisteredClient>),
    GetAllClientsFailed(BackendError),
    RemoveClientStart,
    /// Id of the removed client
    RemoveClientSuccess(String),
    RemoveClientFailed(BackendError),
    CreateClientStart,
    CreateClientSuccess,
    CreateClientFailed(BackendError),
}

impl ClientAction {
    pub fn action_type(&self) -> &'static str {
        match self {
            ClientAction::GetAllClientsStart => action_type::CLIENTS_FETCH_START,
            ClientAction::GetAllClientsSuccess(_) => action_type::CLIENTS_FETCH_SUCCESS,
            ClientAction::GetAllClientsFailed(_) => action_type::CLIENTS_FETCH_FAILED,
            ClientAction::RemoveClientStart => action_type::CLIENT_REMOVE_START,
            ClientAction::RemoveClientSuccess(_) => action_type::CLIENT_REMOVE_SUCCESS,
            ClientAction::RemoveClientFailed(_) => action_type::CLIENT_REMOVE_FAILED,
            ClientAction::CreateClientStart => action_type::CLIENT_INIT_START,
            ClientAction::CreateClientSuccess => action_type::CLIENT_INIT_SUCCESS,
            ClientAction::CreateClientFailed(_) => action_type::CLIENT_INIT_FAILED,
        }
    }

    pub fn error(&self) -> Option<&BackendError> {
        match self {
            ClientAction::GetAllClientsFailed(error)
            | ClientAction::RemoveClientFailed(error)
            | ClientAction::CreateClientFailed(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error().is_some()
    }
}

impl std::fmt::Display for ClientAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.action_type())
    }
}
