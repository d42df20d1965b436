//! Collaborators of the client action creators

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actions::ClientAction;
use crate::error::ApiError;

/// A device registered for the user's account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredClient {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<ClientLocation>,
}

impl RegisteredClient {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: None,
            label: None,
            class: None,
            time: None,
            cookie: None,
            location: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientLocation {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginData {
    pub password: String,
    pub persist: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub model: String,
}

/// Receiver of client actions
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, action: ClientAction);
}

/// Backend client endpoints
#[async_trait]
pub trait ClientApi: Send + Sync {
    async fn get_clients(&self) -> Result<Vec<RegisteredClient>, ApiError>;

    async fn delete_client(&self, client_id: &str, password: &str) -> Result<(), ApiError>;
}

/// Cryptographic core that owns the local device identity
#[async_trait]
pub trait ClientCore: Send + Sync {
    async fn register_client(
        &self,
        login: LoginData,
        info: ClientInfo,
    ) -> Result<RegisteredClient, ApiError>;
}
