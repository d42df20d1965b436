//! Client action creators
//!
//! Each operation dispatches a start action, performs one collaborator call
//! and dispatches either a success action or a failure carrying the
//! normalised error, which is also returned to the caller.

use std::sync::Arc;

use courier_storage::FlagStore;

use crate::actions::ClientAction;
use crate::api::{ClientApi, ClientCore, ClientInfo, Dispatch, LoginData, RegisteredClient};
use crate::error::{ApiError, BackendError};
use crate::Result;

pub struct ClientActions {
    dispatch: Arc<dyn Dispatch>,
    api: Arc<dyn ClientApi>,
    core: Arc<dyn ClientCore>,
    flags: Arc<dyn FlagStore>,
    device_model: String,
}

impl ClientActions {
    pub fn new(
        dispatch: Arc<dyn Dispatch>,
        api: Arc<dyn ClientApi>,
        core: Arc<dyn ClientCore>,
        flags: Arc<dyn FlagStore>,
        device_model: impl Into<String>,
    ) -> Self {
        Self {
            dispatch,
            api,
            core,
            flags,
            device_model: device_model.into(),
        }
    }

    pub fn device_model(&self) -> &str {
        &self.device_model
    }

    /// Fetch every client registered for the account
    pub async fn fetch_all_clients(&self) -> Result<Vec<RegisteredClient>> {
        self.dispatch.dispatch(ClientAction::GetAllClientsStart);

        match self.api.get_clients().await {
            Ok(clients) => {
                tracing::info!(count = clients.len(), "Fetched registered clients");
                self.dispatch
                    .dispatch(ClientAction::GetAllClientsSuccess(clients.clone()));
                Ok(clients)
            }
            Err(e) => Err(self.fail(e, ClientAction::GetAllClientsFailed)),
        }
    }

    /// Remove another client of the account, confirmed with the account password
    pub async fn remove_client(&self, client_id: &str, password: &str) -> Result<String> {
        self.dispatch.dispatch(ClientAction::RemoveClientStart);

        match self.api.delete_client(client_id, password).await {
            Ok(()) => {
                tracing::info!(client_id = %client_id, "Removed client");
                self.dispatch
                    .dispatch(ClientAction::RemoveClientSuccess(client_id.to_string()));
                Ok(client_id.to_string())
            }
            Err(e) => Err(self.fail(e, ClientAction::RemoveClientFailed)),
        }
    }

    /// Register this device as a new client
    pub async fn register_client(&self, password: &str) -> Result<RegisteredClient> {
        self.dispatch.dispatch(ClientAction::CreateClientStart);

        match self.create_client(password).await {
            Ok(client) => {
                tracing::info!(client_id = %client.id, "Registered new client");
                self.dispatch.dispatch(ClientAction::CreateClientSuccess);
                Ok(client)
            }
            Err(e) => Err(self.fail(e, ClientAction::CreateClientFailed)),
        }
    }

    async fn create_client(&self, password: &str) -> std::result::Result<RegisteredClient, ApiError> {
        let persist = self.flags.persist_auth()?;

        let login = LoginData {
            password: password.to_string(),
            persist,
        };
        let info = ClientInfo {
            model: self.device_model.clone(),
        };
        self.core.register_client(login, info).await
    }

    fn fail(&self, error: ApiError, action: fn(BackendError) -> ClientAction) -> BackendError {
        let error = BackendError::handle(error);
        self.dispatch.dispatch(action(error.clone()));
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::action_type::*;
    use crate::error::BackendLabel;
    use crate::store::ClientStore;
    use async_trait::async_trait;
    use courier_storage::{MemoryFlags, StorageError, PERSIST_AUTH};
    use parking_lot::Mutex;

    /// Records every collaborator call next to the dispatched actions
    #[derive(Default)]
    struct Backend {
        log: Arc<Mutex<Vec<String>>>,
        clients: Vec<RegisteredClient>,
        failure: Option<ApiError>,
        persist: Option<bool>,
        broken_flags: bool,
        last_login: Mutex<Option<(LoginData, ClientInfo)>>,
    }

    impl Backend {
        fn record(&self, entry: impl Into<String>) {
            self.log.lock().push(entry.into());
        }

        fn result<T>(&self, value: T) -> std::result::Result<T, ApiError> {
            match &self.failure {
                Some(e) => Err(e.clone()),
                None => Ok(value),
            }
        }
    }

    impl Dispatch for Backend {
        fn dispatch(&self, action: ClientAction) {
            self.record(action.action_type());
        }
    }

    impl FlagStore for Backend {
        fn get_flag(&self, key: &str) -> courier_storage::Result<Option<bool>> {
            self.record(format!("flag:{}", key));
            if self.broken_flags {
                return Err(StorageError::NotOpen);
            }
            Ok(self.persist)
        }

        fn set_flag(&self, _key: &str, _value: bool) -> courier_storage::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl ClientApi for Backend {
        async fn get_clients(&self) -> std::result::Result<Vec<RegisteredClient>, ApiError> {
            self.record("api:get_clients");
            self.result(self.clients.clone())
        }

        async fn delete_client(
            &self,
            client_id: &str,
            _password: &str,
        ) -> std::result::Result<(), ApiError> {
            self.record(format!("api:delete_client:{}", client_id));
            self.result(())
        }
    }

    #[async_trait]
    impl ClientCore for Backend {
        async fn register_client(
            &self,
            login: LoginData,
            info: ClientInfo,
        ) -> std::result::Result<RegisteredClient, ApiError> {
            self.record("core:register_client");
            *self.last_login.lock() = Some((login, info));
            self.result(RegisteredClient::new("new-client"))
        }
    }

    fn actions(backend: Backend) -> (ClientActions, Arc<Backend>) {
        let backend = Arc::new(backend);
        let actions = ClientActions::new(
            backend.clone(),
            backend.clone(),
            backend.clone(),
            backend.clone(),
            "test",
        );
        (actions, backend)
    }

    fn log(backend: &Backend) -> Vec<String> {
        backend.log.lock().clone()
    }

    fn rejected() -> ApiError {
        ApiError::Response {
            status: 403,
            label: "invalid-credentials".to_string(),
            message: "Authentication failed".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_client_happy_path() {
        let (actions, backend) = actions(Backend {
            persist: Some(true),
            ..Backend::default()
        });

        let client = actions.register_client("secret").await.unwrap();
        assert_eq!(client.id, "new-client");
        assert_eq!(
            log(&backend),
            vec![
                CLIENT_INIT_START.to_string(),
                format!("flag:{}", PERSIST_AUTH),
                "core:register_client".to_string(),
                CLIENT_INIT_SUCCESS.to_string(),
            ]
        );

        let (login, info) = backend.last_login.lock().clone().unwrap();
        assert_eq!(
            login,
            LoginData {
                password: "secret".to_string(),
                persist: true
            }
        );
        assert_eq!(info.model, "test");
    }

    #[tokio::test]
    async fn test_register_client_core_rejection() {
        let (actions, backend) = actions(Backend {
            failure: Some(rejected()),
            ..Backend::default()
        });

        let err = actions.register_client("wrong").await.unwrap_err();
        assert_eq!(err.label, BackendLabel::InvalidCredentials);
        assert_eq!(
            log(&backend),
            vec![
                CLIENT_INIT_START.to_string(),
                format!("flag:{}", PERSIST_AUTH),
                "core:register_client".to_string(),
                CLIENT_INIT_FAILED.to_string(),
            ]
        );

        // A missing persist flag counts as a temporary login
        let (login, _) = backend.last_login.lock().clone().unwrap();
        assert!(!login.persist);
    }

    #[tokio::test]
    async fn test_register_client_flag_failure_skips_core() {
        let (actions, backend) = actions(Backend {
            broken_flags: true,
            ..Backend::default()
        });

        let err = actions.register_client("secret").await.unwrap_err();
        assert_eq!(err.label, BackendLabel::Unknown);
        assert!(!log(&backend).contains(&"core:register_client".to_string()));
        assert_eq!(log(&backend).last().map(String::as_str), Some(CLIENT_INIT_FAILED));
    }

    #[tokio::test]
    async fn test_fetch_all_clients() {
        let clients = vec![RegisteredClient::new("a"), RegisteredClient::new("b")];
        let (actions, backend) = actions(Backend {
            clients: clients.clone(),
            ..Backend::default()
        });

        assert_eq!(actions.fetch_all_clients().await.unwrap(), clients);
        assert_eq!(
            log(&backend),
            vec![
                CLIENTS_FETCH_START.to_string(),
                "api:get_clients".to_string(),
                CLIENTS_FETCH_SUCCESS.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_all_clients_offline() {
        let (actions, backend) = actions(Backend {
            failure: Some(ApiError::Network("timed out".to_string())),
            ..Backend::default()
        });

        let err = actions.fetch_all_clients().await.unwrap_err();
        assert_eq!(err.label, BackendLabel::Offline);
        assert_eq!(log(&backend).last().map(String::as_str), Some(CLIENTS_FETCH_FAILED));
    }

    #[tokio::test]
    async fn test_remove_client() {
        let (actions, backend) = actions(Backend::default());

        assert_eq!(actions.remove_client("abc", "secret").await.unwrap(), "abc");
        assert_eq!(
            log(&backend),
            vec![
                CLIENT_REMOVE_START.to_string(),
                "api:delete_client:abc".to_string(),
                CLIENT_REMOVE_SUCCESS.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_actions_drive_client_store() {
        let store = Arc::new(ClientStore::new());
        let backend = Arc::new(Backend {
            clients: vec![RegisteredClient::new("a"), RegisteredClient::new("b")],
            ..Backend::default()
        });
        let flags = Arc::new(MemoryFlags::new());
        flags.set_flag(PERSIST_AUTH, true).unwrap();

        let actions = ClientActions::new(
            store.clone(),
            backend.clone(),
            backend.clone(),
            flags,
            "Desktop",
        );

        actions.fetch_all_clients().await.unwrap();
        actions.remove_client("a", "secret").await.unwrap();
        actions.register_client("secret").await.unwrap();

        let state = store.state();
        assert_eq!(state.clients, vec![RegisteredClient::new("b")]);
        assert!(state.is_new_client);
        assert!(!state.is_fetching);
        assert_eq!(store.history().len(), 6);
        assert_eq!(store.action_types()[5], CLIENT_INIT_SUCCESS);
    }

    #[tokio::test]
    async fn test_failure_action_carries_normalised_error() {
        let store = Arc::new(ClientStore::new());
        let backend = Arc::new(Backend {
            failure: Some(rejected()),
            ..Backend::default()
        });
        let actions = ClientActions::new(
            store.clone(),
            backend.clone(),
            backend.clone(),
            backend,
            "test",
        );

        let err = actions.remove_client("abc", "wrong").await.unwrap_err();
        assert_eq!(
            store.history(),
            vec![
                ClientAction::RemoveClientStart,
                ClientAction::RemoveClientFailed(err.clone()),
            ]
        );
        assert_eq!(store.state().error, Some(err));
    }
}
