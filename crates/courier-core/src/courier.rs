//! Session container
//!
//! Wires the settings store, the per-user storage service and the client
//! action creators together for one application instance.

use parking_lot::RwLock;
use serde_json::json;
use std::sync::Arc;

use courier_auth::{ClientActions, ClientApi, ClientCore, ClientState, ClientStore, RegisteredClient};
use courier_storage::{
    FlagStore, ObjectStore, SettingsStore, StorageService, PERSIST_AUTH,
    PRIMARY_KEY_CURRENT_CLIENT,
};

use crate::config::Config;
use crate::error::CoreError;
use crate::Result;

pub struct Courier {
    config: Config,
    /// Device-wide flags, outlive any login
    settings: Arc<SettingsStore>,
    /// Database of the logged in user
    storage: StorageService,
    client_store: Arc<ClientStore>,
    client_actions: ClientActions,
    current_user: Arc<RwLock<Option<String>>>,
}

impl Courier {
    pub fn new(config: Config, api: Arc<dyn ClientApi>, core: Arc<dyn ClientCore>) -> Result<Self> {
        let settings = Arc::new(if config.in_memory {
            SettingsStore::open_in_memory()?
        } else {
            SettingsStore::open(config.settings_path())?
        });

        let storage = StorageService::new(config.storage_config(), settings.clone());
        let client_store = Arc::new(ClientStore::new());
        let client_actions = ClientActions::new(
            client_store.clone(),
            api,
            core,
            settings.clone(),
            config.device_model.clone(),
        );

        Ok(Self {
            config,
            settings,
            storage,
            client_store,
            client_actions,
            current_user: Arc::new(RwLock::new(None)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &StorageService {
        &self.storage
    }

    pub fn client_actions(&self) -> &ClientActions {
        &self.client_actions
    }

    pub fn client_state(&self) -> ClientState {
        self.client_store.state()
    }

    pub fn current_user(&self) -> Option<String> {
        self.current_user.read().clone()
    }

    // === Session ===

    /// Remember the "stay logged in" choice and open the user's database
    pub async fn login(&self, user_id: &str, persist: bool) -> Result<String> {
        self.settings.set_flag(PERSIST_AUTH, persist)?;

        let db_name = self.storage.init(user_id).await?;
        *self.current_user.write() = Some(user_id.to_string());

        tracing::info!(user_id = %user_id, database = %db_name, "Logged in");
        Ok(db_name)
    }

    /// Close the user's database. With `clear_data` the database is deleted as well.
    pub async fn logout(&self, reason: &str, clear_data: bool) -> Result<()> {
        let Some(user_id) = self.current_user.write().take() else {
            return Err(CoreError::NotLoggedIn);
        };

        if clear_data {
            self.storage.delete_database().await?;
        } else {
            self.storage.terminate(reason);
        }

        tracing::info!(user_id = %user_id, reason = %reason, clear_data, "Logged out");
        Ok(())
    }

    fn require_login(&self) -> Result<()> {
        if self.current_user.read().is_none() {
            return Err(CoreError::NotLoggedIn);
        }
        Ok(())
    }

    // === Clients ===

    pub async fn fetch_clients(&self) -> Result<Vec<RegisteredClient>> {
        Ok(self.client_actions.fetch_all_clients().await?)
    }

    pub async fn remove_client(&self, client_id: &str, password: &str) -> Result<()> {
        self.client_actions.remove_client(client_id, password).await?;
        Ok(())
    }

    /// Register this device and keep the new client as the local identity
    pub async fn register_client(&self, password: &str) -> Result<RegisteredClient> {
        self.require_login()?;

        let client = self.client_actions.register_client(password).await?;

        let mut record = serde_json::to_value(&client)?;
        courier_storage::record::set_path(
            &mut record,
            "meta",
            json!({"is_verified": true, "primary_key": PRIMARY_KEY_CURRENT_CLIENT}),
        );
        self.storage
            .save(ObjectStore::Clients, PRIMARY_KEY_CURRENT_CLIENT, &record)
            .await?;

        Ok(client)
    }

    /// The client record of this device, once registered
    pub async fn local_client(&self) -> Result<Option<RegisteredClient>> {
        self.require_login()?;
        Ok(self
            .storage
            .load_as(ObjectStore::Clients, PRIMARY_KEY_CURRENT_CLIENT)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use courier_auth::{ApiError, BackendLabel, ClientInfo, LoginData};

    struct FakeBackend {
        clients: Vec<RegisteredClient>,
    }

    #[async_trait]
    impl ClientApi for FakeBackend {
        async fn get_clients(&self) -> std::result::Result<Vec<RegisteredClient>, ApiError> {
            Ok(self.clients.clone())
        }

        async fn delete_client(
            &self,
            _client_id: &str,
            password: &str,
        ) -> std::result::Result<(), ApiError> {
            if password == "secret" {
                Ok(())
            } else {
                Err(ApiError::Response {
                    status: 403,
                    label: "invalid-credentials".to_string(),
                    message: "Authentication failed".to_string(),
                })
            }
        }
    }

    #[async_trait]
    impl ClientCore for FakeBackend {
        async fn register_client(
            &self,
            login: LoginData,
            info: ClientInfo,
        ) -> std::result::Result<RegisteredClient, ApiError> {
            let mut client = RegisteredClient::new(format!("client-{}", login.persist));
            client.model = Some(info.model);
            Ok(client)
        }
    }

    fn courier(config: Config) -> Courier {
        let backend = Arc::new(FakeBackend {
            clients: vec![RegisteredClient::new("a")],
        });
        Courier::new(config, backend.clone(), backend).unwrap()
    }

    #[tokio::test]
    async fn test_login_register_logout() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path().to_path_buf());
        config.device_model = "Test Device".to_string();
        let courier = courier(config);

        let db_name = courier.login("user-1", true).await.unwrap();
        assert_eq!(db_name, "courier@prod@user-1@permanent");
        assert!(courier.storage().is_open());

        let client = courier.register_client("secret").await.unwrap();
        assert_eq!(client.id, "client-true");
        assert_eq!(client.model.as_deref(), Some("Test Device"));
        assert!(courier.client_state().is_new_client);

        let local = courier.local_client().await.unwrap().unwrap();
        assert_eq!(local.id, "client-true");

        courier.logout("logout", false).await.unwrap();
        assert!(!courier.storage().is_open());
        assert!(dir.path().join("courier@prod@user-1@permanent.db").exists());
        assert!(matches!(
            courier.logout("again", false).await,
            Err(CoreError::NotLoggedIn)
        ));
    }

    #[tokio::test]
    async fn test_persist_flag_survives_restart() {
        let dir = tempfile::tempdir().unwrap();

        courier(Config::new(dir.path().to_path_buf()))
            .login("user-1", true)
            .await
            .unwrap();

        let restarted = courier(Config::new(dir.path().to_path_buf()));
        assert!(restarted.settings.persist_auth().unwrap());
    }

    #[tokio::test]
    async fn test_logout_with_clear_data_deletes_database() {
        let dir = tempfile::tempdir().unwrap();
        let courier = courier(Config::new(dir.path().to_path_buf()));

        courier.login("user-2", false).await.unwrap();
        let db_file = dir.path().join("courier@prod@user-2@temporary.db");
        assert!(db_file.exists());

        courier.logout("account deleted", true).await.unwrap();
        assert!(!db_file.exists());
    }

    #[tokio::test]
    async fn test_client_operations() {
        let courier = courier(Config::in_memory());

        assert!(matches!(
            courier.register_client("secret").await,
            Err(CoreError::NotLoggedIn)
        ));

        let clients = courier.fetch_clients().await.unwrap();
        assert_eq!(clients, vec![RegisteredClient::new("a")]);

        let err = courier.remove_client("a", "wrong").await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Backend(ref e) if e.label == BackendLabel::InvalidCredentials
        ));
        assert_eq!(courier.client_state().clients.len(), 1);

        courier.remove_client("a", "secret").await.unwrap();
        assert!(courier.client_state().clients.is_empty());
    }
}
