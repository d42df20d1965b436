//! Courier Client Registration
//!
//! Action creators for listing, removing and registering the devices
//! ("clients") of an account, the client state they drive and the
//! normalisation of backend failures.

pub mod actions;
mod api;
mod creators;
mod error;
mod state;
mod store;

pub use actions::ClientAction;
pub use api::{
    ClientApi, ClientCore, ClientInfo, ClientLocation, Dispatch, LoginData, RegisteredClient,
};
pub use creators::ClientActions;
pub use error::{ApiError, BackendError, BackendLabel};
pub use state::ClientState;
pub use store::ClientStore;

pub type Result<T> = std::result::Result<T, BackendError>;
