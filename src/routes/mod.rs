pub mod routes;

use crate::{auth::Authenticator, services::storage::ObjectStorage};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn ObjectStorage>,
    pub auth: Arc<dyn Authenticator>,
}
