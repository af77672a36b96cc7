use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ClientId;

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClientError {
    #[error("client {0} is gone")]
    Gone(String),

    #[error("opening a window was refused: {0}")]
    OpenRefused(String),
}

/// A page controlled by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientWindow {
    pub id: ClientId,
    pub url: String,
    pub focused: bool,
}

/// Windows of the worker's origin.
#[async_trait]
pub trait ClientWindows: Send + Sync {
    async fn list(&self) -> Vec<ClientWindow>;

    async fn focus(&self, id: &ClientId) -> Result<(), ClientError>;

    async fn open(&self, url: &str) -> Result<ClientId, ClientError>;
}
