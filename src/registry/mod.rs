//! Connector and Adaptor Registry
//!
//! Maps a type name to a configured, singleton plug-in instance plus the
//! authenticator capability used to validate inbound callbacks.
//! Registration happens once at startup on `&mut self`; the registry is
//! then frozen inside the engine, so lookups need no locking.

pub mod traits;

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub use traits::{
    AcceptAllAuthenticator, Adaptor, AdaptorError, AdaptorResult, Authenticator, Connector,
    ConnectorError, ConnectorResult, NoteItem,
};

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors raised by registry operations
#[derive(Debug, Error, Clone)]
pub enum RegistryError {
    /// The type name is already bound
    #[error("Type '{0}' is already registered")]
    AlreadyRegistered(String),

    /// No instance is bound to the type name
    #[error("Type '{0}' is not registered")]
    NotFound(String),
}

/// Registry of connector and adaptor singletons
#[derive(Default)]
pub struct Registry {
    connectors: HashMap<String, Arc<dyn Connector>>,
    adaptors: HashMap<String, Arc<dyn Adaptor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector under its type name.
    ///
    /// Fails if the name is already bound; registration is a startup-time
    /// activity, not a request-time one.
    pub fn register_connector(&mut self, connector: Arc<dyn Connector>) -> RegistryResult<()> {
        let name = connector.type_name().to_string();
        if self.connectors.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        log::info!("Registered connector type '{}'", name);
        self.connectors.insert(name, connector);
        Ok(())
    }

    /// Register an adaptor under its type name
    pub fn register_adaptor(&mut self, adaptor: Arc<dyn Adaptor>) -> RegistryResult<()> {
        let name = adaptor.type_name().to_string();
        if self.adaptors.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        log::info!("Registered adaptor type '{}'", name);
        self.adaptors.insert(name, adaptor);
        Ok(())
    }

    /// Look up a connector by type name
    pub fn connector(&self, type_name: &str) -> RegistryResult<Arc<dyn Connector>> {
        self.connectors
            .get(type_name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(type_name.to_string()))
    }

    /// Look up an adaptor by type name
    pub fn adaptor(&self, type_name: &str) -> RegistryResult<Arc<dyn Adaptor>> {
        self.adaptors
            .get(type_name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(type_name.to_string()))
    }

    /// Validate an inbound callback token against the connector type's
    /// authenticator. Unknown types fail authentication.
    pub fn authenticate(&self, type_name: &str, token: &str) -> bool {
        match self.connectors.get(type_name) {
            Some(connector) => connector.authenticator().authenticate(token),
            None => {
                log::warn!(
                    "Authentication attempt against unregistered connector type '{}'",
                    type_name
                );
                false
            }
        }
    }

    /// Registered connector type names
    pub fn connector_types(&self) -> Vec<String> {
        self.connectors.keys().cloned().collect()
    }

    /// Registered adaptor type names
    pub fn adaptor_types(&self) -> Vec<String> {
        self.adaptors.keys().cloned().collect()
    }

    pub fn connector_count(&self) -> usize {
        self.connectors.len()
    }

    pub fn adaptor_count(&self) -> usize {
        self.adaptors.len()
    }
}
