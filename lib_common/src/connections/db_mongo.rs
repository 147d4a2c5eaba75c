//! # MongoDB Admin Connection
//!
//! The Cube collector keeps its data in a MongoDB database. The relay never
//! reads or writes documents there; it only needs to know whether that
//! database exists and to drop it when upstream re-initializes.

use async_trait::async_trait;
use mongodb::options::{ClientOptions, Credential};
use mongodb::Client;

use crate::error::RelayError;
use crate::sinks::reset::DatabaseAdmin;

/// Login for the MongoDB server, checked against `auth_source`.
#[derive(Debug, Clone)]
pub struct MongoCredentials {
    pub user: String,
    pub password: String,
    /// Database the account is defined in.
    pub auth_source: String,
}

/// Administrative handle on a MongoDB server.
pub struct MongoAdmin {
    /// The underlying driver client (pooled, cheap to clone).
    client: Client,
}

impl MongoAdmin {
    /// Creates a client for the server at `host:port`.
    ///
    /// The driver connects lazily, so an unreachable server surfaces on the
    /// first admin call rather than here.
    ///
    /// # Arguments
    /// * `host` - MongoDB host name or address.
    /// * `port` - MongoDB port.
    /// * `credentials` - Optional login; `None` connects unauthenticated.
    pub async fn connect(host: &str, port: u16, credentials: Option<MongoCredentials>) -> Result<Self, RelayError> {
        let options = Self::options(host, port, credentials).await?;
        let client = Client::with_options(options)
            .map_err(|e| RelayError::Admin(format!("Failed to configure MongoDB client: {}", e)))?;
        Ok(Self { client })
    }

    /// Builds the driver options. Credentials are attached as a typed
    /// [`Credential`], never spliced into the connection string, so reserved
    /// characters in the password need no escaping.
    pub async fn options(
        host: &str,
        port: u16,
        credentials: Option<MongoCredentials>,
    ) -> Result<ClientOptions, RelayError> {
        let mut options = ClientOptions::parse(format!("mongodb://{}:{}", host, port))
            .await
            .map_err(|e| RelayError::Admin(format!("Invalid MongoDB address {}:{}: {}", host, port, e)))?;

        if let Some(login) = credentials {
            options.credential = Some(
                Credential::builder()
                    .username(login.user)
                    .password(login.password)
                    .source(login.auth_source)
                    .build(),
            );
        }
        Ok(options)
    }
}

#[async_trait]
impl DatabaseAdmin for MongoAdmin {
    async fn database_exists(&self, name: &str) -> Result<bool, RelayError> {
        let names = self
            .client
            .list_database_names()
            .await
            .map_err(|e| RelayError::Admin(format!("Failed to list databases: {}", e)))?;
        Ok(names.iter().any(|n| n == name))
    }

    async fn drop_database(&self, name: &str) -> Result<(), RelayError> {
        self.client
            .database(name)
            .drop()
            .await
            .map_err(|e| RelayError::Admin(format!("Failed to drop database '{}': {}", name, e)))
    }
}
