use serde::Deserialize;
use std::fmt;

/// Location of the message log container.
#[derive(Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// Account endpoint, e.g. `https://my-account.documents.azure.com:443/`.
    #[serde(default)]
    pub endpoint: String,
    /// Base64 master key.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub container: String,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("endpoint", &self.endpoint)
            .field("key", &"[REDACTED]")
            .field("database", &self.database)
            .field("container", &self.container)
            .finish()
    }
}

impl StoreConfig {
    pub fn new(
        endpoint: impl Into<String>,
        key: impl Into<String>,
        database: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            key: key.into(),
            database: database.into(),
            container: container.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.endpoint.is_empty()
            && !self.key.is_empty()
            && !self.database.is_empty()
            && !self.container.is_empty()
    }

    /// Resource link of the container, `dbs/{database}/colls/{container}`.
    pub fn collection_link(&self) -> String {
        format!("dbs/{}/colls/{}", self.database, self.container)
    }
}
