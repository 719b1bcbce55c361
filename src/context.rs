use crate::database::Database;
use anyhow::{anyhow, Result};

/// Shared handle for the CLI commands. Connections are opened per command;
/// each invocation is an independent batch operation.
#[derive(Clone)]
pub struct AppContext {
    database_url: Option<String>,
}

impl AppContext {
    pub async fn initialize(database_url: Option<String>) -> Result<Self> {
        Ok(Self { database_url })
    }

    pub async fn database(&self) -> Result<Database> {
        let Some(database_url) = self.database_url.as_deref() else {
            return Err(anyhow!(
                "DATABASE_URL must be set to use database-backed commands."
            ));
        };
        Database::new(database_url).await
    }
}
