mod schema;
pub mod backend;
pub mod records;
pub mod rest;
pub mod sqlite;

use anyhow::{anyhow, Result};

pub use backend::PlantStore;
pub use records::{DiagnosisEvent, NewDiagnosisEvent, NewPlant, PlantRecord};
pub use schema::SCHEMA;

use crate::config::{DatabaseConfig, DatabaseType};

/// Macro to dispatch a method call to the active backend variant.
macro_rules! dispatch {
    // No arguments beyond self
    ($self:expr, $method:ident()) => {
        match &$self.inner {
            DatabaseInner::Sqlite(db) => db.$method(),
            DatabaseInner::Rest(db) => db.$method(),
        }
    };
    // With arguments
    ($self:expr, $method:ident($($arg:expr),+ $(,)?)) => {
        match &$self.inner {
            DatabaseInner::Sqlite(db) => db.$method($($arg),+),
            DatabaseInner::Rest(db) => db.$method($($arg),+),
        }
    };
}

enum DatabaseInner {
    Sqlite(sqlite::SqliteDb),
    Rest(rest::RestDb),
}

pub struct Database {
    inner: DatabaseInner,
}

impl Database {
    /// Open a database connection based on the provided configuration.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if config.backend == DatabaseType::Rest {
            let url = config
                .rest_url
                .as_deref()
                .ok_or_else(|| anyhow!("Hosted store URL not configured"))?;
            let key = config
                .rest_api_key
                .as_deref()
                .ok_or_else(|| anyhow!("Hosted store API key not configured"))?;
            tracing::info!(url, "Using hosted plant store");
            return Ok(Self {
                inner: DatabaseInner::Rest(rest::RestDb::new(url, key)),
            });
        }

        let db = sqlite::SqliteDb::open(&config.sqlite_path)?;
        tracing::info!(path = %config.sqlite_path.display(), "Using SQLite plant store");
        Ok(Self {
            inner: DatabaseInner::Sqlite(db),
        })
    }

    pub fn backend_name(&self) -> &'static str {
        match self.inner {
            DatabaseInner::Sqlite(_) => "sqlite",
            DatabaseInner::Rest(_) => "rest",
        }
    }
}

impl PlantStore for Database {
    fn initialize(&self) -> Result<()> {
        dispatch!(self, initialize())
    }

    fn insert_plant(&self, plant: &NewPlant) -> Result<PlantRecord> {
        dispatch!(self, insert_plant(plant))
    }

    fn get_plant(&self, id: &str) -> Result<Option<PlantRecord>> {
        dispatch!(self, get_plant(id))
    }

    fn list_plants(&self) -> Result<Vec<PlantRecord>> {
        dispatch!(self, list_plants())
    }

    fn update_plant_state(&self, id: &str, state: &NewPlant) -> Result<PlantRecord> {
        dispatch!(self, update_plant_state(id, state))
    }

    fn delete_plant(&self, id: &str) -> Result<bool> {
        dispatch!(self, delete_plant(id))
    }

    fn insert_diagnosis(&self, event: &NewDiagnosisEvent) -> Result<DiagnosisEvent> {
        dispatch!(self, insert_diagnosis(event))
    }

    fn list_diagnoses(&self, plant_id: &str) -> Result<Vec<DiagnosisEvent>> {
        dispatch!(self, list_diagnoses(plant_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_sqlite_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            sqlite_path: dir.path().join("plants.db"),
            ..Default::default()
        };
        let db = Database::open(&config).unwrap();
        db.initialize().unwrap();
        assert_eq!(db.backend_name(), "sqlite");
        assert!(db.list_plants().unwrap().is_empty());
    }

    #[test]
    fn test_rest_requires_credentials() {
        let config = DatabaseConfig {
            backend: DatabaseType::Rest,
            rest_url: Some("https://demo.supabase.co".to_string()),
            ..Default::default()
        };
        assert!(Database::open(&config).is_err());
    }
}
