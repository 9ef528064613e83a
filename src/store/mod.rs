//! Typed persistence (§3 of the specification). SQLite via `sqlx`, chosen
//! as the concrete "SQL-capable engine supporting
//! `INSERT ... ON CONFLICT ... DO UPDATE ... WHERE ... RETURNING`" the spec
//! names as an external collaborator — grounded on the upsert idiom in
//! `other_examples/.../dead_letter.rs`.

pub mod build_events;
pub mod deliveries;
pub mod instances;
pub mod models;
pub mod schema;
pub mod signing_keys;
pub mod slots;
pub mod telemetry;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

#[derive(Clone)]
pub struct Store {
    pub pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        for statement in schema::SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}
