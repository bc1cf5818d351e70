//! SQLite storage layer for SoilWatch.
//!
//! Two small tables back the parts of the system that live outside the
//! engine:
//!
//! - `users`: the recipient directory (`id`, `email`, `phone`, `role`)
//! - `settings`: key/value runtime configuration: the classification
//!   thresholds (`safe`, `warning`) and probe calibration (`calibration_dry`,
//!   `calibration_wet`)
//! - `sensor_names`: operator-assigned display names per sensor
//!
//! The engine never caches anything read from here. Thresholds and sensor
//! names are re-read for every feed update and the directory is queried once
//! per trigger.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::model::{Calibration, SensorNames, Thresholds, UserRecord};
use crate::recipients::Directory;

const SAFE_KEY: &str = "safe";
const WARNING_KEY: &str = "warning";
const CALIBRATION_DRY_KEY: &str = "calibration_dry";
const CALIBRATION_WET_KEY: &str = "calibration_wet";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:soilwatch.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT,
                phone TEXT,
                role TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sensor_names (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or merge a user record.
    ///
    /// Fields left unset in `user` keep their stored values, so a profile
    /// update that only carries a phone number does not erase the email.
    pub async fn upsert_user(&self, user: &UserRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, phone, role)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                email = COALESCE(excluded.email, users.email),
                phone = COALESCE(excluded.phone, users.phone),
                role = COALESCE(excluded.role, users.role)
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(&user.role)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a single user record.
    pub async fn get_user(&self, id: &str) -> anyhow::Result<Option<UserRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, email, phone, role FROM users WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| user_from_row(&r)))
    }

    /// Get every user record, ordered by id.
    pub async fn list_users(&self) -> anyhow::Result<Vec<UserRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, email, phone, role FROM users ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(user_from_row).collect())
    }

    /// Load the classification thresholds.
    ///
    /// Missing keys fall back to their defaults individually.
    pub async fn load_thresholds(&self) -> anyhow::Result<Thresholds> {
        let mut thresholds = Thresholds::default();
        for (key, value) in self.load_settings(&[SAFE_KEY, WARNING_KEY]).await? {
            match key.as_str() {
                SAFE_KEY => thresholds.safe = value,
                WARNING_KEY => thresholds.warning = value,
                _ => {}
            }
        }
        Ok(thresholds)
    }

    /// Store both thresholds atomically.
    pub async fn save_thresholds(&self, thresholds: &Thresholds) -> anyhow::Result<()> {
        self.save_settings(&[(SAFE_KEY, thresholds.safe), (WARNING_KEY, thresholds.warning)])
            .await
    }

    /// Load the probe calibration points, defaulting each missing one.
    pub async fn load_calibration(&self) -> anyhow::Result<Calibration> {
        let mut calibration = Calibration::default();
        for (key, value) in self
            .load_settings(&[CALIBRATION_DRY_KEY, CALIBRATION_WET_KEY])
            .await?
        {
            match key.as_str() {
                CALIBRATION_DRY_KEY => calibration.dry = value,
                CALIBRATION_WET_KEY => calibration.wet = value,
                _ => {}
            }
        }
        Ok(calibration)
    }

    /// Store both calibration points atomically.
    pub async fn save_calibration(&self, calibration: &Calibration) -> anyhow::Result<()> {
        self.save_settings(&[
            (CALIBRATION_DRY_KEY, calibration.dry),
            (CALIBRATION_WET_KEY, calibration.wet),
        ])
        .await
    }

    async fn load_settings(&self, keys: &[&str; 2]) -> anyhow::Result<Vec<(String, f64)>> {
        let rows = sqlx::query(
            r#"
            SELECT key, value FROM settings WHERE key IN (?, ?)
            "#,
        )
        .bind(keys[0])
        .bind(keys[1])
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let key: String = row.get("key");
                let value: f64 = row.get("value");
                (key, value)
            })
            .collect())
    }

    async fn save_settings(&self, entries: &[(&str, f64)]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        for (key, value) in entries {
            sqlx::query(
                r#"
                INSERT INTO settings (key, value) VALUES (?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(*key)
            .bind(*value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Load every stored sensor display name.
    pub async fn load_sensor_names(&self) -> anyhow::Result<SensorNames> {
        let rows = sqlx::query(
            r#"
            SELECT id, name FROM sensor_names
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let id: String = row.get("id");
                let name: String = row.get("name");
                (id, name)
            })
            .collect())
    }

    /// Set the display name of one sensor, replacing any previous one.
    pub async fn save_sensor_name(&self, id: &str, name: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sensor_names (id, name) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(id)
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        email: row.get("email"),
        phone: row.get("phone"),
        role: row.get("role"),
    }
}

#[async_trait]
impl Directory for Storage {
    async fn list_users(&self) -> anyhow::Result<Vec<UserRecord>> {
        Storage::list_users(self).await
    }
}
