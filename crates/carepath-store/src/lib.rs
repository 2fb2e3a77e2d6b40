use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, Params, Statement, params};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;

/// Outcome of a write or validation that can be rejected without being an
/// error: duplicate users, exhausted grants, bad credentials. Serialized
/// verbatim into reply payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Valid,
    Invalid,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Valid => "VALID",
            Status::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("row serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("store connection lock poisoned")]
    Poisoned,
    #[error("store worker join failed: {0}")]
    Join(String),
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS users (
        user_id   INTEGER PRIMARY KEY AUTOINCREMENT,
        username  TEXT NOT NULL UNIQUE,
        password  TEXT NOT NULL,
        usertype  TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS devices (
        device_id TEXT PRIMARY KEY NOT NULL
    );
    CREATE TABLE IF NOT EXISTS products (
        device_id TEXT NOT NULL REFERENCES devices(device_id),
        user_id   INTEGER NOT NULL REFERENCES users(user_id),
        PRIMARY KEY (device_id, user_id)
    );
    CREATE TABLE IF NOT EXISTS journey (
        journey_id INTEGER PRIMARY KEY AUTOINCREMENT,
        datetime   TEXT NOT NULL,
        rtt        TEXT NOT NULL,
        tt         TEXT,
        device_id  TEXT NOT NULL REFERENCES devices(device_id)
    );
    CREATE TABLE IF NOT EXISTS emergency (
        emergency_id INTEGER PRIMARY KEY AUTOINCREMENT,
        datetime     TEXT NOT NULL,
        et           TEXT NOT NULL,
        device_id    TEXT NOT NULL REFERENCES devices(device_id)
    );";

const JOURNEYS_FOR_USER: &str = "SELECT journey.journey_id, journey.datetime, journey.rtt, journey.tt, journey.device_id
     FROM journey JOIN products ON journey.device_id = products.device_id
     WHERE products.user_id = (SELECT user_id FROM users WHERE username = ?1)";

const EMERGENCIES_FOR_USER: &str = "SELECT emergency.emergency_id, emergency.datetime, emergency.et, emergency.device_id
     FROM emergency JOIN products ON emergency.device_id = products.device_id
     WHERE products.user_id = (SELECT user_id FROM users WHERE username = ?1)";

/// Synchronous store core. Assumes a single writer (the dispatcher); the
/// mutex exists only because rusqlite connections are not `Sync`.
struct StoreInner {
    conn: StdMutex<Connection>,
}

impl StoreInner {
    fn open(path: Option<&Path>) -> Result<Self, StoreError> {
        let conn = match path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };

        // WAL mode for better concurrent read performance
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();

        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: StdMutex::new(conn),
        })
    }

    fn device_exists(conn: &Connection, device_id: &str) -> Result<bool, StoreError> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(device_id) FROM devices WHERE device_id = ?1",
            [device_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn user_exists(conn: &Connection, username: &str) -> Result<bool, StoreError> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(username) FROM users WHERE username = ?1",
            [username],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn insert_device(conn: &Connection, device_id: &str) -> Result<(), StoreError> {
        if Self::device_exists(conn, device_id)? {
            tracing::debug!(device_id = %device_id, "device already present");
            return Ok(());
        }
        conn.execute("INSERT INTO devices (device_id) VALUES (?1)", [device_id])?;
        tracing::info!(device_id = %device_id, "stored device");
        Ok(())
    }

    fn store_device(&self, device_id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        Self::insert_device(&conn, device_id)
    }

    fn store_journey(
        &self,
        datetime: &str,
        rtt: &str,
        tt: &str,
        device_id: &str,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        if !Self::device_exists(&conn, device_id)? {
            tracing::info!(device_id = %device_id, "journey references unknown device, creating it");
            Self::insert_device(&conn, device_id)?;
        }
        conn.execute(
            "INSERT INTO journey (datetime, rtt, tt, device_id) VALUES (?1, ?2, ?3, ?4)",
            params![datetime, rtt, tt, device_id],
        )?;
        tracing::info!(device_id = %device_id, "stored journey");
        Ok(())
    }

    fn store_emergency(&self, datetime: &str, et: &str, device_id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        if !Self::device_exists(&conn, device_id)? {
            tracing::info!(device_id = %device_id, "emergency references unknown device, creating it");
            Self::insert_device(&conn, device_id)?;
        }
        conn.execute(
            "INSERT INTO emergency (datetime, et, device_id) VALUES (?1, ?2, ?3)",
            params![datetime, et, device_id],
        )?;
        tracing::info!(device_id = %device_id, "stored emergency");
        Ok(())
    }

    fn store_user(
        &self,
        username: &str,
        password: &str,
        usertype: &str,
    ) -> Result<Status, StoreError> {
        let conn = self.lock()?;
        if Self::user_exists(&conn, username)? {
            tracing::info!(username = %username, "duplicate user not stored");
            return Ok(Status::Invalid);
        }
        conn.execute(
            "INSERT INTO users (username, password, usertype) VALUES (?1, ?2, ?3)",
            params![username, password, usertype],
        )?;
        tracing::info!(username = %username, usertype = %usertype, "stored user");
        Ok(Status::Valid)
    }

    /// Create a user↔device grant. Caregivers may hold any number of grants;
    /// residents at most one. Every other usertype is rejected.
    fn store_product(&self, device_id: &str, username: &str) -> Result<Status, StoreError> {
        let conn = self.lock()?;
        let usertype: Option<String> = conn
            .query_row(
                "SELECT usertype FROM users WHERE username = ?1",
                [username],
                |row| row.get(0),
            )
            .optional()?;

        let Some(usertype) = usertype else {
            tracing::warn!(username = %username, "product grant requested for unknown user");
            return Ok(Status::Invalid);
        };

        match usertype.as_str() {
            "caregiver" => Ok(Self::insert_product(&conn, device_id, username)),
            "resident" => {
                let grants: i64 = conn.query_row(
                    "SELECT COUNT(device_id) FROM products
                         WHERE user_id = (SELECT user_id FROM users WHERE username = ?1)",
                    [username],
                    |row| row.get(0),
                )?;
                if grants == 0 {
                    Ok(Self::insert_product(&conn, device_id, username))
                } else {
                    tracing::info!(username = %username, "resident already holds a device grant");
                    Ok(Status::Invalid)
                }
            }
            other => {
                tracing::info!(username = %username, usertype = %other, "usertype cannot hold device grants");
                Ok(Status::Invalid)
            }
        }
    }

    // A failed insert (unknown device, duplicate grant) rejects the request
    // rather than faulting the worker, matching the wire contract.
    fn insert_product(conn: &Connection, device_id: &str, username: &str) -> Status {
        let inserted = conn.execute(
            "INSERT INTO products (device_id, user_id)
                 VALUES (?1, (SELECT user_id FROM users WHERE username = ?2))",
            params![device_id, username],
        );
        match inserted {
            Ok(_) => {
                tracing::info!(username = %username, device_id = %device_id, "created product grant");
                Status::Valid
            }
            Err(err) => {
                tracing::warn!(username = %username, device_id = %device_id, err = %err, "product grant insert failed");
                Status::Invalid
            }
        }
    }

    fn get_journeys(&self, username: &str, device_id: Option<&str>) -> Result<String, StoreError> {
        let conn = self.lock()?;
        Self::query_events(&conn, JOURNEYS_FOR_USER, username, device_id)
    }

    fn get_emergencies(
        &self,
        username: &str,
        device_id: Option<&str>,
    ) -> Result<String, StoreError> {
        let conn = self.lock()?;
        Self::query_events(&conn, EMERGENCIES_FOR_USER, username, device_id)
    }

    fn query_events(
        conn: &Connection,
        base_query: &str,
        username: &str,
        device_id: Option<&str>,
    ) -> Result<String, StoreError> {
        match device_id {
            Some(device_id) => {
                let query = format!("{base_query} AND products.device_id = ?2");
                let mut stmt = conn.prepare(&query)?;
                Self::rows_to_json(&mut stmt, params![username, device_id])
            }
            None => {
                let mut stmt = conn.prepare(base_query)?;
                Self::rows_to_json(&mut stmt, params![username])
            }
        }
    }

    /// Serialize every result row as a name→value JSON object; the reply
    /// payload is the array of those objects.
    fn rows_to_json<P: Params>(stmt: &mut Statement<'_>, params: P) -> Result<String, StoreError> {
        let columns: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let mut events = Vec::new();
        let mut rows = stmt.query(params)?;
        while let Some(row) = rows.next()? {
            let mut object = serde_json::Map::new();
            for (index, name) in columns.iter().enumerate() {
                object.insert(name.clone(), json_value(row.get_ref(index)?));
            }
            events.push(serde_json::Value::Object(object));
        }
        Ok(serde_json::to_string(&events)?)
    }

    fn validate_user(&self, username: &str, password: &str) -> Result<Status, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE username = ?1 AND password = ?2",
            params![username, password],
            |row| row.get(0),
        )?;
        Ok(if count > 0 {
            Status::Valid
        } else {
            Status::Invalid
        })
    }
}

fn json_value(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(n) => serde_json::Value::from(n),
        ValueRef::Real(n) => serde_json::Value::from(n),
        ValueRef::Text(text) => {
            serde_json::Value::String(String::from_utf8_lossy(text).into_owned())
        }
        ValueRef::Blob(_) => serde_json::Value::Null,
    }
}

/// Relational persistence for users, devices, journeys, emergencies, and
/// product grants.
///
/// All operations run the synchronous core on `spawn_blocking` so callers on
/// the runtime never block on database I/O. Cloning shares the underlying
/// connection.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Open the database at `path`, or an in-memory database when `None`.
    /// Creates the schema on first use.
    pub fn open(path: Option<&Path>) -> Result<Self, StoreError> {
        Ok(Self {
            inner: Arc::new(StoreInner::open(path)?),
        })
    }

    pub async fn device_exists(&self, device_id: &str) -> Result<bool, StoreError> {
        let inner = self.inner.clone();
        let device_id = device_id.to_string();
        run_blocking(move || {
            let conn = inner.lock()?;
            StoreInner::device_exists(&conn, &device_id)
        })
        .await
    }

    pub async fn user_exists(&self, username: &str) -> Result<bool, StoreError> {
        let inner = self.inner.clone();
        let username = username.to_string();
        run_blocking(move || {
            let conn = inner.lock()?;
            StoreInner::user_exists(&conn, &username)
        })
        .await
    }

    pub async fn store_device(&self, device_id: &str) -> Result<(), StoreError> {
        let inner = self.inner.clone();
        let device_id = device_id.to_string();
        run_blocking(move || inner.store_device(&device_id)).await
    }

    pub async fn store_journey(
        &self,
        datetime: &str,
        rtt: &str,
        tt: &str,
        device_id: &str,
    ) -> Result<(), StoreError> {
        let inner = self.inner.clone();
        let datetime = datetime.to_string();
        let rtt = rtt.to_string();
        let tt = tt.to_string();
        let device_id = device_id.to_string();
        run_blocking(move || inner.store_journey(&datetime, &rtt, &tt, &device_id)).await
    }

    pub async fn store_emergency(
        &self,
        datetime: &str,
        et: &str,
        device_id: &str,
    ) -> Result<(), StoreError> {
        let inner = self.inner.clone();
        let datetime = datetime.to_string();
        let et = et.to_string();
        let device_id = device_id.to_string();
        run_blocking(move || inner.store_emergency(&datetime, &et, &device_id)).await
    }

    pub async fn store_user(
        &self,
        username: &str,
        password: &str,
        usertype: &str,
    ) -> Result<Status, StoreError> {
        let inner = self.inner.clone();
        let username = username.to_string();
        let password = password.to_string();
        let usertype = usertype.to_string();
        run_blocking(move || inner.store_user(&username, &password, &usertype)).await
    }

    pub async fn store_product(
        &self,
        device_id: &str,
        username: &str,
    ) -> Result<Status, StoreError> {
        let inner = self.inner.clone();
        let device_id = device_id.to_string();
        let username = username.to_string();
        run_blocking(move || inner.store_product(&device_id, &username)).await
    }

    pub async fn get_journeys(
        &self,
        username: &str,
        device_id: Option<&str>,
    ) -> Result<String, StoreError> {
        let inner = self.inner.clone();
        let username = username.to_string();
        let device_id = device_id.map(|id| id.to_string());
        run_blocking(move || inner.get_journeys(&username, device_id.as_deref())).await
    }

    pub async fn get_emergencies(
        &self,
        username: &str,
        device_id: Option<&str>,
    ) -> Result<String, StoreError> {
        let inner = self.inner.clone();
        let username = username.to_string();
        let device_id = device_id.map(|id| id.to_string());
        run_blocking(move || inner.get_emergencies(&username, device_id.as_deref())).await
    }

    pub async fn validate_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Status, StoreError> {
        let inner = self.inner.clone();
        let username = username.to_string();
        let password = password.to_string();
        run_blocking(move || inner.validate_user(&username, &password)).await
    }
}

async fn run_blocking<T, F>(op: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|err| StoreError::Join(err.to_string()))?
}
