//! Durable capability records backed by SQLite.
//!
//! The store owns three tables: `addons` (per-addon enable state),
//! `elements` (per-tool/resource/prompt enable state) and `events`
//! (append-only invocation telemetry). It is a pure read/write layer;
//! effective-enablement rules live in [`crate::registry`].

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// A specialized Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to serialize request/response payloads.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to create the parent directory for the database file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection mutex was poisoned by a panicking thread.
    #[error("Store connection poisoned")]
    Poisoned,
}

/// The kind of capability element an addon declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Tool,
    Resource,
    Prompt,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Resource => "resource",
            Self::Prompt => "prompt",
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for ElementType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for ElementType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "tool" => Ok(Self::Tool),
            "resource" => Ok(Self::Resource),
            "prompt" => Ok(Self::Prompt),
            other => Err(FromSqlError::Other(
                format!("unknown element type: {other}").into(),
            )),
        }
    }
}

/// Outcome of a recorded invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Error,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl ToSql for EventStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for EventStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(FromSqlError::Other(
                format!("unknown event status: {other}").into(),
            )),
        }
    }
}

/// A persisted addon record.
#[derive(Debug, Clone, Serialize)]
pub struct AddonRow {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A persisted element record.
#[derive(Debug, Clone, Serialize)]
pub struct ElementRow {
    pub id: i64,
    pub addon_name: String,
    pub element_name: String,
    pub element_type: ElementType,
    pub enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A persisted invocation event.
#[derive(Debug, Clone, Serialize)]
pub struct EventRow {
    pub id: i64,
    pub event_type: String,
    pub element_name: String,
    pub element_type: ElementType,
    pub request_data: Option<String>,
    pub response_data: Option<String>,
    pub status: EventStatus,
    pub error_message: Option<String>,
    pub execution_time_ms: i64,
    pub addon_name: String,
    pub created_at: String,
}

/// A new invocation event, before it is assigned an id and timestamp.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub element_name: String,
    pub element_type: ElementType,
    pub request_data: Option<serde_json::Value>,
    pub response_data: Option<serde_json::Value>,
    pub status: EventStatus,
    pub error_message: Option<String>,
    pub execution_time_ms: i64,
    pub addon_name: String,
}

impl NewEvent {
    /// Build a success event for a completed invocation.
    pub fn success(
        event_type: &str,
        element_name: &str,
        element_type: ElementType,
        addon_name: &str,
        request: serde_json::Value,
        response: serde_json::Value,
        execution_time_ms: i64,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            element_name: element_name.to_string(),
            element_type,
            request_data: Some(request),
            response_data: Some(response),
            status: EventStatus::Success,
            error_message: None,
            execution_time_ms,
            addon_name: addon_name.to_string(),
        }
    }

    /// Build an error event for a failed invocation.
    pub fn failure(
        event_type: &str,
        element_name: &str,
        element_type: ElementType,
        addon_name: &str,
        request: serde_json::Value,
        error_message: impl Into<String>,
        execution_time_ms: i64,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            element_name: element_name.to_string(),
            element_type,
            request_data: Some(request),
            response_data: None,
            status: EventStatus::Error,
            error_message: Some(error_message.into()),
            execution_time_ms,
            addon_name: addon_name.to_string(),
        }
    }
}

/// Filters for reading back invocation events.
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub limit: usize,
    pub event_type: Option<String>,
    pub addon_name: Option<String>,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            event_type: None,
            addon_name: None,
        }
    }
}

/// Aggregate invocation statistics over a trailing window.
#[derive(Debug, Clone, Serialize)]
pub struct EventStats {
    pub total: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub avg_execution_time_ms: f64,
}

/// SQLite-backed store for addons, elements, and events.
///
/// The connection sits behind a mutex; every operation is a short,
/// non-blocking query, so callers on the async runtime lock it directly.
pub struct CapabilityStore {
    conn: Mutex<Connection>,
}

impl CapabilityStore {
    /// Open (or create) the store at the given path.
    ///
    /// The special path `:memory:` opens a private in-memory database.
    pub fn open(path: &str) -> StoreResult<Self> {
        if path == ":memory:" {
            return Self::open_in_memory();
        }
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        info!("Capability store opened at {}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory store, mainly for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS addons (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS elements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                addon_name TEXT NOT NULL,
                element_name TEXT NOT NULL,
                element_type TEXT NOT NULL CHECK (element_type IN ('tool', 'resource', 'prompt')),
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (addon_name, element_name, element_type)
            );
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type TEXT NOT NULL,
                element_name TEXT NOT NULL,
                element_type TEXT NOT NULL,
                request_data TEXT,
                response_data TEXT,
                status TEXT NOT NULL DEFAULT 'success',
                error_message TEXT,
                execution_time_ms INTEGER NOT NULL DEFAULT 0,
                addon_name TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );",
        )?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // ------------------------------------------------------------------
    // Addons
    // ------------------------------------------------------------------

    /// Insert an addon row, or refresh `updated_at` if it already exists.
    ///
    /// The `enabled` flag is never touched by a sync, so administrator
    /// intent survives restarts.
    pub fn upsert_addon(&self, name: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO addons (name) VALUES (?1)
             ON CONFLICT(name) DO UPDATE SET updated_at = CURRENT_TIMESTAMP",
            params![name],
        )?;
        Ok(())
    }

    /// True iff an addon row exists with that name and is enabled.
    pub fn addon_enabled(&self, name: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        let enabled = conn
            .query_row(
                "SELECT enabled FROM addons WHERE name = ?1",
                params![name],
                |row| row.get::<_, bool>(0),
            )
            .optional()?;
        Ok(enabled.unwrap_or(false))
    }

    /// Flip an addon's enabled flag. Returns the affected-row count;
    /// an unknown name yields 0, not an error.
    pub fn toggle_addon(&self, name: &str) -> StoreResult<usize> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE addons SET enabled = NOT enabled, updated_at = CURRENT_TIMESTAMP
             WHERE name = ?1",
            params![name],
        )?;
        Ok(affected)
    }

    /// List all addon rows.
    pub fn list_addons(&self) -> StoreResult<Vec<AddonRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, enabled, created_at, updated_at FROM addons ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AddonRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    enabled: row.get(2)?,
                    created_at: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Elements
    // ------------------------------------------------------------------

    /// Insert an element row, or refresh `updated_at` if the
    /// (addon, element, type) triple already exists. `enabled` is
    /// preserved across syncs.
    pub fn upsert_element(
        &self,
        addon_name: &str,
        element_name: &str,
        element_type: ElementType,
    ) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO elements (addon_name, element_name, element_type)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(addon_name, element_name, element_type)
             DO UPDATE SET updated_at = CURRENT_TIMESTAMP",
            params![addon_name, element_name, element_type],
        )?;
        Ok(())
    }

    /// True iff both the addon and the element are enabled.
    ///
    /// This is the load-bearing AND: disabling the parent addon silently
    /// disables every element under it without touching element rows.
    pub fn element_enabled(
        &self,
        addon_name: &str,
        element_name: &str,
        element_type: ElementType,
    ) -> StoreResult<bool> {
        let conn = self.lock()?;
        let enabled = conn
            .query_row(
                "SELECT a.enabled AND e.enabled
                 FROM addons a
                 JOIN elements e ON e.addon_name = a.name
                 WHERE a.name = ?1 AND e.element_name = ?2 AND e.element_type = ?3",
                params![addon_name, element_name, element_type],
                |row| row.get::<_, bool>(0),
            )
            .optional()?;
        Ok(enabled.unwrap_or(false))
    }

    /// Flip an element's enabled flag by row id. Unknown id yields 0.
    pub fn toggle_element(&self, id: i64) -> StoreResult<usize> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE elements SET enabled = NOT enabled, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1",
            params![id],
        )?;
        Ok(affected)
    }

    /// Look up an element's row id by its unique triple.
    pub fn find_element_id(
        &self,
        addon_name: &str,
        element_name: &str,
        element_type: ElementType,
    ) -> StoreResult<Option<i64>> {
        let conn = self.lock()?;
        let id = conn
            .query_row(
                "SELECT id FROM elements
                 WHERE addon_name = ?1 AND element_name = ?2 AND element_type = ?3",
                params![addon_name, element_name, element_type],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// List all element rows.
    pub fn list_elements(&self) -> StoreResult<Vec<ElementRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, addon_name, element_name, element_type, enabled, created_at, updated_at
             FROM elements ORDER BY addon_name, element_type, element_name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ElementRow {
                    id: row.get(0)?,
                    addon_name: row.get(1)?,
                    element_name: row.get(2)?,
                    element_type: row.get(3)?,
                    enabled: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Append one invocation event. Events are never mutated or deleted.
    pub fn insert_event(&self, event: &NewEvent) -> StoreResult<()> {
        let request_data = event
            .request_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let response_data = event
            .response_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO events (event_type, element_name, element_type, request_data,
                                 response_data, status, error_message, execution_time_ms, addon_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.event_type,
                event.element_name,
                event.element_type,
                request_data,
                response_data,
                event.status,
                event.error_message,
                event.execution_time_ms,
                event.addon_name,
            ],
        )?;
        Ok(())
    }

    /// Read events newest-first with optional type/addon filters.
    pub fn query_events(&self, query: &EventQuery) -> StoreResult<Vec<EventRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, event_type, element_name, element_type, request_data, response_data,
                    status, error_message, execution_time_ms, addon_name, created_at
             FROM events
             WHERE (?1 IS NULL OR event_type = ?1)
               AND (?2 IS NULL OR addon_name = ?2)
             ORDER BY created_at DESC, id DESC
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                params![query.event_type, query.addon_name, query.limit as i64],
                |row| {
                    Ok(EventRow {
                        id: row.get(0)?,
                        event_type: row.get(1)?,
                        element_name: row.get(2)?,
                        element_type: row.get(3)?,
                        request_data: row.get(4)?,
                        response_data: row.get(5)?,
                        status: row.get(6)?,
                        error_message: row.get(7)?,
                        execution_time_ms: row.get(8)?,
                        addon_name: row.get(9)?,
                        created_at: row.get(10)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Aggregate statistics over events in the trailing window.
    pub fn event_stats(&self, window_hours: i64) -> StoreResult<EventStats> {
        let conn = self.lock()?;
        let window = format!("-{window_hours} hours");
        let stats = conn.query_row(
            "SELECT COUNT(*),
                    COUNT(CASE WHEN status = 'success' THEN 1 END),
                    COUNT(CASE WHEN status = 'error' THEN 1 END),
                    COALESCE(AVG(execution_time_ms), 0.0)
             FROM events
             WHERE created_at >= datetime('now', ?1)",
            params![window],
            |row| {
                Ok(EventStats {
                    total: row.get(0)?,
                    success_count: row.get(1)?,
                    error_count: row.get(2)?,
                    avg_execution_time_ms: row.get(3)?,
                })
            },
        )?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> CapabilityStore {
        CapabilityStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_addon_defaults_enabled() {
        let store = store();
        store.upsert_addon("alpha").unwrap();
        assert!(store.addon_enabled("alpha").unwrap());
    }

    #[test]
    fn test_missing_addon_is_disabled() {
        let store = store();
        assert!(!store.addon_enabled("ghost").unwrap());
    }

    #[test]
    fn test_sync_preserves_enabled_flag() {
        let store = store();
        store.upsert_addon("alpha").unwrap();
        store.upsert_element("alpha", "echo", ElementType::Tool).unwrap();

        let id = store
            .find_element_id("alpha", "echo", ElementType::Tool)
            .unwrap()
            .unwrap();
        store.toggle_element(id).unwrap();
        assert!(!store.element_enabled("alpha", "echo", ElementType::Tool).unwrap());

        // A second sync must not resurrect the element.
        store.upsert_element("alpha", "echo", ElementType::Tool).unwrap();
        assert!(!store.element_enabled("alpha", "echo", ElementType::Tool).unwrap());

        // And it must not create a duplicate row for the triple.
        let elements = store.list_elements().unwrap();
        assert_eq!(elements.len(), 1);
    }

    #[test]
    fn test_same_name_different_type_is_distinct() {
        let store = store();
        store.upsert_addon("alpha").unwrap();
        store.upsert_element("alpha", "echo", ElementType::Tool).unwrap();
        store.upsert_element("alpha", "echo", ElementType::Prompt).unwrap();
        assert_eq!(store.list_elements().unwrap().len(), 2);
    }

    #[test]
    fn test_addon_disable_overrides_element_flag() {
        let store = store();
        store.upsert_addon("alpha").unwrap();
        store.upsert_element("alpha", "echo", ElementType::Tool).unwrap();
        assert!(store.element_enabled("alpha", "echo", ElementType::Tool).unwrap());

        store.toggle_addon("alpha").unwrap();
        assert!(!store.element_enabled("alpha", "echo", ElementType::Tool).unwrap());

        // Element row itself is untouched.
        let elements = store.list_elements().unwrap();
        assert!(elements[0].enabled);
    }

    #[test]
    fn test_toggle_miss_is_noop() {
        let store = store();
        assert_eq!(store.toggle_addon("ghost").unwrap(), 0);
        assert_eq!(store.toggle_element(9999).unwrap(), 0);
    }

    #[test]
    fn test_toggle_flips_back() {
        let store = store();
        store.upsert_addon("alpha").unwrap();
        assert_eq!(store.toggle_addon("alpha").unwrap(), 1);
        assert!(!store.addon_enabled("alpha").unwrap());
        assert_eq!(store.toggle_addon("alpha").unwrap(), 1);
        assert!(store.addon_enabled("alpha").unwrap());
    }

    #[test]
    fn test_event_insert_and_query() {
        let store = store();
        store
            .insert_event(&NewEvent::success(
                "tool_call",
                "echo",
                ElementType::Tool,
                "alpha",
                json!({"a": 1}),
                json!({"a": 1}),
                3,
            ))
            .unwrap();
        store
            .insert_event(&NewEvent::failure(
                "tool_call",
                "boom",
                ElementType::Tool,
                "beta",
                json!({}),
                "it broke",
                7,
            ))
            .unwrap();

        let all = store.query_events(&EventQuery::default()).unwrap();
        assert_eq!(all.len(), 2);
        // Newest first.
        assert_eq!(all[0].element_name, "boom");
        assert_eq!(all[0].status, EventStatus::Error);
        assert!(all[0].response_data.is_none());
        assert_eq!(all[0].error_message.as_deref(), Some("it broke"));
        assert_eq!(all[1].status, EventStatus::Success);
        assert!(all[1].response_data.is_some());

        let filtered = store
            .query_events(&EventQuery {
                addon_name: Some("alpha".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].addon_name, "alpha");
    }

    #[test]
    fn test_event_query_limit() {
        let store = store();
        for i in 0..5 {
            store
                .insert_event(&NewEvent::success(
                    "tool_call",
                    "echo",
                    ElementType::Tool,
                    "alpha",
                    json!({"i": i}),
                    json!(null),
                    i,
                ))
                .unwrap();
        }
        let rows = store
            .query_events(&EventQuery {
                limit: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_event_stats() {
        let store = store();
        store
            .insert_event(&NewEvent::success(
                "tool_call",
                "echo",
                ElementType::Tool,
                "alpha",
                json!({}),
                json!(null),
                10,
            ))
            .unwrap();
        store
            .insert_event(&NewEvent::failure(
                "tool_call",
                "boom",
                ElementType::Tool,
                "alpha",
                json!({}),
                "fail",
                30,
            ))
            .unwrap();

        let stats = store.event_stats(24).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.error_count, 1);
        assert!((stats.avg_execution_time_ms - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stats_empty_window() {
        let store = store();
        let stats = store.event_stats(24).unwrap();
        assert_eq!(stats.total, 0);
        assert!(stats.avg_execution_time_ms.abs() < f64::EPSILON);
    }

    #[test]
    fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");
        let path = path.to_str().unwrap();

        {
            let store = CapabilityStore::open(path).unwrap();
            store.upsert_addon("alpha").unwrap();
            store.toggle_addon("alpha").unwrap();
        }

        let store = CapabilityStore::open(path).unwrap();
        assert!(!store.addon_enabled("alpha").unwrap());
    }
}
