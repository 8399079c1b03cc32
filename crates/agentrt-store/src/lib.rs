//! Durable Store (spec.md §4.2/§6): a single SQLite file holding the six
//! logical tables `plans`, `steps`, `events`, `cache_items`, `facts`, and
//! `schema_migrations`.
//!
//! Grounded in `original_source/packages/memory/olympus_memory/db.py`:
//! WAL journal mode, `synchronous=NORMAL`, a busy timeout so concurrent
//! readers don't immediately error out, and a `schema_migrations` table
//! guarding idempotent `CREATE TABLE IF NOT EXISTS` bootstrapping. The
//! rewrite swaps Python's `sqlite3` module for `rusqlite` and keeps the
//! pragma set unchanged.

use std::path::Path;
use std::sync::Mutex;

use agentrt_core::{Budget, CacheItem, CapabilityRef, Event, EventKind, Guard, Plan, PlanState, Step, StepState};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

const SCHEMA_VERSION: i64 = 1;
const BUSY_TIMEOUT_MS: u32 = 5_000;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("plan not found: {0}")]
    PlanNotFound(String),
}

impl From<StoreError> for agentrt_core::AppError {
    fn from(err: StoreError) -> Self {
        agentrt_core::AppError::Store(err.to_string())
    }
}

/// A handle to the SQLite-backed Durable Store. Guards its connection
/// behind a `Mutex` so a single `Store` can be shared (via `Arc`) across
/// the scheduler's concurrent step tasks within one process; coordination
/// across separate *processes* touching the same file is `agentrt-lock`'s
/// job instead.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if necessary) the store at `path` and ensure its
    /// schema is current.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "opening durable store");
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        let store = Store { conn: Mutex::new(conn) };
        store.ensure_schema()?;
        Ok(store)
    }

    /// In-memory store for tests — same schema, no file on disk.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        let store = Store { conn: Mutex::new(conn) };
        store.ensure_schema()?;
        Ok(store)
    }

    fn configure(conn: &Connection) -> Result<(), StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS as u64))?;
        Ok(())
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                version INTEGER NOT NULL UNIQUE,
                applied_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS plans (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                state TEXT NOT NULL,
                budget TEXT NOT NULL,
                metadata TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS steps (
                id TEXT PRIMARY KEY,
                plan_id TEXT NOT NULL REFERENCES plans(id),
                name TEXT NOT NULL,
                capability TEXT NOT NULL,
                input TEXT NOT NULL,
                deps TEXT NOT NULL,
                guard TEXT NOT NULL,
                state TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                started_at INTEGER,
                ended_at INTEGER,
                last_error TEXT,
                output TEXT,
                idem_key TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_steps_plan_id ON steps(plan_id);

            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                ts INTEGER NOT NULL,
                kind TEXT NOT NULL,
                plan_id TEXT NOT NULL,
                step_id TEXT,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_plan_id ON events(plan_id, ts);

            CREATE TABLE IF NOT EXISTS cache_items (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS facts (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;

        let applied: Option<i64> = conn
            .query_row("SELECT version FROM schema_migrations WHERE version = ?1", params![SCHEMA_VERSION], |row| row.get(0))
            .optional()?;
        if applied.is_none() {
            conn.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, now_unix()],
            )?;
        }
        Ok(())
    }

    // --- Plans -----------------------------------------------------------

    pub fn upsert_plan(&self, plan: &Plan) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO plans (id, title, created_at, updated_at, state, budget, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                updated_at = excluded.updated_at,
                state = excluded.state,
                budget = excluded.budget,
                metadata = excluded.metadata",
            params![
                plan.id,
                plan.title,
                plan.created_at,
                plan.updated_at,
                serde_json::to_string(&plan.state)?,
                serde_json::to_string(&plan.budget)?,
                plan.metadata.to_string(),
            ],
        )?;
        for step in &plan.steps {
            Self::upsert_step_tx(&tx, &plan.id, step)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_plan(&self, id: &str) -> Result<Plan, StoreError> {
        let row = {
            let conn = self.conn.lock().expect("store mutex poisoned");
            let mut stmt = conn.prepare("SELECT id, title, created_at, updated_at, state, budget, metadata FROM plans WHERE id = ?1")?;
            stmt.query_row(params![id], |row| {
                let state: String = row.get(4)?;
                let budget: String = row.get(5)?;
                let metadata: String = row.get(6)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    state,
                    budget,
                    metadata,
                ))
            })
            .optional()?
            // lock dropped here, before get_steps takes it again
        };
        let Some((id, title, created_at, updated_at, state, budget, metadata)) = row else {
            return Err(StoreError::PlanNotFound(id.to_string()));
        };

        let steps = self.get_steps(&id)?;
        Ok(Plan {
            id,
            title,
            created_at,
            updated_at,
            state: serde_json::from_str::<PlanState>(&state)?,
            budget: serde_json::from_str::<Budget>(&budget)?,
            steps,
            metadata: serde_json::from_str(&metadata)?,
        })
    }

    // --- Steps -------------------------------------------------------------

    pub fn upsert_step(&self, plan_id: &str, step: &Step) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        Self::upsert_step_tx(&conn, plan_id, step)
    }

    fn upsert_step_tx(conn: &Connection, plan_id: &str, step: &Step) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO steps (id, plan_id, name, capability, input, deps, guard, state, attempts, started_at, ended_at, last_error, output, idem_key)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                capability = excluded.capability,
                input = excluded.input,
                deps = excluded.deps,
                guard = excluded.guard,
                state = excluded.state,
                attempts = excluded.attempts,
                started_at = excluded.started_at,
                ended_at = excluded.ended_at,
                last_error = excluded.last_error,
                output = excluded.output,
                idem_key = excluded.idem_key",
            params![
                step.id,
                plan_id,
                step.name,
                step.capability.name,
                step.input.to_string(),
                serde_json::to_string(&step.deps)?,
                serde_json::to_string(&step.guard)?,
                serde_json::to_string(&step.state)?,
                step.attempts,
                step.started_at,
                step.ended_at,
                step.last_error,
                step.output.as_ref().map(|v| v.to_string()),
                step.idem_key,
            ],
        )?;
        Ok(())
    }

    pub fn get_steps(&self, plan_id: &str) -> Result<Vec<Step>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, name, capability, input, deps, guard, state, attempts, started_at, ended_at, last_error, output, idem_key
             FROM steps WHERE plan_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![plan_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, u32>(7)?,
                row.get::<_, Option<i64>>(8)?,
                row.get::<_, Option<i64>>(9)?,
                row.get::<_, Option<String>>(10)?,
                row.get::<_, Option<String>>(11)?,
                row.get::<_, Option<String>>(12)?,
            ))
        })?;

        let mut steps = Vec::new();
        for row in rows {
            let (id, name, capability, input, deps, guard, state, attempts, started_at, ended_at, last_error, output, idem_key) = row?;
            steps.push(Step {
                id,
                name,
                capability: CapabilityRef::new(capability),
                input: serde_json::from_str(&input)?,
                deps: serde_json::from_str(&deps)?,
                guard: serde_json::from_str::<Guard>(&guard)?,
                state: serde_json::from_str::<StepState>(&state)?,
                attempts,
                started_at,
                ended_at,
                last_error,
                output: output.map(|o| serde_json::from_str(&o)).transpose()?,
                idem_key,
            });
        }
        Ok(steps)
    }

    // --- Events --------------------------------------------------------------

    pub fn append_event(&self, event: &Event) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO events (id, ts, kind, plan_id, step_id, payload) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.id,
                event.ts,
                serde_json::to_string(&event.kind)?,
                event.plan_id,
                event.step_id,
                event.payload.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn events_for_plan(&self, plan_id: &str) -> Result<Vec<Event>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare("SELECT id, ts, kind, plan_id, step_id, payload FROM events WHERE plan_id = ?1 ORDER BY ts, rowid")?;
        let rows = stmt.query_map(params![plan_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut events = Vec::new();
        for row in rows {
            let (id, ts, kind, plan_id, step_id, payload) = row?;
            events.push(Event {
                id,
                ts,
                kind: serde_json::from_str::<EventKind>(&kind)?,
                plan_id,
                step_id,
                payload: serde_json::from_str(&payload)?,
            });
        }
        Ok(events)
    }

    // --- Cache (LLM Router responses, spec.md §4.6) ---------------------------

    /// Returns `None` once `now` is past the item's `expires_at`, and in that
    /// case atomically removes the row (spec.md §4.2: "Cache reads past
    /// `expires_at` return None and atomically remove the row").
    pub fn cache_get(&self, key: &str, now: i64) -> Result<Option<CacheItem>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let item: Option<CacheItem> = conn
            .query_row(
                "SELECT key, value, metadata, created_at, expires_at FROM cache_items WHERE key = ?1",
                params![key],
                |row| {
                    Ok(CacheItem {
                        key: row.get(0)?,
                        value: row.get(1)?,
                        metadata: serde_json::from_str(&row.get::<_, String>(2)?).unwrap_or(serde_json::Value::Null),
                        created_at: row.get(3)?,
                        expires_at: row.get(4)?,
                    })
                },
            )
            .optional()?;

        match item {
            Some(item) if item.is_expired(now) => {
                conn.execute("DELETE FROM cache_items WHERE key = ?1", params![key])?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    pub fn cache_put(&self, item: &CacheItem) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO cache_items (key, value, metadata, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                metadata = excluded.metadata,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at",
            params![item.key, item.value, item.metadata.to_string(), item.created_at, item.expires_at],
        )?;
        Ok(())
    }

    // --- Facts (budget accumulators, reflection provenance) -------------------

    pub fn fact_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        Ok(conn.query_row("SELECT value FROM facts WHERE key = ?1", params![key], |row| row.get(0)).optional()?)
    }

    pub fn fact_set(&self, key: &str, value: &str, now: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO facts (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrt_core::{CapabilityRef, EventKind};
    use serde_json::json;

    fn sample_plan() -> Plan {
        let mut step = Step::new("write greeting", CapabilityRef::new("fs.write"), json!({"path": "hi.txt"}));
        step.state = StepState::Pending;
        Plan::new("say hello", vec![step], 1_000)
    }

    #[test]
    fn round_trips_a_plan_with_steps() {
        let store = Store::open_in_memory().unwrap();
        let plan = sample_plan();
        store.upsert_plan(&plan).unwrap();

        let fetched = store.get_plan(&plan.id).unwrap();
        assert_eq!(fetched.id, plan.id);
        assert_eq!(fetched.title, "say hello");
        assert_eq!(fetched.steps.len(), 1);
        assert_eq!(fetched.steps[0].capability.name, "fs.write");
    }

    #[test]
    fn upsert_plan_is_idempotent_on_conflict() {
        let store = Store::open_in_memory().unwrap();
        let mut plan = sample_plan();
        store.upsert_plan(&plan).unwrap();

        plan.title = "renamed".to_string();
        plan.transition(PlanState::Queued, 2_000).unwrap();
        store.upsert_plan(&plan).unwrap();

        let fetched = store.get_plan(&plan.id).unwrap();
        assert_eq!(fetched.title, "renamed");
        assert_eq!(fetched.state, PlanState::Queued);
    }

    #[test]
    fn missing_plan_is_an_error() {
        let store = Store::open_in_memory().unwrap();
        let err = store.get_plan("nope").unwrap_err();
        assert!(matches!(err, StoreError::PlanNotFound(_)));
    }

    #[test]
    fn events_persist_in_insertion_order() {
        let store = Store::open_in_memory().unwrap();
        let plan = sample_plan();
        store.upsert_plan(&plan).unwrap();

        store
            .append_event(&Event::new(EventKind::PlanCreated, plan.id.clone(), None, json!({}), 1))
            .unwrap();
        store
            .append_event(&Event::new(EventKind::PlanStarted, plan.id.clone(), None, json!({}), 2))
            .unwrap();

        let events = store.events_for_plan(&plan.id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::PlanCreated);
        assert_eq!(events[1].kind, EventKind::PlanStarted);
    }

    #[test]
    fn cache_put_then_get_respects_expiry() {
        let store = Store::open_in_memory().unwrap();
        let item = CacheItem {
            key: "k1".into(),
            value: "cached response".into(),
            metadata: json!({"model": "stub"}),
            created_at: 0,
            expires_at: Some(100),
        };
        store.cache_put(&item).unwrap();

        assert!(store.cache_get("k1", 50).unwrap().is_some());
        assert!(store.cache_get("k1", 150).unwrap().is_none());
    }

    #[test]
    fn cache_get_lazily_evicts_the_expired_row() {
        let store = Store::open_in_memory().unwrap();
        store
            .cache_put(&CacheItem { key: "k1".into(), value: "v".into(), metadata: json!({}), created_at: 0, expires_at: Some(100) })
            .unwrap();

        assert!(store.cache_get("k1", 150).unwrap().is_none());

        let conn = store.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache_items WHERE key = 'k1'", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn facts_upsert_overwrites_value() {
        let store = Store::open_in_memory().unwrap();
        store.fact_set("daily_spend_usd", "0.10", 1).unwrap();
        store.fact_set("daily_spend_usd", "0.25", 2).unwrap();
        assert_eq!(store.fact_get("daily_spend_usd").unwrap(), Some("0.25".to_string()));
        assert_eq!(store.fact_get("missing").unwrap(), None);
    }
}
