//! Thought Store - durable priority queue and lifecycle state machine.
//!
//! Single source of truth for thoughts, their insights and connections.
//! One connection behind a mutex per handle; every mutation that must be
//! atomic runs in a `BEGIN IMMEDIATE` transaction so several handles (or
//! processes) on the same file can never claim the same thought.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};

use reverie_types::{
    Connection as ThoughtConnection, Insight, Priority, StatusCount, StatusSummary, Thought,
    MAX_ITERATIONS, ThoughtContext, ThoughtId, ThoughtResult, ThoughtStatus, ThoughtType,
    now_epoch_secs,
};

use crate::StoreError;
use crate::sqlite_util::open_secure_db;

const THOUGHT_COLUMNS: &str = "id, type, content, context, priority, status, created_at, \
     started_at, completed_at, result, model_used, iterations, parent_id";

/// Minimal view of a completed thought, used as the lookback source for
/// connection discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedThought {
    pub id: ThoughtId,
    pub thought_type: ThoughtType,
    pub content: String,
}

/// Everything a worker persists when a thought completes, written in one
/// transaction so insights and connections never exist for an unfinished
/// thought.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRecord<'a> {
    pub thought: &'a Thought,
    pub insights: &'a [Insight],
    pub connections: &'a [ThoughtConnection],
    pub follow_up: Option<&'a Thought>,
}

pub struct ThoughtStore {
    db: Mutex<Connection>,
}

impl ThoughtStore {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS thoughts (
            id TEXT PRIMARY KEY,
            type TEXT NOT NULL,
            content TEXT NOT NULL,
            context TEXT NOT NULL DEFAULT '{}',
            priority INTEGER NOT NULL DEFAULT 5,
            status TEXT NOT NULL DEFAULT 'queued',
            created_at REAL NOT NULL,
            started_at REAL,
            completed_at REAL,
            result TEXT,
            model_used TEXT,
            iterations INTEGER NOT NULL DEFAULT 0 CHECK (iterations BETWEEN 0 AND 3),
            parent_id TEXT REFERENCES thoughts(id)
        );

        CREATE INDEX IF NOT EXISTS idx_thoughts_queue
        ON thoughts(status, priority DESC, created_at ASC);

        CREATE INDEX IF NOT EXISTS idx_thoughts_completed
        ON thoughts(completed_at) WHERE status = 'completed';

        CREATE INDEX IF NOT EXISTS idx_thoughts_parent
        ON thoughts(parent_id);

        CREATE TABLE IF NOT EXISTS insights (
            id TEXT PRIMARY KEY,
            thought_id TEXT NOT NULL REFERENCES thoughts(id),
            insight TEXT NOT NULL,
            significance REAL NOT NULL,
            created_at REAL NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_insights_created
        ON insights(created_at);

        CREATE TABLE IF NOT EXISTS connections (
            id TEXT PRIMARY KEY,
            thought_id_1 TEXT NOT NULL REFERENCES thoughts(id),
            thought_id_2 TEXT NOT NULL REFERENCES thoughts(id),
            connection_type TEXT NOT NULL,
            strength REAL NOT NULL,
            description TEXT NOT NULL,
            created_at REAL NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_connections_1 ON connections(thought_id_1);
        CREATE INDEX IF NOT EXISTS idx_connections_2 ON connections(thought_id_2);
    ";

    /// Open or create the store database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = open_secure_db(path.as_ref())?;
        Self::initialize(db)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(db: Connection) -> Result<Self, StoreError> {
        db.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;",
        )?;
        db.execute_batch(Self::SCHEMA)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite half-written:
        // uncommitted transactions roll back when dropped.
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a thought to the queue.
    pub fn enqueue(&self, thought: &Thought) -> Result<ThoughtId, StoreError> {
        let mut db = self.conn();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        insert_thought(&tx, thought)?;
        tx.commit()?;
        tracing::debug!(
            thought_id = %thought.id,
            priority = %thought.priority,
            kind = %thought.thought_type,
            "Thought enqueued"
        );
        Ok(thought.id.clone())
    }

    /// Atomically take the next queued thought and mark it processing.
    ///
    /// Highest priority first; ties go to the earliest `created_at`, then to
    /// insertion order.
    pub fn claim_next(&self) -> Result<Option<Thought>, StoreError> {
        let mut db = self.conn();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidate: Option<String> = tx
            .query_row(
                "SELECT id FROM thoughts
                 WHERE status = 'queued'
                 ORDER BY priority DESC, created_at ASC, rowid ASC
                 LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = candidate else {
            return Ok(None);
        };

        let claimed = tx.execute(
            "UPDATE thoughts SET status = 'processing', started_at = ?2
             WHERE id = ?1 AND status = 'queued'",
            params![id, now_epoch_secs()],
        )?;
        if claimed == 0 {
            // Unreachable while the immediate lock is held; treat as empty.
            return Ok(None);
        }

        let thought = load_thought(&tx, &id)?;
        tx.commit()?;
        Ok(thought)
    }

    /// Persist the full mutable state of a thought.
    pub fn update(&self, thought: &Thought) -> Result<(), StoreError> {
        let mut db = self.conn();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        write_thought_state(&tx, thought)?;
        tx.commit()?;
        Ok(())
    }

    /// Persist a completed thought together with its derived records and an
    /// optional follow-up thought.
    pub fn record_completion(&self, record: CompletionRecord<'_>) -> Result<(), StoreError> {
        let thought = record.thought;
        if thought.status != ThoughtStatus::Completed {
            return Err(StoreError::NotCompleted(thought.id.clone()));
        }

        let mut db = self.conn();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        write_thought_state(&tx, thought)?;

        for insight in record.insights {
            tx.execute(
                "INSERT INTO insights (id, thought_id, insight, significance, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    insight.id.as_str(),
                    insight.thought_id.as_str(),
                    insight.text,
                    insight.significance,
                    insight.created_at,
                ],
            )?;
        }

        for connection in record.connections {
            tx.execute(
                "INSERT INTO connections
                 (id, thought_id_1, thought_id_2, connection_type, strength, description,
                  created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    connection.id.as_str(),
                    connection.thought_id_1.as_str(),
                    connection.thought_id_2.as_str(),
                    connection.connection_type,
                    connection.strength,
                    connection.description,
                    connection.created_at,
                ],
            )?;
        }

        if let Some(follow_up) = record.follow_up {
            insert_thought(&tx, follow_up)?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &ThoughtId) -> Result<Option<Thought>, StoreError> {
        let db = self.conn();
        load_thought(&db, id.as_str())
    }

    /// Insights created within `window`, most significant first.
    pub fn recent_insights(
        &self,
        window: Duration,
        limit: usize,
    ) -> Result<Vec<Insight>, StoreError> {
        let cutoff = now_epoch_secs() - window.as_secs_f64();
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT i.id, i.thought_id, i.insight, i.significance, i.created_at
             FROM insights i
             JOIN thoughts t ON i.thought_id = t.id
             WHERE i.created_at > ?1
             ORDER BY i.significance DESC, i.created_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![cutoff, limit as i64], |row| {
            Ok(Insight {
                id: reverie_types::InsightId::new(row.get::<_, String>(0)?),
                thought_id: ThoughtId::new(row.get::<_, String>(1)?),
                text: row.get(2)?,
                significance: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Insights recorded for one thought, in creation order.
    pub fn insights_for(&self, id: &ThoughtId) -> Result<Vec<Insight>, StoreError> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT id, thought_id, insight, significance, created_at
             FROM insights WHERE thought_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            Ok(Insight {
                id: reverie_types::InsightId::new(row.get::<_, String>(0)?),
                thought_id: ThoughtId::new(row.get::<_, String>(1)?),
                text: row.get(2)?,
                significance: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Connections touching `id` on either side, strongest first.
    pub fn connections_for(&self, id: &ThoughtId) -> Result<Vec<ThoughtConnection>, StoreError> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT id, thought_id_1, thought_id_2, connection_type, strength, description,
                    created_at
             FROM connections
             WHERE thought_id_1 = ?1 OR thought_id_2 = ?1
             ORDER BY strength DESC",
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            Ok(ThoughtConnection {
                id: reverie_types::ConnectionId::new(row.get::<_, String>(0)?),
                thought_id_1: ThoughtId::new(row.get::<_, String>(1)?),
                thought_id_2: ThoughtId::new(row.get::<_, String>(2)?),
                connection_type: row.get(3)?,
                strength: row.get(4)?,
                description: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Most recently completed thoughts other than `exclude`.
    pub fn recently_completed(
        &self,
        exclude: &ThoughtId,
        limit: usize,
    ) -> Result<Vec<CompletedThought>, StoreError> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT id, type, content FROM thoughts
             WHERE id != ?1 AND status = 'completed'
             ORDER BY completed_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![exclude.as_str(), limit as i64], |row| {
            let kind: String = row.get(1)?;
            Ok(CompletedThought {
                id: ThoughtId::new(row.get::<_, String>(0)?),
                thought_type: ThoughtType::parse_lenient(&kind),
                content: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Follow-up thoughts spawned from `parent`, oldest first.
    pub fn follow_ups(&self, parent: &ThoughtId) -> Result<Vec<Thought>, StoreError> {
        let db = self.conn();
        let mut stmt = db.prepare(&format!(
            "SELECT {THOUGHT_COLUMNS} FROM thoughts WHERE parent_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![parent.as_str()], ThoughtRow::from_row)?;
        rows.map(|row| row?.into_thought()).collect()
    }

    /// Count and mean priority per status.
    pub fn status_summary(&self) -> Result<StatusSummary, StoreError> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT status, COUNT(*), AVG(priority) FROM thoughts GROUP BY status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?;

        let mut summary = StatusSummary::default();
        for row in rows {
            let (status, count, avg_priority) = row?;
            let status: ThoughtStatus = status.parse().map_err(|e| StoreError::Corrupt {
                id: "<status summary>".to_string(),
                reason: format!("{e}"),
            })?;
            summary.by_status.insert(
                status,
                StatusCount {
                    count: count as u64,
                    avg_priority,
                },
            );
        }
        Ok(summary)
    }

    /// Fail thoughts left in `processing` by a run that never finished them.
    ///
    /// Only call this before any worker is started against the same file.
    pub fn recover_interrupted(&self) -> Result<usize, StoreError> {
        let result = serde_json::to_string(&ThoughtResult::failed(
            "interrupted: processing did not finish before shutdown",
        ))
        .map_err(|source| StoreError::Serialization {
            what: "recovery result",
            source,
        })?;

        let db = self.conn();
        let recovered = db.execute(
            "UPDATE thoughts SET status = 'failed', result = ?1, completed_at = ?2
             WHERE status = 'processing'",
            params![result, now_epoch_secs()],
        )?;
        if recovered > 0 {
            tracing::warn!(count = recovered, "Recovered interrupted thoughts as failed");
        }
        Ok(recovered)
    }
}

fn check_iterations(thought: &Thought) -> Result<(), StoreError> {
    if thought.iterations > MAX_ITERATIONS {
        return Err(StoreError::IterationLimit {
            id: thought.id.clone(),
            iterations: thought.iterations,
        });
    }
    Ok(())
}

fn insert_thought(tx: &Transaction<'_>, thought: &Thought) -> Result<(), StoreError> {
    check_iterations(thought)?;
    let context = encode_context(&thought.context)?;
    let result = encode_result(thought.result.as_ref())?;
    let inserted = tx.execute(
        "INSERT INTO thoughts (
            id, type, content, context, priority, status, created_at,
            started_at, completed_at, result, model_used, iterations, parent_id
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            thought.id.as_str(),
            thought.thought_type.as_str(),
            thought.content,
            context,
            i64::from(thought.priority),
            thought.status.as_str(),
            thought.created_at,
            thought.started_at,
            thought.completed_at,
            result,
            thought.model_used,
            i64::from(thought.iterations),
            thought.parent_id.as_ref().map(ThoughtId::as_str),
        ],
    );

    match inserted {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            Err(StoreError::DuplicateId(thought.id.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

fn write_thought_state(tx: &Transaction<'_>, thought: &Thought) -> Result<(), StoreError> {
    check_iterations(thought)?;
    let stored: Option<String> = tx
        .query_row(
            "SELECT status FROM thoughts WHERE id = ?1",
            params![thought.id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    let Some(stored) = stored else {
        return Err(StoreError::NotFound(thought.id.clone()));
    };
    let from: ThoughtStatus = stored.parse().map_err(|e| StoreError::Corrupt {
        id: thought.id.to_string(),
        reason: format!("{e}"),
    })?;
    if !from.can_transition_to(thought.status) {
        return Err(StoreError::InvalidTransition {
            id: thought.id.clone(),
            from,
            to: thought.status,
        });
    }

    let context = encode_context(&thought.context)?;
    let result = encode_result(thought.result.as_ref())?;
    tx.execute(
        "UPDATE thoughts SET
            content = ?2, context = ?3, priority = ?4, status = ?5,
            started_at = ?6, completed_at = ?7, result = ?8,
            model_used = ?9, iterations = ?10
         WHERE id = ?1",
        params![
            thought.id.as_str(),
            thought.content,
            context,
            i64::from(thought.priority),
            thought.status.as_str(),
            thought.started_at,
            thought.completed_at,
            result,
            thought.model_used,
            i64::from(thought.iterations),
        ],
    )?;
    Ok(())
}

fn load_thought(db: &Connection, id: &str) -> Result<Option<Thought>, StoreError> {
    let row = db
        .query_row(
            &format!("SELECT {THOUGHT_COLUMNS} FROM thoughts WHERE id = ?1"),
            params![id],
            ThoughtRow::from_row,
        )
        .optional()?;
    row.map(ThoughtRow::into_thought).transpose()
}

fn encode_context(context: &ThoughtContext) -> Result<String, StoreError> {
    serde_json::to_string(context).map_err(|source| StoreError::Serialization {
        what: "thought context",
        source,
    })
}

fn encode_result(result: Option<&ThoughtResult>) -> Result<Option<String>, StoreError> {
    result
        .map(serde_json::to_string)
        .transpose()
        .map_err(|source| StoreError::Serialization {
            what: "thought result",
            source,
        })
}

/// Raw column values; decoding into domain types happens outside the
/// rusqlite row callback so decode failures carry the thought id.
struct ThoughtRow {
    id: String,
    kind: String,
    content: String,
    context: String,
    priority: i64,
    status: String,
    created_at: f64,
    started_at: Option<f64>,
    completed_at: Option<f64>,
    result: Option<String>,
    model_used: Option<String>,
    iterations: i64,
    parent_id: Option<String>,
}

impl ThoughtRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            content: row.get(2)?,
            context: row.get(3)?,
            priority: row.get(4)?,
            status: row.get(5)?,
            created_at: row.get(6)?,
            started_at: row.get(7)?,
            completed_at: row.get(8)?,
            result: row.get(9)?,
            model_used: row.get(10)?,
            iterations: row.get(11)?,
            parent_id: row.get(12)?,
        })
    }

    fn into_thought(self) -> Result<Thought, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: self.id.clone(),
            reason,
        };

        let context = if self.context.trim().is_empty() {
            ThoughtContext::new()
        } else {
            serde_json::from_str(&self.context).map_err(|e| corrupt(format!("context: {e}")))?
        };
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str::<ThoughtResult>)
            .transpose()
            .map_err(|e| corrupt(format!("result: {e}")))?;
        let priority = Priority::new(self.priority).map_err(|e| corrupt(format!("{e}")))?;
        let status = self
            .status
            .parse::<ThoughtStatus>()
            .map_err(|e| corrupt(format!("{e}")))?;
        let iterations = u32::try_from(self.iterations)
            .ok()
            .filter(|n| *n <= MAX_ITERATIONS)
            .ok_or_else(|| corrupt(format!("iterations out of range: {}", self.iterations)))?;

        Ok(Thought {
            id: ThoughtId::new(self.id.clone()),
            thought_type: ThoughtType::parse_lenient(&self.kind),
            content: self.content,
            context,
            priority,
            status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result,
            model_used: self.model_used,
            iterations,
            parent_id: self.parent_id.map(ThoughtId::new),
        })
    }
}
