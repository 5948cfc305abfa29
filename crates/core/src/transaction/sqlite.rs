//! SQLite-backed transaction store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::error::StoreError;
use super::store::TransactionStore;
use super::types::{
    Action, ActionKind, Application, Booking, BookingRecord, FixedDownload, Infrastructure,
    NewBooking, Transaction, TransactionContext, User, DISCARDED_SIZE,
};
use crate::config::{ApplicationConfig, InfrastructureConfig};
use crate::process::ProcessHandle;

const BOOKING_COLUMNS: &str = "b.id, b.action_id, b.transaction_id, b.expected_size, \
     b.observed_size, b.process_handle, b.completion_url, \
     a.id, a.transaction_id, a.kind, a.remote_file, a.local_path, a.created_at";

const TRANSACTION_COLUMNS: &str =
    "id, user_id, application_id, infrastructure_id, proxy_path, client_ip, opened_at, closed_at";

/// SQLite-backed transaction store.
pub struct SqliteTransactionStore {
    conn: Mutex<Connection>,
}

impl SqliteTransactionStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Database(e.to_string()))?;
            }
        }
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS infrastructures (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                proxy_host TEXT NOT NULL,
                proxy_port INTEGER NOT NULL,
                proxy_id TEXT NOT NULL,
                vo TEXT NOT NULL,
                role TEXT NOT NULL,
                proxy_renewal INTEGER NOT NULL DEFAULT 0,
                info_system TEXT NOT NULL,
                catalog_host TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                catalog_dir TEXT NOT NULL,
                infrastructure_id INTEGER NOT NULL REFERENCES infrastructures(id)
            );

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                application_id INTEGER NOT NULL REFERENCES applications(id),
                infrastructure_id INTEGER NOT NULL REFERENCES infrastructures(id),
                proxy_path TEXT,
                client_ip TEXT,
                opened_at TEXT NOT NULL,
                closed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                transaction_id INTEGER NOT NULL REFERENCES transactions(id),
                kind TEXT NOT NULL,
                remote_file TEXT NOT NULL,
                local_path TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS bookings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                action_id INTEGER NOT NULL UNIQUE REFERENCES actions(id),
                transaction_id INTEGER NOT NULL REFERENCES transactions(id),
                expected_size INTEGER NOT NULL,
                observed_size INTEGER NOT NULL DEFAULT 0,
                process_handle INTEGER NOT NULL,
                completion_url TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS fixed_downloads (
                guid TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                application_id INTEGER NOT NULL REFERENCES applications(id),
                absolute_path TEXT NOT NULL,
                valid_from TEXT,
                valid_until TEXT,
                download_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_actions_transaction ON actions(transaction_id);
            CREATE INDEX IF NOT EXISTS idx_transactions_owner ON transactions(user_id, application_id);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }

    fn parse_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn parse_opt_time(value: Option<String>) -> Option<DateTime<Utc>> {
        value.as_deref().map(Self::parse_time)
    }

    fn row_to_infrastructure(row: &Row) -> rusqlite::Result<Infrastructure> {
        Ok(Infrastructure {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            proxy_host: row.get(3)?,
            proxy_port: row.get(4)?,
            proxy_id: row.get(5)?,
            vo: row.get(6)?,
            role: row.get(7)?,
            proxy_renewal: row.get(8)?,
            info_system: row.get(9)?,
            catalog_host: row.get(10)?,
        })
    }

    fn row_to_application(row: &Row) -> rusqlite::Result<Application> {
        Ok(Application {
            id: row.get(0)?,
            name: row.get(1)?,
            catalog_dir: row.get(2)?,
            infrastructure_id: row.get(3)?,
        })
    }

    fn row_to_user(row: &Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    }

    fn row_to_transaction(row: &Row) -> rusqlite::Result<Transaction> {
        let proxy_path: Option<String> = row.get(4)?;
        let opened_at: String = row.get(6)?;
        let closed_at: Option<String> = row.get(7)?;
        Ok(Transaction {
            id: row.get(0)?,
            user_id: row.get(1)?,
            application_id: row.get(2)?,
            infrastructure_id: row.get(3)?,
            proxy_path: proxy_path.map(PathBuf::from),
            client_ip: row.get(5)?,
            opened_at: Self::parse_time(&opened_at),
            closed_at: Self::parse_opt_time(closed_at),
        })
    }

    /// Reads an action starting at column `offset`.
    fn row_to_action(row: &Row, offset: usize) -> rusqlite::Result<Action> {
        let kind: String = row.get(offset + 2)?;
        let kind = kind.parse::<ActionKind>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                offset + 2,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?;
        let local_path: Option<String> = row.get(offset + 4)?;
        let created_at: String = row.get(offset + 5)?;
        Ok(Action {
            id: row.get(offset)?,
            transaction_id: row.get(offset + 1)?,
            kind,
            remote_file: row.get(offset + 3)?,
            local_path: local_path.map(PathBuf::from),
            created_at: Self::parse_time(&created_at),
        })
    }

    fn row_to_booking_record(row: &Row) -> rusqlite::Result<BookingRecord> {
        let expected_size: i64 = row.get(3)?;
        let handle: u32 = row.get(5)?;
        let booking = Booking {
            id: row.get(0)?,
            action_id: row.get(1)?,
            transaction_id: row.get(2)?,
            expected_size: expected_size.max(0) as u64,
            observed_size: row.get(4)?,
            process_handle: ProcessHandle::from_raw(handle),
            completion_url: row.get(6)?,
        };
        let action = Self::row_to_action(row, 7)?;
        Ok(BookingRecord { booking, action })
    }

    fn row_to_fixed_download(row: &Row) -> rusqlite::Result<FixedDownload> {
        Ok(FixedDownload {
            guid: row.get(0)?,
            user_id: row.get(1)?,
            application_id: row.get(2)?,
            absolute_path: row.get(3)?,
            valid_from: Self::parse_opt_time(row.get(4)?),
            valid_until: Self::parse_opt_time(row.get(5)?),
            download_count: row.get(6)?,
        })
    }

    /// Interprets the row count of an update guarded on the Book stage:
    /// `false` when the booking exists but is no longer open.
    fn open_booking_changed(conn: &Connection, id: i64, rows: usize) -> Result<bool, StoreError> {
        if rows > 0 {
            return Ok(true);
        }
        let exists = conn
            .query_row("SELECT 1 FROM bookings WHERE id = ?", params![id], |_| Ok(()))
            .optional()?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(StoreError::not_found("booking", id))
        }
    }

    fn query_booking(conn: &Connection, id: i64) -> Result<Option<BookingRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM bookings b JOIN actions a ON a.id = b.action_id WHERE b.id = ?",
            BOOKING_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![id], Self::row_to_booking_record)
            .optional()?)
    }

    fn path_text(path: &Path) -> String {
        path.to_string_lossy().to_string()
    }
}

impl TransactionStore for SqliteTransactionStore {
    fn upsert_infrastructure(
        &self,
        config: &InfrastructureConfig,
    ) -> Result<Infrastructure, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO infrastructures (name, description, proxy_host, proxy_port, proxy_id, vo, role, proxy_renewal, info_system, catalog_host)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                proxy_host = excluded.proxy_host,
                proxy_port = excluded.proxy_port,
                proxy_id = excluded.proxy_id,
                vo = excluded.vo,
                role = excluded.role,
                proxy_renewal = excluded.proxy_renewal,
                info_system = excluded.info_system,
                catalog_host = excluded.catalog_host",
            params![
                config.name,
                config.description,
                config.proxy_host,
                config.proxy_port,
                config.proxy_id,
                config.vo,
                config.role,
                config.proxy_renewal,
                config.info_system,
                config.catalog_host,
            ],
        )?;

        Ok(conn.query_row(
            "SELECT id, name, description, proxy_host, proxy_port, proxy_id, vo, role, proxy_renewal, info_system, catalog_host FROM infrastructures WHERE name = ?",
            params![config.name],
            Self::row_to_infrastructure,
        )?)
    }

    fn upsert_application(
        &self,
        config: &ApplicationConfig,
        infrastructure_id: i64,
    ) -> Result<Application, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO applications (name, catalog_dir, infrastructure_id) VALUES (?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                catalog_dir = excluded.catalog_dir,
                infrastructure_id = excluded.infrastructure_id",
            params![config.name, config.catalog_dir, infrastructure_id],
        )?;

        Ok(conn.query_row(
            "SELECT id, name, catalog_dir, infrastructure_id FROM applications WHERE name = ?",
            params![config.name],
            Self::row_to_application,
        )?)
    }

    fn upsert_user(&self, name: &str) -> Result<User, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO users (name) VALUES (?)",
            params![name],
        )?;
        Ok(conn.query_row(
            "SELECT id, name FROM users WHERE name = ?",
            params![name],
            Self::row_to_user,
        )?)
    }

    fn find_user(&self, name: &str) -> Result<Option<User>, StoreError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, name FROM users WHERE name = ?",
                params![name],
                Self::row_to_user,
            )
            .optional()?)
    }

    fn find_application(&self, name: &str) -> Result<Option<Application>, StoreError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, name, catalog_dir, infrastructure_id FROM applications WHERE name = ?",
                params![name],
                Self::row_to_application,
            )
            .optional()?)
    }

    fn begin_transaction(
        &self,
        user_id: i64,
        application_id: i64,
        client_ip: Option<&str>,
    ) -> Result<Transaction, StoreError> {
        let conn = self.lock()?;
        let infrastructure_id: i64 = conn
            .query_row(
                "SELECT infrastructure_id FROM applications WHERE id = ?",
                params![application_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("application", application_id))?;

        let now = Utc::now();
        conn.execute(
            "INSERT INTO transactions (user_id, application_id, infrastructure_id, client_ip, opened_at) VALUES (?, ?, ?, ?, ?)",
            params![user_id, application_id, infrastructure_id, client_ip, now.to_rfc3339()],
        )?;

        Ok(Transaction {
            id: conn.last_insert_rowid(),
            user_id,
            application_id,
            infrastructure_id,
            proxy_path: None,
            client_ip: client_ip.map(str::to_string),
            opened_at: now,
            closed_at: None,
        })
    }

    fn get_transaction(&self, id: i64) -> Result<Option<Transaction>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM transactions WHERE id = ?", TRANSACTION_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], Self::row_to_transaction)
            .optional()?)
    }

    fn set_proxy(&self, id: i64, proxy_path: &Path) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE transactions SET proxy_path = ? WHERE id = ?",
            params![Self::path_text(proxy_path), id],
        )?;
        if rows == 0 {
            return Err(StoreError::not_found("transaction", id));
        }
        Ok(())
    }

    fn close_transaction(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE transactions SET closed_at = ? WHERE id = ? AND closed_at IS NULL",
            params![Utc::now().to_rfc3339(), id],
        )?;
        if rows > 0 {
            return Ok(true);
        }

        let exists: Option<i64> = conn
            .query_row("SELECT id FROM transactions WHERE id = ?", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::not_found("transaction", id)),
        }
    }

    fn transaction_context(&self, id: i64) -> Result<Option<TransactionContext>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM transactions WHERE id = ?", TRANSACTION_COLUMNS);
        let Some(transaction) = conn
            .query_row(&sql, params![id], Self::row_to_transaction)
            .optional()?
        else {
            return Ok(None);
        };

        let infrastructure = conn.query_row(
            "SELECT id, name, description, proxy_host, proxy_port, proxy_id, vo, role, proxy_renewal, info_system, catalog_host FROM infrastructures WHERE id = ?",
            params![transaction.infrastructure_id],
            Self::row_to_infrastructure,
        )?;
        let application = conn.query_row(
            "SELECT id, name, catalog_dir, infrastructure_id FROM applications WHERE id = ?",
            params![transaction.application_id],
            Self::row_to_application,
        )?;
        let user = conn.query_row(
            "SELECT id, name FROM users WHERE id = ?",
            params![transaction.user_id],
            Self::row_to_user,
        )?;

        Ok(Some(TransactionContext {
            transaction,
            infrastructure,
            application,
            user,
        }))
    }

    fn record_action(
        &self,
        transaction_id: i64,
        kind: ActionKind,
        remote_file: &str,
        local_path: Option<&Path>,
    ) -> Result<Action, StoreError> {
        let conn = self.lock()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO actions (transaction_id, kind, remote_file, local_path, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                transaction_id,
                kind.as_str(),
                remote_file,
                local_path.map(Self::path_text),
                now.to_rfc3339(),
            ],
        )?;

        Ok(Action {
            id: conn.last_insert_rowid(),
            transaction_id,
            kind,
            remote_file: remote_file.to_string(),
            local_path: local_path.map(Path::to_path_buf),
            created_at: now,
        })
    }

    fn actions_for(&self, transaction_id: i64) -> Result<Vec<Action>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, transaction_id, kind, remote_file, local_path, created_at FROM actions WHERE transaction_id = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![transaction_id], |row| Self::row_to_action(row, 0))?;

        let mut actions = Vec::new();
        for row in rows {
            actions.push(row?);
        }
        Ok(actions)
    }

    fn create_booking(&self, booking: NewBooking) -> Result<BookingRecord, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "INSERT INTO actions (transaction_id, kind, remote_file, local_path, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                booking.transaction_id,
                ActionKind::Book.as_str(),
                booking.remote_file,
                Self::path_text(&booking.local_path),
                now,
            ],
        )?;
        let action_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO bookings (action_id, transaction_id, expected_size, observed_size, process_handle, updated_at) VALUES (?, ?, ?, 0, ?, ?)",
            params![
                action_id,
                booking.transaction_id,
                booking.expected_size as i64,
                booking.process_handle.as_raw(),
                now,
            ],
        )?;
        let booking_id = tx.last_insert_rowid();

        let record = Self::query_booking(&tx, booking_id)?
            .ok_or_else(|| StoreError::not_found("booking", booking_id))?;
        tx.commit()?;
        Ok(record)
    }

    fn get_booking(&self, id: i64) -> Result<Option<BookingRecord>, StoreError> {
        let conn = self.lock()?;
        Self::query_booking(&conn, id)
    }

    fn open_bookings(
        &self,
        user_id: i64,
        application_id: i64,
    ) -> Result<Vec<BookingRecord>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM bookings b
             JOIN actions a ON a.id = b.action_id
             JOIN transactions t ON t.id = b.transaction_id
             WHERE t.user_id = ? AND t.application_id = ? AND a.kind = ?
             ORDER BY b.id",
            BOOKING_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![user_id, application_id, ActionKind::Book.as_str()],
            Self::row_to_booking_record,
        )?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn update_observed_size(&self, booking_id: i64, size: i64) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE bookings SET observed_size = ?, updated_at = ?
             WHERE id = ? AND action_id IN (SELECT id FROM actions WHERE kind = ?)",
            params![size, Utc::now().to_rfc3339(), booking_id, ActionKind::Book.as_str()],
        )?;
        Self::open_booking_changed(&conn, booking_id, rows)
    }

    fn set_completion_url(&self, booking_id: i64, url: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE bookings SET completion_url = ?, updated_at = ?
             WHERE id = ? AND action_id IN (SELECT id FROM actions WHERE kind = ?)",
            params![url, Utc::now().to_rfc3339(), booking_id, ActionKind::Book.as_str()],
        )?;
        Self::open_booking_changed(&conn, booking_id, rows)
    }

    fn mark_orphaned(&self, booking_id: i64) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let rows = tx.execute(
            "UPDATE actions SET kind = ?
             WHERE kind = ? AND id = (SELECT action_id FROM bookings WHERE id = ?)",
            params![
                ActionKind::Orphaned.as_str(),
                ActionKind::Book.as_str(),
                booking_id
            ],
        )?;
        if !Self::open_booking_changed(&tx, booking_id, rows)? {
            return Ok(false);
        }
        tx.execute(
            "UPDATE bookings SET observed_size = ?, updated_at = ? WHERE id = ?",
            params![DISCARDED_SIZE, Utc::now().to_rfc3339(), booking_id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn close_bookings(&self, booking_ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut closed = Vec::with_capacity(booking_ids.len());
        for &id in booking_ids {
            let rows = tx.execute(
                "UPDATE actions SET kind = ?
                 WHERE kind = ? AND id = (SELECT action_id FROM bookings WHERE id = ?)",
                params![ActionKind::Close.as_str(), ActionKind::Book.as_str(), id],
            )?;
            if Self::open_booking_changed(&tx, id, rows)? {
                closed.push(id);
            }
        }
        tx.commit()?;
        Ok(closed)
    }

    fn register_fixed_download(
        &self,
        user_id: i64,
        application_id: i64,
        absolute_path: &str,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
    ) -> Result<FixedDownload, StoreError> {
        let conn = self.lock()?;
        let guid = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO fixed_downloads (guid, user_id, application_id, absolute_path, valid_from, valid_until, download_count, created_at) VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
            params![
                guid,
                user_id,
                application_id,
                absolute_path,
                valid_from.map(|t| t.to_rfc3339()),
                valid_until.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(FixedDownload {
            guid,
            user_id,
            application_id,
            absolute_path: absolute_path.to_string(),
            valid_from,
            valid_until,
            download_count: 0,
        })
    }

    fn get_fixed_download(&self, guid: &str) -> Result<Option<FixedDownload>, StoreError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT guid, user_id, application_id, absolute_path, valid_from, valid_until, download_count FROM fixed_downloads WHERE guid = ?",
                params![guid],
                Self::row_to_fixed_download,
            )
            .optional()?)
    }

    fn increment_download_count(&self, guid: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE fixed_downloads SET download_count = download_count + 1 WHERE guid = ?",
            params![guid],
        )?;
        if rows == 0 {
            return Err(StoreError::not_found("fixed download", guid));
        }
        Ok(())
    }
}
