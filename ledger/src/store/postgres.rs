//! PostgreSQL-backed store.
//!
//! ## Error mapping
//!
//! | PostgreSQL code | CajaError | Scenario |
//! |---|---|---|
//! | `23505` on `(session_id, sequence)` | `Busy` | another writer took the sequence number |
//! | `23505` unique violation | `Conflict` | second open session, second reversal |
//! | `23514` check violation | `Validation` | amount or status outside the column constraints |
//! | `40001` / `40P01` | `Busy` | serialization failure or deadlock; safe to retry |
//! | anything else | `Storage` | connection and driver errors |
//!
//! Lifecycle preconditions and the posting count are re-checked under
//! `SELECT ... FOR UPDATE` on the session row, so closes and appends on the
//! same session serialize even across processes. Locks are always taken
//! session row first.

use async_trait::async_trait;
use caja_common::{
    CajaError, EmployeeId, MovementId, MovementTypeId, PaymentTypeId, RegisterId,
    Result, SessionId, Sign,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use tracing::{info, instrument};
use uuid::Uuid;

use super::LedgerStore;
use crate::catalog::{Catalog, MovementType, PaymentType};
use crate::config::LedgerConfig;
use crate::movement::{DocumentRef, Movement, MovementKind, MovementStatus, Origin};
use crate::session::{RegisterSession, SessionStatus};

const SESSION_COLUMNS: &str = "id, register_id, opened_by, opened_at, opening_amount, \
     closed_by, closed_at, status, counted_amount, system_amount, difference, notes, closing_digest";

const MOVEMENT_COLUMNS: &str = "id, session_id, sequence, movement_date, movement_time, \
     created_at, amount, sign, description, employee_id, created_by, payment_type_id, \
     movement_type_id, affects_cash, kind, origin, ref_type, ref_id, status, reversed_of, reversed_by";

/// Unique `(session_id, sequence)` constraint from the migration.
const SEQUENCE_CONSTRAINT: &str = "caja_movements_sequence";

#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using `config.database_url` and apply pending migrations.
    pub async fn connect(config: &LedgerConfig) -> Result<Self> {
        let url = config.database_url.as_deref().ok_or_else(|| {
            CajaError::Configuration("DATABASE_URL is required for the PostgreSQL store".into())
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.lock_timeout)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| CajaError::Storage(format!("migration failed: {}", e)))?;

        info!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert the catalog's payment and movement types that are missing.
    pub async fn seed_catalog(&self, catalog: &Catalog) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        for payment in catalog.payment_types() {
            sqlx::query("INSERT INTO payment_types (id, name) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
                .bind(payment.id.0)
                .bind(&payment.name)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("seed_payment_types", e))?;
        }

        for movement_type in catalog.movement_types() {
            sqlx::query("INSERT INTO movement_types (id, name) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
                .bind(movement_type.id.0)
                .bind(&movement_type.name)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("seed_movement_types", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    /// Read the reference tables into a [`Catalog`].
    pub async fn load_catalog(&self, cash_name: &str) -> Result<Catalog> {
        let mut catalog = Catalog::new(cash_name);

        let rows = sqlx::query("SELECT id, name FROM payment_types ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_payment_types", e))?;
        for row in rows {
            let id: i64 = row.try_get("id").map_err(decode_err)?;
            let name: String = row.try_get("name").map_err(decode_err)?;
            catalog = catalog.with_payment_type(PaymentType::new(id, name));
        }

        let rows = sqlx::query("SELECT id, name FROM movement_types ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_movement_types", e))?;
        for row in rows {
            let id: i64 = row.try_get("id").map_err(decode_err)?;
            let name: String = row.try_get("name").map_err(decode_err)?;
            catalog = catalog.with_movement_type(MovementType::new(id, name));
        }

        Ok(catalog)
    }

    /// Lock the session row and return its status.
    async fn lock_session(conn: &mut PgConnection, id: SessionId) -> Result<SessionStatus> {
        let row = sqlx::query("SELECT status FROM caja_sessions WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("lock_session", e))?
            .ok_or_else(|| CajaError::not_found("session", id))?;

        let status: String = row.try_get("status").map_err(decode_err)?;
        SessionStatus::parse(&status)
    }

    /// Postings of a session. Call with the session row locked.
    async fn count_movements(conn: &mut PgConnection, id: SessionId) -> Result<u64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM caja_movements WHERE session_id = $1")
            .bind(id.as_uuid())
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("count_movements", e))?
            .try_get("n")
            .map_err(decode_err)?;
        Ok(count as u64)
    }

    /// Fail with `Busy` unless `m` takes the next sequence number.
    async fn ensure_next_sequence(conn: &mut PgConnection, m: &Movement) -> Result<()> {
        let stored = Self::count_movements(conn, m.session_id).await?;
        if m.sequence != stored + 1 {
            return Err(CajaError::busy());
        }
        Ok(())
    }

    async fn insert_movement(conn: &mut PgConnection, m: &Movement) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO caja_movements (
                id, session_id, sequence, movement_date, movement_time, created_at,
                amount, sign, description, employee_id, created_by, payment_type_id,
                movement_type_id, affects_cash, kind, origin, ref_type, ref_id,
                status, reversed_of, reversed_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            "#,
        )
        .bind(m.id.as_uuid())
        .bind(m.session_id.as_uuid())
        .bind(m.sequence as i64)
        .bind(m.date)
        .bind(m.time)
        .bind(m.created_at)
        .bind(m.amount)
        .bind(m.sign.as_i8() as i16)
        .bind(&m.description)
        .bind(m.employee_id.as_str())
        .bind(m.created_by.as_str())
        .bind(m.payment_type_id.map(|id| id.0))
        .bind(m.movement_type_id.map(|id| id.0))
        .bind(m.affects_cash)
        .bind(m.kind.as_str())
        .bind(m.origin.as_str())
        .bind(m.document.as_ref().map(|d| d.ref_type.clone()))
        .bind(m.document.as_ref().map(|d| d.ref_id))
        .bind(m.status.as_str())
        .bind(m.reversed_of.map(|id| *id.as_uuid()))
        .bind(m.reversed_by.map(|id| *id.as_uuid()))
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;

        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    #[instrument(skip_all, fields(session_id = %session.id, register_id = %session.register_id), err)]
    async fn insert_session(
        &self,
        session: &RegisterSession,
        opening: Option<&Movement>,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        sqlx::query(
            r#"
            INSERT INTO caja_sessions (
                id, register_id, opened_by, opened_at, opening_amount, status, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(session.register_id.as_str())
        .bind(session.opened_by.as_str())
        .bind(session.opened_at)
        .bind(session.opening_amount)
        .bind(session.status.as_str())
        .bind(&session.notes)
        .execute(&mut *tx)
        .await
        .map_err(|e| match map_sqlx_error("insert_session", e) {
            CajaError::Conflict(_) => CajaError::Conflict(format!(
                "register {} already has an open session",
                session.register_id
            )),
            other => other,
        })?;

        if let Some(opening) = opening {
            Self::insert_movement(&mut tx, opening).await?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<RegisterSession>> {
        let query = format!("SELECT {} FROM caja_sessions WHERE id = $1", SESSION_COLUMNS);
        sqlx::query(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_session", e))?
            .map(|row| decode_session(&row))
            .transpose()
    }

    async fn find_open_session(&self, register: &RegisterId) -> Result<Option<RegisterSession>> {
        let query = format!(
            "SELECT {} FROM caja_sessions WHERE register_id = $1 AND status = 'open'",
            SESSION_COLUMNS
        );
        sqlx::query(&query)
            .bind(register.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_open_session", e))?
            .map(|row| decode_session(&row))
            .transpose()
    }

    async fn list_sessions(&self, register: &RegisterId) -> Result<Vec<RegisterSession>> {
        let query = format!(
            "SELECT {} FROM caja_sessions WHERE register_id = $1 ORDER BY opened_at DESC, id DESC",
            SESSION_COLUMNS
        );
        sqlx::query(&query)
            .bind(register.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_sessions", e))?
            .iter()
            .map(decode_session)
            .collect()
    }

    async fn get_movement(&self, id: MovementId) -> Result<Option<Movement>> {
        let query = format!("SELECT {} FROM caja_movements WHERE id = $1", MOVEMENT_COLUMNS);
        sqlx::query(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_movement", e))?
            .map(|row| decode_movement(&row))
            .transpose()
    }

    async fn list_movements(&self, session: SessionId) -> Result<Vec<Movement>> {
        let query = format!(
            "SELECT {} FROM caja_movements WHERE session_id = $1 ORDER BY sequence ASC",
            MOVEMENT_COLUMNS
        );
        sqlx::query(&query)
            .bind(session.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_movements", e))?
            .iter()
            .map(decode_movement)
            .collect()
    }

    async fn movement_count(&self, session: SessionId) -> Result<u64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM caja_movements WHERE session_id = $1")
            .bind(session.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("movement_count", e))?
            .try_get("n")
            .map_err(decode_err)?;
        Ok(count as u64)
    }

    #[instrument(skip_all, fields(session_id = %movement.session_id, movement_id = %movement.id), err)]
    async fn append_movement(&self, movement: &Movement) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let status = Self::lock_session(&mut tx, movement.session_id).await?;
        if !status.is_open() {
            return Err(CajaError::State(format!(
                "session {} is closed",
                movement.session_id
            )));
        }

        Self::ensure_next_sequence(&mut tx, movement).await?;
        Self::insert_movement(&mut tx, movement).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    #[instrument(skip_all, fields(original = %original, reversal = %reversal.id), err)]
    async fn post_reversal(&self, original: MovementId, reversal: &Movement) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let session_id: Uuid = sqlx::query("SELECT session_id FROM caja_movements WHERE id = $1")
            .bind(original.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("find_original", e))?
            .ok_or_else(|| CajaError::not_found("movement", original))?
            .try_get("session_id")
            .map_err(decode_err)?;

        let status = Self::lock_session(&mut tx, SessionId::from_uuid(session_id)).await?;
        if !status.is_open() {
            return Err(CajaError::State(format!(
                "movement {} belongs to closed session {}",
                original, session_id
            )));
        }

        Self::ensure_next_sequence(&mut tx, reversal).await?;
        Self::insert_movement(&mut tx, reversal).await?;

        let flagged = sqlx::query(
            r#"
            UPDATE caja_movements
            SET status = 'reversed', reversed_by = $2
            WHERE id = $1 AND status = 'active' AND reversed_of IS NULL
            "#,
        )
        .bind(original.as_uuid())
        .bind(reversal.id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("flag_reversed", e))?;

        if flagged.rows_affected() != 1 {
            // Dropping the transaction rolls back the inserted reversal.
            return Err(CajaError::State(format!(
                "movement {} is not an active posting",
                original
            )));
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    #[instrument(skip_all, fields(session_id = %session.id, expected_movements = expected_movements), err)]
    async fn close_session(&self, session: &RegisterSession, expected_movements: u64) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let status = Self::lock_session(&mut tx, session.id).await?;
        if !status.is_open() {
            return Err(CajaError::State(format!(
                "session {} is already closed",
                session.id
            )));
        }
        if Self::count_movements(&mut tx, session.id).await? != expected_movements {
            return Err(CajaError::busy());
        }

        sqlx::query(
            r#"
            UPDATE caja_sessions
            SET status = $2, closed_by = $3, closed_at = $4, counted_amount = $5,
                system_amount = $6, difference = $7, notes = $8, closing_digest = $9
            WHERE id = $1 AND status = 'open'
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(session.status.as_str())
        .bind(session.closed_by.as_ref().map(|e| e.as_str().to_string()))
        .bind(session.closed_at)
        .bind(session.counted_amount)
        .bind(session.system_amount)
        .bind(session.difference)
        .bind(&session.notes)
        .bind(session.closing_digest.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("close_session", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }
}

fn decode_session(row: &PgRow) -> Result<RegisterSession> {
    let status: String = row.try_get("status").map_err(decode_err)?;
    let closed_by: Option<String> = row.try_get("closed_by").map_err(decode_err)?;

    Ok(RegisterSession {
        id: SessionId::from_uuid(row.try_get("id").map_err(decode_err)?),
        register_id: RegisterId::new(row.try_get::<String, _>("register_id").map_err(decode_err)?),
        opened_by: EmployeeId::new(row.try_get::<String, _>("opened_by").map_err(decode_err)?),
        opened_at: row.try_get("opened_at").map_err(decode_err)?,
        opening_amount: row.try_get("opening_amount").map_err(decode_err)?,
        closed_by: closed_by.map(EmployeeId::new),
        closed_at: row.try_get("closed_at").map_err(decode_err)?,
        status: SessionStatus::parse(&status)?,
        counted_amount: row.try_get("counted_amount").map_err(decode_err)?,
        system_amount: row.try_get("system_amount").map_err(decode_err)?,
        difference: row.try_get("difference").map_err(decode_err)?,
        notes: row.try_get("notes").map_err(decode_err)?,
        closing_digest: row.try_get("closing_digest").map_err(decode_err)?,
    })
}

fn decode_movement(row: &PgRow) -> Result<Movement> {
    let sign: i16 = row.try_get("sign").map_err(decode_err)?;
    let sign = Sign::try_from(sign as i8)
        .map_err(|_| CajaError::Storage(format!("invalid stored sign: {}", sign)))?;
    let kind: String = row.try_get("kind").map_err(decode_err)?;
    let origin: String = row.try_get("origin").map_err(decode_err)?;
    let status: String = row.try_get("status").map_err(decode_err)?;
    let ref_type: Option<String> = row.try_get("ref_type").map_err(decode_err)?;
    let ref_id: Option<i64> = row.try_get("ref_id").map_err(decode_err)?;
    let sequence: i64 = row.try_get("sequence").map_err(decode_err)?;
    let reversed_of: Option<Uuid> = row.try_get("reversed_of").map_err(decode_err)?;
    let reversed_by: Option<Uuid> = row.try_get("reversed_by").map_err(decode_err)?;
    let payment_type_id: Option<i64> = row.try_get("payment_type_id").map_err(decode_err)?;
    let movement_type_id: Option<i64> = row.try_get("movement_type_id").map_err(decode_err)?;

    Ok(Movement {
        id: MovementId::from_uuid(row.try_get("id").map_err(decode_err)?),
        session_id: SessionId::from_uuid(row.try_get("session_id").map_err(decode_err)?),
        sequence: sequence as u64,
        date: row.try_get("movement_date").map_err(decode_err)?,
        time: row.try_get("movement_time").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
        amount: row.try_get("amount").map_err(decode_err)?,
        sign,
        description: row.try_get("description").map_err(decode_err)?,
        employee_id: EmployeeId::new(row.try_get::<String, _>("employee_id").map_err(decode_err)?),
        created_by: EmployeeId::new(row.try_get::<String, _>("created_by").map_err(decode_err)?),
        payment_type_id: payment_type_id.map(PaymentTypeId),
        movement_type_id: movement_type_id.map(MovementTypeId),
        affects_cash: row.try_get("affects_cash").map_err(decode_err)?,
        kind: MovementKind::parse(&kind)?,
        origin: Origin::parse(&origin)
            .map_err(|_| CajaError::Storage(format!("invalid stored origin: {}", origin)))?,
        document: ref_type.zip(ref_id).map(|(ref_type, ref_id)| DocumentRef { ref_type, ref_id }),
        status: MovementStatus::parse(&status)?,
        reversed_of: reversed_of.map(MovementId::from_uuid),
        reversed_by: reversed_by.map(MovementId::from_uuid),
    })
}

fn decode_err(err: sqlx::Error) -> CajaError {
    CajaError::Storage(format!("failed to decode row: {}", err))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> CajaError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") if db_err.constraint() == Some(SEQUENCE_CONSTRAINT) => {
                    CajaError::busy()
                }
                Some("23505") => CajaError::Conflict(msg),
                Some("23514") => CajaError::Validation {
                    message: msg,
                    field: None,
                },
                Some("40001") | Some("40P01") => CajaError::busy(),
                _ => CajaError::Storage(msg),
            }
        }
        sqlx::Error::PoolTimedOut => CajaError::busy(),
        sqlx::Error::PoolClosed => {
            CajaError::Storage(format!("connection pool closed in {}", operation))
        }
        other => CajaError::Storage(format!("sqlx error in {}: {}", operation, other)),
    }
}
