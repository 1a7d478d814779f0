//! Postgres-backed persistence gateway.
//!
//! ## Error Mapping
//!
//! | SQLx error | PostgreSQL code | `StoreError` |
//! |------------|-----------------|--------------|
//! | Database (unique violation on `invitation_number`) | `23505` | `NumberTaken` |
//! | Database (other unique violation) | `23505` | `UniqueViolation` |
//! | Database (foreign key / check violation) | `23503` / `23514` | `Corrupt` |
//! | Database (other) | any other | `Backend` |
//! | PoolClosed, Io, Tls, ... | n/a | `Backend` |
//!
//! Units of work are sqlx transactions. `invitation_for_update` takes a row
//! lock (`SELECT ... FOR UPDATE`), so concurrent transitions on the same
//! invitation serialize at the database. A dropped `Transaction` is rolled back
//! by sqlx.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use gatepass_core::{
    AggregateRoot, InvitationId, LocationId, PurposeId, TemplateId, UserId, VisitorId,
};
use gatepass_events::{StoredEvent, UncommittedEvent};
use gatepass_invitations::{Invitation, InvitationNumber, InvitationSnapshot};

use super::records::{LocationRecord, PurposeRecord, TemplateRecord, UserRecord, VisitorRecord};
use super::r#trait::{PersistenceGateway, StoreError, UnitOfWork};

const SCHEMA: &str = include_str!("../../migrations/0001_gatepass.sql");

const SELECT_INVITATION: &str = "SELECT state FROM invitations";

/// Postgres-backed gateway.
#[derive(Debug, Clone)]
pub struct PostgresGateway {
    pool: Arc<PgPool>,
}

impl PostgresGateway {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect using `DATABASE_URL`.
    pub async fn from_env() -> Result<Self, StoreError> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| StoreError::Backend("DATABASE_URL is not set".to_string()))?;
        Self::connect(&url).await
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the tables this gateway needs (idempotent).
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn fetch_invitation(
        &self,
        operation: &str,
        sql: &str,
        bind: InvitationKey<'_>,
    ) -> Result<Option<Invitation>, StoreError> {
        let query = sqlx::query(sql);
        let query = match bind {
            InvitationKey::Id(id) => query.bind(id.get()),
            InvitationKey::Text(text) => query.bind(text),
        };
        let row = query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        row.map(|r| invitation_from_row(&r)).transpose()
    }
}

enum InvitationKey<'a> {
    Id(InvitationId),
    Text(&'a str),
}

#[async_trait]
impl PersistenceGateway for PostgresGateway {
    type Tx = PostgresUnitOfWork;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PostgresUnitOfWork { tx })
    }

    #[instrument(skip(self), fields(invitation_id = %id), err)]
    async fn invitation(&self, id: InvitationId) -> Result<Option<Invitation>, StoreError> {
        self.fetch_invitation(
            "invitation",
            &format!("{SELECT_INVITATION} WHERE id = $1"),
            InvitationKey::Id(id),
        )
        .await
    }

    #[instrument(skip(self), fields(invitation_number = %number), err)]
    async fn invitation_by_number(
        &self,
        number: &InvitationNumber,
    ) -> Result<Option<Invitation>, StoreError> {
        self.fetch_invitation(
            "invitation_by_number",
            &format!("{SELECT_INVITATION} WHERE invitation_number = $1"),
            InvitationKey::Text(number.as_str()),
        )
        .await
    }

    #[instrument(skip(self, payload), err)]
    async fn invitation_by_qr(&self, payload: &str) -> Result<Option<Invitation>, StoreError> {
        self.fetch_invitation(
            "invitation_by_qr",
            &format!("{SELECT_INVITATION} WHERE qr_payload = $1"),
            InvitationKey::Text(payload),
        )
        .await
    }

    async fn number_exists(&self, number: &InvitationNumber) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM invitations WHERE invitation_number = $1)")
            .bind(number.as_str())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("number_exists", e))?;
        row.try_get::<bool, _>(0)
            .map_err(|e| map_sqlx_error("number_exists", e))
    }

    #[instrument(skip(self), fields(invitation_id = %id), err)]
    async fn events(&self, id: InvitationId) -> Result<Vec<StoredEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                invitation_id,
                sequence_number,
                event_type,
                event_version,
                description,
                actor_id,
                occurred_at,
                payload
            FROM invitation_events
            WHERE invitation_id = $1
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("events", e))?;

        let mut events: Vec<StoredEvent> = Vec::with_capacity(rows.len());
        for row in rows {
            let stored = StoredEventRow::from_row(&row)
                .map_err(|e| StoreError::Corrupt(format!("failed to read event row: {e}")))?;
            events.push(stored.try_into()?);
        }
        Ok(events)
    }

    async fn user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query("SELECT id, display_name, role, active FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("user", e))?;
        row.map(|r| user_from_row(&r))
            .transpose()
            .map_err(|e| map_sqlx_error("user", e))
    }

    async fn visitor(&self, id: VisitorId) -> Result<Option<VisitorRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, full_name, email, company, is_vip, visit_count, last_visit_at
            FROM visitors
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("visitor", e))?;
        row.map(|r| visitor_from_row(&r))
            .transpose()
            .map_err(|e| map_sqlx_error("visitor", e))
    }

    async fn purpose(&self, id: PurposeId) -> Result<Option<PurposeRecord>, StoreError> {
        let row = sqlx::query("SELECT id, name FROM visit_purposes WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purpose", e))?;
        row.map(|r| purpose_from_row(&r))
            .transpose()
            .map_err(|e| map_sqlx_error("purpose", e))
    }

    async fn location(&self, id: LocationId) -> Result<Option<LocationRecord>, StoreError> {
        let row = sqlx::query("SELECT id, name, max_capacity FROM locations WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("location", e))?;
        row.map(|r| location_from_row(&r))
            .transpose()
            .map_err(|e| map_sqlx_error("location", e))
    }

    async fn template(&self, id: TemplateId) -> Result<Option<TemplateRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, usage_count, last_used_at FROM invitation_templates WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("template", e))?;
        row.map(|r| template_from_row(&r))
            .transpose()
            .map_err(|e| map_sqlx_error("template", e))
    }

    #[instrument(skip(self), fields(visitor_id = %visitor_id), err)]
    async fn refresh_visitor_statistics(&self, visitor_id: VisitorId) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE visitors
            SET visit_count = stats.visits,
                last_visit_at = stats.last_visit
            FROM (
                SELECT COUNT(*) AS visits, MAX(checked_in_at) AS last_visit
                FROM invitations
                WHERE visitor_id = $1 AND checked_in_at IS NOT NULL
            ) AS stats
            WHERE visitors.id = $1
            "#,
        )
        .bind(visitor_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("refresh_visitor_statistics", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("visitor {visitor_id}")));
        }
        Ok(())
    }
}

/// Unit of work backed by a sqlx transaction.
#[derive(Debug)]
pub struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn next_invitation_id(&mut self) -> Result<InvitationId, StoreError> {
        let row = sqlx::query("SELECT nextval('invitations_id_seq')")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("next_invitation_id", e))?;
        let value: i64 = row
            .try_get(0)
            .map_err(|e| map_sqlx_error("next_invitation_id", e))?;
        InvitationId::new(value).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    #[instrument(skip(self), fields(invitation_id = %id), err)]
    async fn invitation_for_update(
        &mut self,
        id: InvitationId,
    ) -> Result<Option<Invitation>, StoreError> {
        let row = sqlx::query(&format!("{SELECT_INVITATION} WHERE id = $1 FOR UPDATE"))
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("invitation_for_update", e))?;
        row.map(|r| invitation_from_row(&r)).transpose()
    }

    #[instrument(
        skip(self, invitation),
        fields(invitation_id = %invitation.id(), invitation_number = %invitation.number()),
        err
    )]
    async fn insert_invitation(&mut self, invitation: &Invitation) -> Result<(), StoreError> {
        let state = snapshot_json(invitation)?;
        let snapshot = invitation.snapshot();
        sqlx::query(
            r#"
            INSERT INTO invitations (
                id,
                invitation_number,
                status,
                visitor_id,
                qr_payload,
                checked_in_at,
                version,
                state,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(snapshot.id.get())
        .bind(snapshot.number.as_str())
        .bind(snapshot.status.as_str())
        .bind(snapshot.details.visitor_id.as_uuid())
        .bind(snapshot.qr_payload.as_deref())
        .bind(snapshot.checked_in_at)
        .bind(snapshot.version as i64)
        .bind(state)
        .bind(snapshot.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_invitation", e))?;
        Ok(())
    }

    #[instrument(skip(self, invitation), fields(invitation_id = %invitation.id()), err)]
    async fn update_invitation(&mut self, invitation: &Invitation) -> Result<(), StoreError> {
        let state = snapshot_json(invitation)?;
        let snapshot = invitation.snapshot();
        let result = sqlx::query(
            r#"
            UPDATE invitations
            SET status = $2,
                qr_payload = $3,
                checked_in_at = $4,
                version = $5,
                state = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(snapshot.id.get())
        .bind(snapshot.status.as_str())
        .bind(snapshot.qr_payload.as_deref())
        .bind(snapshot.checked_in_at)
        .bind(snapshot.version as i64)
        .bind(state)
        .bind(snapshot.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_invitation", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("invitation {}", snapshot.id)));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(invitation_id = %id), err)]
    async fn delete_invitation(&mut self, id: InvitationId) -> Result<u64, StoreError> {
        // Events first; the FK cascade would also cover it but we want the count.
        let events = sqlx::query("DELETE FROM invitation_events WHERE invitation_id = $1")
            .bind(id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_invitation_events", e))?;

        let result = sqlx::query("DELETE FROM invitations WHERE id = $1")
            .bind(id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_invitation", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("invitation {id}")));
        }
        Ok(events.rows_affected())
    }

    #[instrument(
        skip(self, event),
        fields(invitation_id = %event.invitation_id, event_type = %event.event_type),
        err
    )]
    async fn append_event(&mut self, event: UncommittedEvent) -> Result<StoredEvent, StoreError> {
        // The owning invitation row is locked (or freshly inserted) by this
        // transaction, so MAX + 1 cannot race.
        let row = sqlx::query(
            "SELECT COALESCE(MAX(sequence_number), 0) FROM invitation_events WHERE invitation_id = $1",
        )
        .bind(event.invitation_id.get())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_event", e))?;
        let current: i64 = row
            .try_get(0)
            .map_err(|e| map_sqlx_error("append_event", e))?;
        let next = current as u64 + 1;

        sqlx::query(
            r#"
            INSERT INTO invitation_events (
                event_id,
                invitation_id,
                sequence_number,
                event_type,
                event_version,
                description,
                actor_id,
                occurred_at,
                payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.event_id)
        .bind(event.invitation_id.get())
        .bind(next as i64)
        .bind(&event.event_type)
        .bind(event.event_version as i32)
        .bind(&event.description)
        .bind(event.actor_id.as_uuid())
        .bind(event.occurred_at)
        .bind(&event.payload)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_event", e))?;

        Ok(event.into_stored(next))
    }

    async fn increment_template_usage(
        &mut self,
        template_id: TemplateId,
        used_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE invitation_templates
            SET usage_count = usage_count + 1,
                last_used_at = $2
            WHERE id = $1
            "#,
        )
        .bind(template_id.as_uuid())
        .bind(used_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("increment_template_usage", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("template {template_id}")));
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn snapshot_json(invitation: &Invitation) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(invitation.snapshot())
        .map_err(|e| StoreError::Corrupt(format!("invitation serialization failed: {e}")))
}

fn invitation_from_row(row: &PgRow) -> Result<Invitation, StoreError> {
    let state: serde_json::Value = row
        .try_get("state")
        .map_err(|e| map_sqlx_error("read_invitation", e))?;
    let snapshot: InvitationSnapshot = serde_json::from_value(state)
        .map_err(|e| StoreError::Corrupt(format!("invitation state is unreadable: {e}")))?;
    Invitation::restore(snapshot).map_err(|e| StoreError::Corrupt(e.to_string()))
}

/// Name Postgres gives the `invitation_number TEXT NOT NULL UNIQUE` constraint.
const NUMBER_UNIQUE_CONSTRAINT: &str = "invitations_invitation_number_key";

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") if db_err.constraint() == Some(NUMBER_UNIQUE_CONSTRAINT) => {
                    StoreError::NumberTaken(msg)
                }
                Some("23505") => StoreError::UniqueViolation(msg),
                Some("23503") | Some("23514") => StoreError::Corrupt(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

// SQLx row types

fn user_from_row(r: &PgRow) -> Result<UserRecord, sqlx::Error> {
    Ok(UserRecord {
        id: UserId::from_uuid(r.try_get("id")?),
        display_name: r.try_get("display_name")?,
        role: r.try_get("role")?,
        active: r.try_get("active")?,
    })
}

fn visitor_from_row(r: &PgRow) -> Result<VisitorRecord, sqlx::Error> {
    Ok(VisitorRecord {
        id: VisitorId::from_uuid(r.try_get("id")?),
        full_name: r.try_get("full_name")?,
        email: r.try_get("email")?,
        company: r.try_get("company")?,
        is_vip: r.try_get("is_vip")?,
        visit_count: r.try_get::<i64, _>("visit_count")?.max(0) as u64,
        last_visit_at: r.try_get("last_visit_at")?,
    })
}

fn purpose_from_row(r: &PgRow) -> Result<PurposeRecord, sqlx::Error> {
    Ok(PurposeRecord {
        id: PurposeId::from_uuid(r.try_get("id")?),
        name: r.try_get("name")?,
    })
}

fn location_from_row(r: &PgRow) -> Result<LocationRecord, sqlx::Error> {
    Ok(LocationRecord {
        id: LocationId::from_uuid(r.try_get("id")?),
        name: r.try_get("name")?,
        max_capacity: r
            .try_get::<Option<i32>, _>("max_capacity")?
            .map(|c| c.max(0) as u32),
    })
}

fn template_from_row(r: &PgRow) -> Result<TemplateRecord, sqlx::Error> {
    Ok(TemplateRecord {
        id: TemplateId::from_uuid(r.try_get("id")?),
        name: r.try_get("name")?,
        usage_count: r.try_get::<i64, _>("usage_count")?.max(0) as u64,
        last_used_at: r.try_get("last_used_at")?,
    })
}

#[derive(Debug)]
struct StoredEventRow {
    event_id: uuid::Uuid,
    invitation_id: i64,
    sequence_number: i64,
    event_type: String,
    event_version: i32,
    description: String,
    actor_id: uuid::Uuid,
    occurred_at: DateTime<Utc>,
    payload: Option<serde_json::Value>,
}

impl<'r> FromRow<'r, PgRow> for StoredEventRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEventRow {
            event_id: row.try_get("event_id")?,
            invitation_id: row.try_get("invitation_id")?,
            sequence_number: row.try_get("sequence_number")?,
            event_type: row.try_get("event_type")?,
            event_version: row.try_get("event_version")?,
            description: row.try_get("description")?,
            actor_id: row.try_get("actor_id")?,
            occurred_at: row.try_get("occurred_at")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl TryFrom<StoredEventRow> for StoredEvent {
    type Error = StoreError;

    fn try_from(row: StoredEventRow) -> Result<Self, Self::Error> {
        Ok(StoredEvent {
            event_id: row.event_id,
            invitation_id: InvitationId::new(row.invitation_id)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            sequence_number: row.sequence_number as u64,
            event_type: row.event_type,
            event_version: row.event_version as u32,
            description: row.description,
            actor_id: UserId::from_uuid(row.actor_id),
            occurred_at: row.occurred_at,
            payload: row.payload,
        })
    }
}
