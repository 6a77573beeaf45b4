//! Postgres-backed inventory store.
//!
//! Tables: `inventory_items`, `transfer_requests` (queryable columns plus the
//! full row as `body` JSONB) and `item_reservations` (`item_id` primary key, so
//! one holder per item is enforced by the database).
//!
//! ## Atomic conditional write
//!
//! `conditional_update` runs in one transaction: `SET LOCAL lock_timeout`, then
//! `SELECT … FOR UPDATE` on every row an expectation names, then the writes and
//! the reservation release, then commit. A lock wait past the timeout aborts
//! the transaction and surfaces as `StoreError::Timeout`.
//!
//! ## Error mapping
//!
//! | SQLx error | Postgres code | StoreError |
//! |---|---|---|
//! | Database | `23505` unique violation | `Duplicate` |
//! | Database | `55P03` lock not available, `57014` query canceled | `Timeout` |
//! | Database | `40001` serialization failure, `40P01` deadlock | `Unavailable` |
//! | Database | other `23xxx` | `Corrupt` |
//! | PoolTimedOut | n/a | `Timeout` |
//! | RowNotFound | n/a | `NotFound` |
//! | ColumnDecode / Decode | n/a | `Corrupt` |
//! | anything else | n/a | `Unavailable` |
//!
//! ## Change events
//!
//! Row changes are handed to the [`ChangeSink`] right after commit, while the
//! store's commit lock is still held. A writer waiting on a row lock can only
//! commit once the holder has committed, and then waits for the commit lock, so
//! the sink sees writes to the same row in commit order.
//!
//! ## Reservations
//!
//! Items are claimed in sorted order. Two requests overlapping on several items
//! then queue on the same first row, and the loser sees the winner as holder
//! instead of deadlocking.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use lotsync_core::{AggregateRoot, BatchId, TeamId, TransferId, UserId};
use lotsync_events::{EntityType, Mutation};
use lotsync_inventory::{InventoryItem, ItemId, ItemStatus, TransferRequest};

use super::{
    ChangeSink, ConditionalUpdate, Expectation, InventoryStore, ItemQuery, RowWrite, StoreError,
    TransferQuery, UpdateOutcome, Violation, lock_order, row_json,
};

/// DDL for the three tables, idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS inventory_items (
    id           TEXT PRIMARY KEY,
    status       TEXT NOT NULL,
    team_id      UUID NOT NULL,
    batch_id     UUID NOT NULL,
    assigned_to  UUID NULL,
    activated_at TIMESTAMPTZ NULL,
    updated_at   TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS inventory_items_team_idx ON inventory_items (team_id);

CREATE TABLE IF NOT EXISTS transfer_requests (
    id           UUID PRIMARY KEY,
    source_team  UUID NOT NULL,
    dest_team    UUID NOT NULL,
    status       TEXT NOT NULL,
    requester_id UUID NOT NULL,
    version      BIGINT NOT NULL,
    created_at   TIMESTAMPTZ NOT NULL,
    body         JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS transfer_requests_source_idx ON transfer_requests (source_team);
CREATE INDEX IF NOT EXISTS transfer_requests_dest_idx ON transfer_requests (dest_team);

CREATE TABLE IF NOT EXISTS item_reservations (
    item_id     TEXT PRIMARY KEY,
    transfer_id UUID NOT NULL,
    reserved_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS item_reservations_transfer_idx ON item_reservations (transfer_id);
"#;

const ITEM_COLUMNS: &str = "id, status, team_id, batch_id, assigned_to, activated_at, updated_at";

/// One commit at a time, with its change events emitted before the next.
#[derive(Debug, Clone, Default)]
struct CommitOrder(Arc<tokio::sync::Mutex<()>>);

impl CommitOrder {
    async fn commit<T, C, E>(&self, commit: C, emit: E) -> Result<T, StoreError>
    where
        C: Future<Output = Result<T, StoreError>>,
        E: FnOnce(),
    {
        let _turn = self.0.lock().await;
        let out = commit.await?;
        emit();
        Ok(out)
    }
}

/// Postgres-backed [`InventoryStore`].
///
/// The trait is synchronous; each call blocks on the current tokio runtime, so
/// callers on async tasks must go through `spawn_blocking`.
#[derive(Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
    sink: Option<Arc<dyn ChangeSink>>,
    commit_order: CommitOrder,
}

impl core::fmt::Debug for PostgresInventoryStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostgresInventoryStore")
            .field("lock_timeout", &self.lock_timeout)
            .field("has_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout,
            sink: None,
            commit_order: CommitOrder::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Create the tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    fn emit(&self, mutations: Vec<Mutation>) {
        if let Some(sink) = &self.sink {
            for m in mutations {
                sink.record(m);
            }
        }
    }

    async fn commit_and_emit(&self, tx: Transaction<'static, Postgres>, mutations: Vec<Mutation>) -> Result<(), StoreError> {
        self.commit_order
            .commit(
                async move { tx.commit().await.map_err(|e| map_sqlx_error("commit", e)) },
                || self.emit(mutations),
            )
            .await
    }

    fn block_on<F, T>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            StoreError::Unavailable(
                "PostgresInventoryStore requires a tokio runtime context".to_string(),
            )
        })?;
        handle.block_on(fut)
    }

    #[instrument(skip(self), err)]
    pub async fn query_items_async(&self, query: &ItemQuery) -> Result<Vec<InventoryItem>, StoreError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {ITEM_COLUMNS} FROM inventory_items WHERE TRUE"));

        if let Some(team) = query.team_id {
            qb.push(" AND team_id = ").push_bind(Uuid::from(team));
        }
        if let Some(ids) = &query.item_ids {
            let ids: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
            qb.push(" AND id = ANY(").push_bind(ids).push(")");
        }
        if let Some(batch) = query.batch_id {
            qb.push(" AND batch_id = ").push_bind(Uuid::from(batch));
        }
        if let Some(user) = query.assigned_to {
            qb.push(" AND assigned_to = ").push_bind(Uuid::from(user));
        }
        if !query.statuses.is_empty() {
            let statuses: Vec<String> = query.statuses.iter().map(|s| s.as_str().to_string()).collect();
            qb.push(" AND status = ANY(").push_bind(statuses).push(")");
        }
        qb.push(" ORDER BY id");

        let rows = qb
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_items", e))?;

        rows.iter().map(decode_item).collect()
    }

    #[instrument(skip(self, items), fields(item_count = items.len()), err)]
    pub async fn upsert_items_async(&self, items: Vec<InventoryItem>) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        let mut mutations = Vec::with_capacity(items.len());

        for item in &items {
            let old = lock_item(&mut tx, &item.id).await?;
            sqlx::query(
                r#"
                INSERT INTO inventory_items (id, status, team_id, batch_id, assigned_to, activated_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO UPDATE SET
                    status = EXCLUDED.status,
                    team_id = EXCLUDED.team_id,
                    batch_id = EXCLUDED.batch_id,
                    assigned_to = EXCLUDED.assigned_to,
                    activated_at = EXCLUDED.activated_at,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(item.id.as_str())
            .bind(item.status.as_str())
            .bind(Uuid::from(item.team_id))
            .bind(Uuid::from(item.batch_id))
            .bind(item.assigned_to.map(Uuid::from))
            .bind(item.activated_at)
            .bind(item.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("upsert_item", e))?;

            let row = row_json(item)?;
            let entity_id = item.id.to_string();
            mutations.push(match old {
                Some(old) => Mutation::update(EntityType::InventoryItem, entity_id, row, Some(row_json(&old)?)),
                None => Mutation::insert(EntityType::InventoryItem, entity_id, row),
            });
        }

        self.commit_and_emit(tx, mutations).await
    }

    #[instrument(skip(self, items), fields(transfer_id = %transfer, item_count = items.len()), err)]
    pub async fn reserve_async(&self, transfer: TransferId, items: &[ItemId]) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        if let Err(err) = reserve_rows(&mut tx, transfer, items).await {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(err);
        }
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn release_async(&self, transfer: TransferId) -> Result<usize, StoreError> {
        let done = sqlx::query("DELETE FROM item_reservations WHERE transfer_id = $1")
            .bind(Uuid::from(transfer))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("release", e))?;
        Ok(done.rows_affected() as usize)
    }

    pub async fn reservation_holder_async(&self, item: &ItemId) -> Result<Option<TransferId>, StoreError> {
        let holder: Option<Uuid> =
            sqlx::query_scalar("SELECT transfer_id FROM item_reservations WHERE item_id = $1")
                .bind(item.as_str())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("reservation_holder", e))?;
        Ok(holder.map(TransferId::from_uuid))
    }

    #[instrument(skip(self, transfer), fields(transfer_id = %transfer.id_typed()), err)]
    pub async fn insert_transfer_async(&self, transfer: &TransferRequest) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        let body = insert_transfer_row(&mut tx, transfer).await?;
        let inserted = Mutation::insert(EntityType::TransferRequest, transfer.id_typed().to_string(), body);
        self.commit_and_emit(tx, vec![inserted]).await
    }

    /// Reservations and the request row in one transaction.
    #[instrument(
        skip(self, transfer),
        fields(transfer_id = %transfer.id_typed(), item_count = transfer.item_ids().len()),
        err
    )]
    pub async fn open_transfer_async(&self, transfer: &TransferRequest) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        let body = match reserve_rows(&mut tx, transfer.id_typed(), transfer.item_ids()).await {
            Ok(()) => insert_transfer_row(&mut tx, transfer).await,
            Err(err) => Err(err),
        };
        let body = match body {
            Ok(body) => body,
            Err(err) => {
                tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(err);
            }
        };
        let inserted = Mutation::insert(EntityType::TransferRequest, transfer.id_typed().to_string(), body);
        self.commit_and_emit(tx, vec![inserted]).await
    }

    pub async fn get_transfer_async(&self, id: TransferId) -> Result<Option<TransferRequest>, StoreError> {
        let body: Option<JsonValue> = sqlx::query_scalar("SELECT body FROM transfer_requests WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_transfer", e))?;
        body.map(decode_transfer).transpose()
    }

    pub async fn list_transfers_async(&self, query: &TransferQuery) -> Result<Vec<TransferRequest>, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT body FROM transfer_requests WHERE TRUE");
        if let Some(team) = query.team_id {
            let team = Uuid::from(team);
            qb.push(" AND (source_team = ")
                .push_bind(team)
                .push(" OR dest_team = ")
                .push_bind(team)
                .push(")");
        }
        if let Some(status) = query.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(user) = query.requester_id {
            qb.push(" AND requester_id = ").push_bind(Uuid::from(user));
        }
        qb.push(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let bodies: Vec<JsonValue> = qb
            .build_query_scalar()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_transfers", e))?;
        bodies.into_iter().map(decode_transfer).collect()
    }

    #[instrument(
        skip(self, update),
        fields(expectations = update.expect.len(), writes = update.writes.len()),
        err
    )]
    pub async fn conditional_update_async(&self, update: ConditionalUpdate) -> Result<UpdateOutcome, StoreError> {
        let mut tx = self.begin().await?;

        // SET does not take bind parameters; the value is an integer we format.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        for expectation in &update.expect {
            if let Some(violation) = check(&mut tx, expectation).await? {
                tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
                return Ok(UpdateOutcome::Rejected(violation));
            }
        }

        let mut mutations = Vec::with_capacity(update.writes.len());
        for write in &update.writes {
            match write {
                RowWrite::SetItemTeam { item, team } => {
                    let Some(old) = lock_item(&mut tx, item).await? else {
                        tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
                        return Ok(UpdateOutcome::Rejected(Violation::ItemMissing { item: item.clone() }));
                    };
                    let new = old.moved_to(*team, update.at);
                    sqlx::query("UPDATE inventory_items SET team_id = $2, updated_at = $3 WHERE id = $1")
                        .bind(item.as_str())
                        .bind(Uuid::from(*team))
                        .bind(update.at)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_error("set_item_team", e))?;
                    mutations.push(Mutation::update(
                        EntityType::InventoryItem,
                        item.to_string(),
                        row_json(&new)?,
                        Some(row_json(&old)?),
                    ));
                }
                RowWrite::PutTransfer(transfer) => {
                    let id = transfer.id_typed();
                    let old: Option<JsonValue> =
                        sqlx::query_scalar("SELECT body FROM transfer_requests WHERE id = $1 FOR UPDATE")
                            .bind(Uuid::from(id))
                            .fetch_optional(&mut *tx)
                            .await
                            .map_err(|e| map_sqlx_error("lock_transfer", e))?;
                    let old = old.ok_or_else(|| StoreError::NotFound(format!("transfer {id}")))?;
                    let body = row_json(transfer)?;

                    sqlx::query("UPDATE transfer_requests SET status = $2, version = $3, body = $4 WHERE id = $1")
                        .bind(Uuid::from(id))
                        .bind(transfer.status().as_str())
                        .bind(transfer.version() as i64)
                        .bind(&body)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_error("put_transfer", e))?;
                    mutations.push(Mutation::update(
                        EntityType::TransferRequest,
                        id.to_string(),
                        body,
                        Some(old),
                    ));
                }
            }
        }

        if let Some(holder) = update.release {
            sqlx::query("DELETE FROM item_reservations WHERE transfer_id = $1")
                .bind(Uuid::from(holder))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("release", e))?;
        }

        self.commit_and_emit(tx, mutations).await?;
        Ok(UpdateOutcome::Applied)
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

/// Claim `items` for `transfer` inside `tx`, in sorted order.
async fn reserve_rows(
    tx: &mut Transaction<'_, Postgres>,
    transfer: TransferId,
    items: &[ItemId],
) -> Result<(), StoreError> {
    for item in lock_order(items) {
        // The no-op update makes the statement wait for (and then return)
        // a concurrent holder instead of silently skipping the row.
        let holder: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO item_reservations (item_id, transfer_id)
            VALUES ($1, $2)
            ON CONFLICT (item_id) DO UPDATE SET transfer_id = item_reservations.transfer_id
            RETURNING transfer_id
            "#,
        )
        .bind(item.as_str())
        .bind(Uuid::from(transfer))
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("reserve", e))?;

        if holder != Uuid::from(transfer) {
            return Err(StoreError::ReservationConflict {
                item,
                holder: TransferId::from_uuid(holder),
            });
        }
    }
    Ok(())
}

/// Insert the request row; returns its body for the change event.
async fn insert_transfer_row(
    tx: &mut Transaction<'_, Postgres>,
    transfer: &TransferRequest,
) -> Result<JsonValue, StoreError> {
    let body = row_json(transfer)?;
    sqlx::query(
        r#"
        INSERT INTO transfer_requests (id, source_team, dest_team, status, requester_id, version, created_at, body)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(Uuid::from(transfer.id_typed()))
    .bind(Uuid::from(transfer.source_team()))
    .bind(Uuid::from(transfer.dest_team()))
    .bind(transfer.status().as_str())
    .bind(Uuid::from(transfer.requester_id()))
    .bind(transfer.version() as i64)
    .bind(transfer.created_at())
    .bind(&body)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_transfer", e))?;
    Ok(body)
}

async fn lock_item(
    tx: &mut Transaction<'_, Postgres>,
    item: &ItemId,
) -> Result<Option<InventoryItem>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {ITEM_COLUMNS} FROM inventory_items WHERE id = $1 FOR UPDATE"
    ))
    .bind(item.as_str())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_item", e))?;
    row.as_ref().map(decode_item).transpose()
}

async fn check(
    tx: &mut Transaction<'_, Postgres>,
    expectation: &Expectation,
) -> Result<Option<Violation>, StoreError> {
    match expectation {
        Expectation::ItemOwnedBy { item, team } => {
            let actual: Option<Uuid> =
                sqlx::query_scalar("SELECT team_id FROM inventory_items WHERE id = $1 FOR UPDATE")
                    .bind(item.as_str())
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(|e| map_sqlx_error("check_owner", e))?;
            Ok(match actual.map(TeamId::from_uuid) {
                None => Some(Violation::ItemMissing { item: item.clone() }),
                Some(actual) if actual != *team => Some(Violation::ItemOwnership {
                    item: item.clone(),
                    expected: *team,
                    actual,
                }),
                Some(_) => None,
            })
        }
        Expectation::ItemReservedBy { item, transfer } => {
            let actual: Option<Uuid> =
                sqlx::query_scalar("SELECT transfer_id FROM item_reservations WHERE item_id = $1 FOR UPDATE")
                    .bind(item.as_str())
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(|e| map_sqlx_error("check_reservation", e))?;
            let actual = actual.map(TransferId::from_uuid);
            Ok((actual != Some(*transfer)).then(|| Violation::Reservation {
                item: item.clone(),
                expected: *transfer,
                actual,
            }))
        }
        Expectation::TransferAt { transfer, version } => {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM transfer_requests WHERE id = $1 FOR UPDATE")
                    .bind(Uuid::from(*transfer))
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(|e| map_sqlx_error("check_version", e))?;
            let actual = actual.map(|v| v as u64);
            Ok((actual != Some(*version)).then_some(Violation::TransferVersion {
                transfer: *transfer,
                expected: *version,
                actual,
            }))
        }
    }
}

impl InventoryStore for PostgresInventoryStore {
    fn query_items(&self, query: &ItemQuery) -> Result<Vec<InventoryItem>, StoreError> {
        self.block_on(self.query_items_async(query))
    }

    fn upsert_items(&self, items: Vec<InventoryItem>) -> Result<(), StoreError> {
        self.block_on(self.upsert_items_async(items))
    }

    fn reserve(&self, transfer: TransferId, items: &[ItemId]) -> Result<(), StoreError> {
        self.block_on(self.reserve_async(transfer, items))
    }

    fn release(&self, transfer: TransferId) -> Result<usize, StoreError> {
        self.block_on(self.release_async(transfer))
    }

    fn reservation_holder(&self, item: &ItemId) -> Result<Option<TransferId>, StoreError> {
        self.block_on(self.reservation_holder_async(item))
    }

    fn insert_transfer(&self, transfer: &TransferRequest) -> Result<(), StoreError> {
        self.block_on(self.insert_transfer_async(transfer))
    }

    fn open_transfer(&self, transfer: &TransferRequest) -> Result<(), StoreError> {
        self.block_on(self.open_transfer_async(transfer))
    }

    fn get_transfer(&self, id: TransferId) -> Result<Option<TransferRequest>, StoreError> {
        self.block_on(self.get_transfer_async(id))
    }

    fn list_transfers(&self, query: &TransferQuery) -> Result<Vec<TransferRequest>, StoreError> {
        self.block_on(self.list_transfers_async(query))
    }

    fn conditional_update(&self, update: ConditionalUpdate) -> Result<UpdateOutcome, StoreError> {
        self.block_on(self.conditional_update_async(update))
    }
}

// SQLx row types

#[derive(Debug)]
struct ItemRow {
    id: String,
    status: String,
    team_id: Uuid,
    batch_id: Uuid,
    assigned_to: Option<Uuid>,
    activated_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ItemRow {
            id: row.try_get("id")?,
            status: row.try_get("status")?,
            team_id: row.try_get("team_id")?,
            batch_id: row.try_get("batch_id")?,
            assigned_to: row.try_get("assigned_to")?,
            activated_at: row.try_get("activated_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<ItemRow> for InventoryItem {
    type Error = StoreError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        let id = ItemId::parse(&row.id).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let status: ItemStatus = row
            .status
            .parse()
            .map_err(|e: lotsync_core::DomainError| StoreError::Corrupt(e.to_string()))?;
        Ok(InventoryItem {
            id,
            status,
            team_id: TeamId::from_uuid(row.team_id),
            batch_id: BatchId::from_uuid(row.batch_id),
            assigned_to: row.assigned_to.map(UserId::from_uuid),
            activated_at: row.activated_at,
            updated_at: row.updated_at,
        })
    }
}

fn decode_item(row: &PgRow) -> Result<InventoryItem, StoreError> {
    ItemRow::from_row(row)
        .map_err(|e| StoreError::Corrupt(format!("failed to decode item row: {e}")))?
        .try_into()
}

fn decode_transfer(body: JsonValue) -> Result<TransferRequest, StoreError> {
    serde_json::from_value(body).map_err(|e| StoreError::Corrupt(format!("failed to decode transfer row: {e}")))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                Some("55P03") | Some("57014") => StoreError::Timeout(msg),
                Some("40001") | Some("40P01") => StoreError::Unavailable(msg),
                Some(code) if code.starts_with("23") => StoreError::Corrupt(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolTimedOut => StoreError::Timeout(format!("connection pool timed out in {operation}")),
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("unexpected row not found in {operation}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode error in {operation}: {err}"))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}
