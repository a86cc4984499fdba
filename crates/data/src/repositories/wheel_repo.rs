//! Wheel cycle repository.
//!
//! Every transition is written in one transaction: cycle write, leg
//! upserts and the activity insert commit or roll back together.
//!
//! Writers are serialized on the cycle row. A change is only accepted if it
//! was computed from the stored revision and every leg it closes is still
//! open, so a second engine acting on stale state fails instead of
//! double-booking the transition.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    ActivityAction, ActivityRecord, CloseReason, LegAction, LegType, WheelChange, WheelCycle,
    WheelLeg, WheelPhase,
};

/// Schema for the wheel tables.
pub const WHEEL_SCHEMA: &str = include_str!("../../migrations/0001_wheel.sql");

// =============================================================================
// Row types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct CycleRow {
    id: Uuid,
    symbol: String,
    status: String,
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
    shares_owned: i64,
    share_cost_basis: Decimal,
    total_csp_premium: Decimal,
    total_cc_premium: Decimal,
    total_premium_collected: Decimal,
    assignment_date: Option<DateTime<Utc>>,
    assignment_price: Option<Decimal>,
    called_away_date: Option<DateTime<Utc>>,
    called_away_price: Option<Decimal>,
    realized_pnl: Decimal,
    revision: i64,
}

impl TryFrom<CycleRow> for WheelCycle {
    type Error = anyhow::Error;

    fn try_from(row: CycleRow) -> Result<Self> {
        let phase = WheelPhase::parse(&row.status)
            .ok_or_else(|| anyhow!("unknown wheel status '{}' for cycle {}", row.status, row.id))?;
        Ok(Self {
            id: row.id,
            symbol: row.symbol,
            phase,
            start_date: row.start_date,
            end_date: row.end_date,
            shares_owned: row.shares_owned,
            share_cost_basis: row.share_cost_basis,
            total_csp_premium: row.total_csp_premium,
            total_cc_premium: row.total_cc_premium,
            total_premium_collected: row.total_premium_collected,
            assignment_date: row.assignment_date,
            assignment_price: row.assignment_price,
            called_away_date: row.called_away_date,
            called_away_price: row.called_away_price,
            realized_pnl: row.realized_pnl,
            revision: row.revision,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LegRow {
    id: Uuid,
    cycle_id: Uuid,
    leg_type: String,
    action: String,
    strike: Decimal,
    expiration_date: NaiveDate,
    contracts: i32,
    premium_received: Decimal,
    premium_paid: Option<Decimal>,
    open_date: DateTime<Utc>,
    close_date: Option<DateTime<Utc>>,
    close_reason: Option<String>,
    underlying_price_at_open: Decimal,
    underlying_price_at_close: Option<Decimal>,
    delta_at_open: Option<Decimal>,
    dte_at_open: i32,
}

impl TryFrom<LegRow> for WheelLeg {
    type Error = anyhow::Error;

    fn try_from(row: LegRow) -> Result<Self> {
        let leg_type = LegType::parse(&row.leg_type)
            .ok_or_else(|| anyhow!("unknown leg type '{}' for leg {}", row.leg_type, row.id))?;
        let action = LegAction::parse(&row.action)
            .ok_or_else(|| anyhow!("unknown leg action '{}' for leg {}", row.action, row.id))?;
        let close_reason = match row.close_reason.as_deref() {
            Some(s) => Some(
                CloseReason::parse(s)
                    .ok_or_else(|| anyhow!("unknown close reason '{s}' for leg {}", row.id))?,
            ),
            None => None,
        };
        Ok(Self {
            id: row.id,
            cycle_id: row.cycle_id,
            leg_type,
            action,
            strike: row.strike,
            expiration_date: row.expiration_date,
            contracts: row.contracts,
            premium_received: row.premium_received,
            premium_paid: row.premium_paid,
            open_date: row.open_date,
            close_date: row.close_date,
            close_reason,
            underlying_price_at_open: row.underlying_price_at_open,
            underlying_price_at_close: row.underlying_price_at_close,
            delta_at_open: row.delta_at_open,
            dte_at_open: row.dte_at_open,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ActivityRow {
    id: Uuid,
    cycle_id: Uuid,
    leg_id: Option<Uuid>,
    action: String,
    description: String,
    premium_impact: Decimal,
    pnl_impact: Decimal,
    underlying_price: Decimal,
    option_price: Option<Decimal>,
    timestamp: DateTime<Utc>,
}

impl TryFrom<ActivityRow> for ActivityRecord {
    type Error = anyhow::Error;

    fn try_from(row: ActivityRow) -> Result<Self> {
        let action = ActivityAction::parse(&row.action)
            .ok_or_else(|| anyhow!("unknown activity action '{}' for {}", row.action, row.id))?;
        Ok(Self {
            id: row.id,
            cycle_id: row.cycle_id,
            leg_id: row.leg_id,
            action,
            description: row.description,
            premium_impact: row.premium_impact,
            pnl_impact: row.pnl_impact,
            underlying_price: row.underlying_price,
            option_price: row.option_price,
            timestamp: row.timestamp,
        })
    }
}

const CYCLE_COLUMNS: &str = "id, symbol, status, start_date, end_date, shares_owned, \
     share_cost_basis, total_csp_premium, total_cc_premium, total_premium_collected, \
     assignment_date, assignment_price, called_away_date, called_away_price, realized_pnl, revision";

const LEG_COLUMNS: &str = "id, cycle_id, leg_type, action, strike, expiration_date, contracts, \
     premium_received, premium_paid, open_date, close_date, close_reason, \
     underlying_price_at_open, underlying_price_at_close, delta_at_open, dte_at_open";

const ACTIVITY_COLUMNS: &str = "id, cycle_id, leg_id, action, description, premium_impact, \
     pnl_impact, underlying_price, option_price, timestamp";

// =============================================================================
// Repository
// =============================================================================

/// Repository for wheel cycles, legs and activity.
#[derive(Debug, Clone)]
pub struct WheelRepository {
    pool: PgPool,
}

impl WheelRepository {
    /// Creates a new repository instance.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool and wraps it.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to wheel database")?;
        Ok(Self::new(pool))
    }

    /// Creates the wheel tables if they do not exist.
    ///
    /// # Errors
    /// Returns an error if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(WHEEL_SCHEMA)
            .execute(&self.pool)
            .await
            .context("failed to create wheel schema")?;
        Ok(())
    }

    /// Writes one transition atomically.
    ///
    /// # Errors
    /// Returns an error if any statement fails, if the stored cycle is not at
    /// the change's predecessor revision, or if a leg it closes is already
    /// closed; nothing is committed then.
    pub async fn apply(&self, change: &WheelChange) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        write_cycle(&mut tx, &change.cycle).await?;
        for leg in &change.legs {
            upsert_leg(&mut tx, leg).await?;
        }
        insert_activity(&mut tx, &change.activity).await?;

        tx.commit()
            .await
            .with_context(|| format!("failed to commit wheel change for {}", change.cycle.id))?;

        debug!(
            cycle_id = %change.cycle.id,
            action = %change.activity.action,
            legs = change.legs.len(),
            "Wheel change persisted"
        );
        Ok(())
    }

    /// Gets a cycle by ID.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn load_cycle(&self, id: Uuid) -> Result<Option<WheelCycle>> {
        let row = sqlx::query_as::<_, CycleRow>(&format!(
            "SELECT {CYCLE_COLUMNS} FROM wheel_cycles WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WheelCycle::try_from).transpose()
    }

    /// Legs of a cycle in opening order.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn legs(&self, cycle_id: Uuid) -> Result<Vec<WheelLeg>> {
        let rows = sqlx::query_as::<_, LegRow>(&format!(
            "SELECT {LEG_COLUMNS} FROM wheel_legs WHERE cycle_id = $1 ORDER BY open_date ASC, id ASC"
        ))
        .bind(cycle_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WheelLeg::try_from).collect()
    }

    /// Activity log of a cycle, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn activity(&self, cycle_id: Uuid) -> Result<Vec<ActivityRecord>> {
        let rows = sqlx::query_as::<_, ActivityRow>(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM wheel_activity_log WHERE cycle_id = $1 ORDER BY timestamp ASC"
        ))
        .bind(cycle_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ActivityRecord::try_from).collect()
    }

    /// Non-terminal cycles, optionally for one symbol.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn open_cycles(&self, symbol: Option<&str>) -> Result<Vec<WheelCycle>> {
        let rows = sqlx::query_as::<_, CycleRow>(&format!(
            "SELECT {CYCLE_COLUMNS} FROM wheel_cycles \
             WHERE status NOT IN ('called_away', 'closed') \
               AND ($1::TEXT IS NULL OR symbol = $1) \
             ORDER BY start_date ASC"
        ))
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WheelCycle::try_from).collect()
    }

    /// Deletes a cycle with its legs and activity. Reset tooling only;
    /// cycles are append-only history in normal operation.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn delete_cycle(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM wheel_activity_log WHERE cycle_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM wheel_legs WHERE cycle_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM wheel_cycles WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        warn!(cycle_id = %id, deleted = deleted > 0, "Wheel cycle deleted");
        Ok(deleted > 0)
    }
}

async fn write_cycle(tx: &mut Transaction<'_, Postgres>, cycle: &WheelCycle) -> Result<()> {
    if cycle.revision == 0 {
        return insert_cycle(tx, cycle).await;
    }

    // The row lock taken here holds concurrent writers until we commit
    let updated = sqlx::query(
        r#"
        UPDATE wheel_cycles SET
            status = $2,
            end_date = $3,
            shares_owned = $4,
            share_cost_basis = $5,
            total_csp_premium = $6,
            total_cc_premium = $7,
            total_premium_collected = $8,
            assignment_date = $9,
            assignment_price = $10,
            called_away_date = $11,
            called_away_price = $12,
            realized_pnl = $13,
            revision = $14
        WHERE id = $1 AND revision = $15
        "#,
    )
    .bind(cycle.id)
    .bind(cycle.phase.as_str())
    .bind(cycle.end_date)
    .bind(cycle.shares_owned)
    .bind(cycle.share_cost_basis)
    .bind(cycle.total_csp_premium)
    .bind(cycle.total_cc_premium)
    .bind(cycle.total_premium_collected)
    .bind(cycle.assignment_date)
    .bind(cycle.assignment_price)
    .bind(cycle.called_away_date)
    .bind(cycle.called_away_price)
    .bind(cycle.realized_pnl)
    .bind(cycle.revision)
    .bind(cycle.revision - 1)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("failed to update wheel cycle {}", cycle.id))?
    .rows_affected();

    expect_one_row(updated, || {
        format!(
            "wheel cycle {} is not at revision {}; it was changed concurrently or does not exist",
            cycle.id,
            cycle.revision - 1
        )
    })
}

async fn insert_cycle(tx: &mut Transaction<'_, Postgres>, cycle: &WheelCycle) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO wheel_cycles
            (id, symbol, status, start_date, end_date, shares_owned, share_cost_basis,
             total_csp_premium, total_cc_premium, total_premium_collected,
             assignment_date, assignment_price, called_away_date, called_away_price,
             realized_pnl, revision)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
    )
    .bind(cycle.id)
    .bind(&cycle.symbol)
    .bind(cycle.phase.as_str())
    .bind(cycle.start_date)
    .bind(cycle.end_date)
    .bind(cycle.shares_owned)
    .bind(cycle.share_cost_basis)
    .bind(cycle.total_csp_premium)
    .bind(cycle.total_cc_premium)
    .bind(cycle.total_premium_collected)
    .bind(cycle.assignment_date)
    .bind(cycle.assignment_price)
    .bind(cycle.called_away_date)
    .bind(cycle.called_away_price)
    .bind(cycle.realized_pnl)
    .bind(cycle.revision)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("failed to insert wheel cycle {}", cycle.id))?;
    Ok(())
}

fn expect_one_row(rows_affected: u64, conflict: impl FnOnce() -> String) -> Result<()> {
    if rows_affected == 1 {
        Ok(())
    } else {
        Err(anyhow!(conflict()))
    }
}

/// Close fields are written only while still unset, so a leg closes once;
/// closing an already-closed leg fails the transaction.
async fn upsert_leg(tx: &mut Transaction<'_, Postgres>, leg: &WheelLeg) -> Result<()> {
    let written = sqlx::query(
        r#"
        INSERT INTO wheel_legs
            (id, cycle_id, leg_type, action, strike, expiration_date, contracts,
             premium_received, premium_paid, open_date, close_date, close_reason,
             underlying_price_at_open, underlying_price_at_close, delta_at_open, dte_at_open)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (id) DO UPDATE SET
            premium_paid = EXCLUDED.premium_paid,
            close_date = EXCLUDED.close_date,
            close_reason = EXCLUDED.close_reason,
            underlying_price_at_close = EXCLUDED.underlying_price_at_close
        WHERE wheel_legs.close_date IS NULL
        "#,
    )
    .bind(leg.id)
    .bind(leg.cycle_id)
    .bind(leg.leg_type.as_str())
    .bind(leg.action.as_str())
    .bind(leg.strike)
    .bind(leg.expiration_date)
    .bind(leg.contracts)
    .bind(leg.premium_received)
    .bind(leg.premium_paid)
    .bind(leg.open_date)
    .bind(leg.close_date)
    .bind(leg.close_reason.map(|r| r.as_str()))
    .bind(leg.underlying_price_at_open)
    .bind(leg.underlying_price_at_close)
    .bind(leg.delta_at_open)
    .bind(leg.dte_at_open)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("failed to upsert wheel leg {}", leg.id))?
    .rows_affected();

    expect_one_row(written, || format!("wheel leg {} is already closed", leg.id))
}

async fn insert_activity(
    tx: &mut Transaction<'_, Postgres>,
    record: &ActivityRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO wheel_activity_log
            (id, cycle_id, leg_id, action, description, premium_impact, pnl_impact,
             underlying_price, option_price, timestamp)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(record.id)
    .bind(record.cycle_id)
    .bind(record.leg_id)
    .bind(record.action.as_str())
    .bind(&record.description)
    .bind(record.premium_impact)
    .bind(record.pnl_impact)
    .bind(record.underlying_price)
    .bind(record.option_price)
    .bind(record.timestamp)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("failed to insert activity for cycle {}", record.cycle_id))?;
    Ok(())
}
