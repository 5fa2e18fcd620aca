//! Postwise Background Worker
//!
//! Handles scheduled jobs including:
//! - Nightly billing re-sync for users with a billing customer (3:15 UTC)
//! - Hourly consistency sweep over accounts active this month
//! - Daily accounting self-test (4:30 UTC)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use postwise_entitlement::{ConsistencyInspector, EntitlementEngine};
use postwise_shared::YearMonth;
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

/// Re-sync every user who has a stored billing customer. Failures are
/// per-user: one unreachable provider call never aborts the sweep.
async fn run_billing_resync(engine: &EntitlementEngine, pool: &sqlx::PgPool) {
    let Some(sync) = engine.sync.as_ref() else {
        info!("Billing re-sync skipped (Stripe not configured)");
        return;
    };

    let users: Vec<(Uuid,)> = match sqlx::query_as(
        "SELECT user_id FROM subscriptions WHERE stripe_customer_id IS NOT NULL",
    )
    .fetch_all(pool)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "Billing re-sync: failed to list users");
            return;
        }
    };

    let mut synced = 0usize;
    let mut failed = 0usize;
    for (user_id,) in users {
        match sync.sync(user_id).await {
            Ok(_) => {
                engine.cache.invalidate(user_id).await;
                synced += 1;
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Billing re-sync failed for user");
                failed += 1;
            }
        }
        // Gentle pacing against provider rate limits.
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    info!(synced = synced, failed = failed, "Billing re-sync cycle complete");
}

/// Inspect every account with usage this month and log inconsistencies.
async fn run_consistency_sweep(inspector: &ConsistencyInspector, pool: &sqlx::PgPool) {
    let ym = YearMonth::current();
    let users: Vec<(Uuid,)> =
        match sqlx::query_as("SELECT user_id FROM usage_counters WHERE ym = $1")
            .bind(ym.key())
            .fetch_all(pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Consistency sweep: failed to list users");
                return;
            }
        };

    let mut checked = 0usize;
    let mut flagged = 0usize;
    for (user_id,) in users {
        match inspector.inspect(user_id).await {
            Ok(report) => {
                checked += 1;
                if !ConsistencyInspector::is_clean(&report) {
                    flagged += 1;
                    error!(
                        user_id = %user_id,
                        mismatch_spent = report.mismatch_spent,
                        wallet_vs_ledger = ?report.wallet_vs_ledger,
                        "Consistency sweep found a discrepancy"
                    );
                }
            }
            Err(e) => warn!(user_id = %user_id, error = %e, "Inspection failed"),
        }
    }

    info!(checked = checked, flagged = flagged, "Consistency sweep complete");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Postwise Worker");

    let pool = create_db_pool().await?;
    let engine = Arc::new(EntitlementEngine::from_env(pool.clone()));

    let scheduler = JobScheduler::new().await?;

    // Job 1: Nightly billing re-sync at 3:15 UTC
    let resync_engine = engine.clone();
    let resync_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 15 3 * * *", move |_uuid, _l| {
            let engine = resync_engine.clone();
            let pool = resync_pool.clone();
            Box::pin(async move {
                info!("Running nightly billing re-sync");
                run_billing_resync(&engine, &pool).await;
            })
        })?)
        .await?;
    info!("Scheduled: Billing re-sync (nightly at 3:15 UTC)");

    // Job 2: Hourly consistency sweep
    let sweep_engine = engine.clone();
    let sweep_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 40 * * * *", move |_uuid, _l| {
            let engine = sweep_engine.clone();
            let pool = sweep_pool.clone();
            Box::pin(async move {
                info!("Running hourly consistency sweep");
                run_consistency_sweep(&engine.inspector, &pool).await;
            })
        })?)
        .await?;
    info!("Scheduled: Consistency sweep (hourly)");

    // Job 3: Daily accounting self-test at 4:30 UTC
    let selftest_engine = engine.clone();
    scheduler
        .add(Job::new_async("0 30 4 * * *", move |_uuid, _l| {
            let engine = selftest_engine.clone();
            Box::pin(async move {
                info!("Running daily accounting self-test");
                let summary = engine.selftest.run_all().await;
                if !summary.healthy {
                    error!(
                        failed = summary.checks_failed,
                        "Accounting self-test reported failures"
                    );
                }
            })
        })?)
        .await?;
    info!("Scheduled: Accounting self-test (daily at 4:30 UTC)");

    // Job 4: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    scheduler.start().await?;

    // Keep the process alive; jobs run on the scheduler's timers.
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
