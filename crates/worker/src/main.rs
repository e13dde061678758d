use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tradeassist_core::context::{Clock, RequestContext, SystemClock};
use tradeassist_core::risk::ConfirmationFlow;
use tradeassist_core::storage::{self, lock, PgConfirmationRepository};

mod reindex;

#[derive(Debug, Parser)]
#[command(name = "tradeassist_worker")]
struct Args {
    /// Do everything except writing to the database.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    job: Job,
}

#[derive(Debug, Subcommand)]
enum Job {
    /// Marks pending trade confirmations past their expiry as EXPIRED.
    CleanupConfirmations,
    /// Re-embeds every message of one session.
    ReindexSession {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        session_id: String,
        /// Concurrent embedding workers.
        #[arg(long, default_value_t = reindex::DEFAULT_WORKERS)]
        workers: usize,
    },
    /// Deletes every stored embedding of a conversation.
    PurgeConversation {
        #[arg(long)]
        conversation_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = tradeassist_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let db_url = settings.require_database_url()?;
    let pool = storage::connect(db_url).await?;
    storage::migrate(&pool).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ctx = RequestContext::background();

    let res = match args.job {
        Job::CleanupConfirmations => cleanup_confirmations(&ctx, &pool, clock, args.dry_run).await,
        Job::ReindexSession {
            user_id,
            session_id,
            workers,
        } => {
            reindex::run(
                &ctx,
                &settings,
                &pool,
                clock,
                reindex::Target { user_id, session_id },
                workers,
                args.dry_run,
            )
            .await
        }
        Job::PurgeConversation { conversation_id } => {
            purge_conversation(&ctx, &pool, clock, &conversation_id, args.dry_run).await
        }
    };

    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "worker job failed");
    }
    res
}

async fn cleanup_confirmations(
    ctx: &RequestContext,
    pool: &sqlx::PgPool,
    clock: Arc<dyn Clock>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let Some(job_lock) = lock::try_acquire_job_lock(pool, lock::CONFIRMATION_SWEEP).await? else {
        tracing::warn!("confirmation sweep lock not acquired; another run in progress");
        return Ok(());
    };

    let res = async {
        if dry_run {
            let due: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM trade_confirmations WHERE status = 'PENDING' AND expires_at < $1",
            )
            .bind(clock.now())
            .fetch_one(pool)
            .await
            .context("count expired trade_confirmations failed")?;
            tracing::info!(due, dry_run = true, "confirmation sweep");
            return Ok(());
        }
        let flow = ConfirmationFlow::new(Arc::new(PgConfirmationRepository::new(pool.clone())), clock);
        let expired = flow.cleanup_expired_confirmations(ctx).await?;
        tracing::info!(expired, "confirmation sweep finished");
        anyhow::Ok(())
    }
    .await;

    if let Err(err) = job_lock.release().await {
        tracing::warn!(error = %format!("{err:#}"), "failed to release confirmation sweep lock");
    }
    res
}

async fn purge_conversation(
    ctx: &RequestContext,
    pool: &sqlx::PgPool,
    clock: Arc<dyn Clock>,
    conversation_id: &str,
    dry_run: bool,
) -> anyhow::Result<()> {
    use tradeassist_core::embeddings::VectorStore;

    let store = storage::PgVectorStore::new(pool.clone(), clock);
    if dry_run {
        let stored = store.get_embeddings_by_conversation(ctx, conversation_id).await?;
        tracing::info!(%conversation_id, stored = stored.len(), dry_run = true, "conversation purge");
        return Ok(());
    }
    let removed = store.delete_embeddings_by_conversation(ctx, conversation_id).await?;
    tracing::info!(%conversation_id, removed, "conversation purged");
    Ok(())
}

fn init_sentry(settings: &tradeassist_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
