//! `altread-migrate` - apply or revert the schema in `migrations/`.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::migrate::{Migrate, Migrator};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

#[derive(Parser)]
#[command(name = "altread-migrate", about = "manage the altread database schema")]
struct Args {
    /// postgres connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// directory holding the `.up.sql` / `.down.sql` pairs
    #[arg(long, default_value = "./migrations")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// apply pending migrations (all of them unless --steps is given)
    Up {
        #[arg(long)]
        steps: Option<usize>,
    },
    /// revert the most recently applied migrations
    Down {
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },
    /// print the latest applied version
    Version,
    /// list every migration and whether it is applied
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "altread_migrate=info,sqlx=warn".into()),
        )
        .init();

    let args = Args::parse();

    let migrator = Migrator::new(args.dir.clone())
        .await
        .with_context(|| format!("Failed to read migrations from {}", args.dir.display()))?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&args.database_url)
        .await
        .context("Failed to connect to database")?;

    match args.command {
        Command::Up { steps } => up(&migrator, &pool, steps).await?,
        Command::Down { steps } => down(&migrator, &pool, steps).await?,
        Command::Version => match applied_versions(&pool).await?.last() {
            Some(version) => println!("{}", version),
            None => println!("no migrations applied"),
        },
        Command::Status => {
            let applied: HashSet<i64> = applied_versions(&pool).await?.into_iter().collect();
            for migration in migrator.iter().filter(|m| !m.migration_type.is_down_migration()) {
                let state = if applied.contains(&migration.version) {
                    "applied"
                } else {
                    "pending"
                };
                println!("{:>6}  {:<8} {}", migration.version, state, migration.description);
            }
        }
    }

    Ok(())
}

async fn up(migrator: &Migrator, pool: &PgPool, steps: Option<usize>) -> anyhow::Result<()> {
    let Some(steps) = steps else {
        migrator.run(pool).await.context("Migration failed")?;
        info!("All migrations applied");
        return Ok(());
    };

    let applied: HashSet<i64> = applied_versions(pool).await?.into_iter().collect();
    let mut conn = pool.acquire().await?;
    let pending = migrator
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
        .filter(|m| !applied.contains(&m.version))
        .take(steps);

    for migration in pending {
        let elapsed = conn
            .apply(migration)
            .await
            .with_context(|| format!("Failed to apply {}", migration.version))?;
        info!(
            version = migration.version,
            elapsed_ms = elapsed.as_millis() as u64,
            "Applied {}",
            migration.description
        );
    }
    Ok(())
}

async fn down(migrator: &Migrator, pool: &PgPool, steps: usize) -> anyhow::Result<()> {
    let applied = applied_versions(pool).await?;
    if applied.is_empty() || steps == 0 {
        info!("Nothing to revert");
        return Ok(());
    }

    // undo() reverts everything newer than the target
    let keep = applied.len().saturating_sub(steps);
    let target = if keep == 0 { 0 } else { applied[keep - 1] };

    migrator
        .undo(pool, target)
        .await
        .context("Revert failed")?;
    info!(target, "Reverted {} migration(s)", applied.len() - keep);
    Ok(())
}

/// Applied versions in ascending order
async fn applied_versions(pool: &PgPool) -> anyhow::Result<Vec<i64>> {
    let mut conn = pool.acquire().await?;
    conn.ensure_migrations_table().await?;
    let mut versions: Vec<i64> = conn
        .list_applied_migrations()
        .await?
        .into_iter()
        .map(|m| m.version)
        .collect();
    versions.sort_unstable();
    Ok(versions)
}
