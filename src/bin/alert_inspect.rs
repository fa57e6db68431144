//! Dump the persisted alert database in a readable form.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use sync_alerts::{config, db, persist, AlertStore};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
    /// Override the database URL (defaults to <data_dir>/alerts.db)
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let database_url = args
        .database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| format!("sqlite://{}/alerts.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let mut store = AlertStore::new(cfg.flags, cfg.app.max_alerts);
    let restored = persist::load_store(&pool, &mut store).await?;
    println!("{restored} alert(s) restored from {database_url}");

    for alert in store.alerts() {
        println!(
            "#{:<5} {:<6} ts={} actor={:#x} email={:<30} relevant={} seen={}",
            alert.id,
            alert.alert_type().as_str(),
            alert.timestamp,
            alert.user,
            if alert.email.is_empty() { "-" } else { alert.email.as_str() },
            alert.relevant,
            alert.seen,
        );
    }
    Ok(())
}
