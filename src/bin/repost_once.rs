use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use tg_repostbot::app::{App, TriggerOutcome};
use tg_repostbot::retry::{Sleeper, TokioSleeper};
use tg_repostbot::telegram::{GrammersConnector, TeloxideBot};
use tg_repostbot::{config, db};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Publish one random backlog post and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Skip the user client; posts are copied without an existence check.
    #[arg(long)]
    bot_only: bool,
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
    cfg.ensure_dirs()?;

    let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
    let pool = db::init_pool(&cfg.database_url(), &cfg.retry_policy(), sleeper.as_ref()).await?;
    db::run_migrations(&pool).await?;

    let connector = Arc::new(GrammersConnector::new(
        cfg.telegram.api_id,
        cfg.telegram.api_hash.clone(),
    ));
    let bot = Arc::new(TeloxideBot::new(cfg.telegram.bot_token.clone()));
    let app = App::new(&cfg, pool, connector, bot, sleeper)?;

    let res = async {
        if !args.bot_only {
            app.session().start().await?;
        }
        app.trigger_repost().await
    }
    .await;
    app.shutdown().await;

    match res? {
        TriggerOutcome::Published(message_id) => info!(message_id, "reposted"),
        TriggerOutcome::Skipped => info!("backlog is empty"),
        TriggerOutcome::Busy => info!("repost already in progress"),
    }
    Ok(())
}
