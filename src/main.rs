use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use tg_repostbot::app::App;
use tg_repostbot::retry::{Sleeper, TokioSleeper};
use tg_repostbot::telegram::{GrammersConnector, TeloxideBot};
use tg_repostbot::{config, db, http};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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
    let app = Arc::new(App::new(&cfg, pool, connector, bot, sleeper)?);

    if let Err(err) = app.initialize().await {
        error!(?err, "startup failed");
        app.shutdown().await;
        return Err(err);
    }
    info!(port = cfg.app.port, "repost bot ready");

    let res = http::serve(Arc::clone(&app), cfg.app.port).await;
    app.shutdown().await;
    res
}
