use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vivid_worker::collaborators::simulated::{
    LoggingStore, SimulatedImageGenerator, SimulatedMailer, SimulatedModelTrainer,
};
use vivid_worker::{JobKind, JobSystem, QueueOptions, ReqwestWebhookTransport};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

/// Runs the Vivid Studios AI background workers.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[arg(long, env = "VIVID_WORKER_SCHEMA", default_value = "vivid_worker")]
    schema: String,

    /// Jobs run at the same time, per queue
    #[arg(long, env = "VIVID_WORKER_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    #[arg(
        long,
        env = "VIVID_WORKER_POLL_INTERVAL_MS",
        default_value_t = 1000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    poll_interval_ms: u64,

    #[arg(long, env = "VIVID_WORKER_MAX_PG_CONN", default_value_t = 20)]
    max_pg_conn: u32,

    /// Queues to serve, comma separated. Defaults to all of them.
    #[arg(long, env = "VIVID_WORKER_QUEUES", value_delimiter = ',')]
    queues: Vec<JobKind>,

    /// Process the jobs available now, then exit
    #[arg(long)]
    once: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

fn init_logging(format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.log_format);

    anyhow::ensure!(args.concurrency > 0, "concurrency must be greater than 0");

    let backend = QueueOptions::default()
        .database_url(&args.database_url)
        .schema(&args.schema)
        .max_pg_conn(args.max_pg_conn)
        .init()
        .await
        .context("Failed to initialize the queue store")?;

    let queues = if args.queues.is_empty() {
        JobKind::ALL.to_vec()
    } else {
        args.queues.clone()
    };

    let mut builder = JobSystem::builder(backend)
        .queues(queues.iter().copied())
        .poll_interval(Duration::from_millis(args.poll_interval_ms))
        .image_generation_processor(SimulatedImageGenerator::default(), LoggingStore)
        .training_processor(SimulatedModelTrainer::default(), LoggingStore)
        .email_processor(SimulatedMailer::default())
        .webhook_processor(ReqwestWebhookTransport::new()?);
    for kind in &queues {
        builder = builder.concurrency(*kind, args.concurrency);
    }
    let system = builder.build()?;

    if args.once {
        system.run_once().await?;
        info!("All available jobs processed");
    } else {
        system.run().await?;
    }

    Ok(())
}
