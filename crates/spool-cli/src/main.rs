mod demo;
mod settings;
mod trace;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use spool_core::Broker;
use spool_core::app::Services;
use spool_core::impls::MemoryStore;
use tracing::{info, warn};

use crate::demo::HelloHandler;
use crate::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "spool")]
#[command(about = "Task-queue broker demo over the in-memory store", long_about = None)]
struct Args {
    /// Path to a TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of tasks to enqueue
    #[arg(long, default_value_t = 20)]
    tasks: usize,

    /// Number of concurrent workers
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Executions that fail before the handler starts succeeding
    #[arg(long, default_value_t = 2)]
    failures: u32,

    /// Give up waiting after this many seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref())?;
    trace::init(&settings.log)?;

    // (A) store と broker、背景ループを用意
    let store = MemoryStore::default();
    let broker = Broker::new(store, settings.broker)?;
    let services = Services::spawn(&broker);

    // (B) worker を起動
    let handler = Arc::new(HelloHandler::new(args.failures));
    let workers: Vec<_> = (0..args.workers)
        .map(|_| {
            tokio::spawn(demo::worker_loop(
                broker.clone(),
                Arc::clone(&handler),
                services.subscribe(),
            ))
        })
        .collect();

    // (C) タスク投入
    demo::produce(&broker, args.tasks).await?;
    info!(tasks = args.tasks, workers = args.workers, "enqueued");

    // (D) 全件が processed か dead になるまで待つ
    let wait = async {
        loop {
            if demo::settled(&broker).await? >= args.tasks {
                return anyhow::Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };
    tokio::select! {
        r = tokio::time::timeout(Duration::from_secs(args.timeout_secs), wait) => match r {
            Ok(settled) => settled?,
            Err(_) => warn!(timeout_secs = args.timeout_secs, "gave up waiting for tasks"),
        },
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    // (E) graceful shutdown: 実行中の task を終えてから止まる
    services.shutdown_and_join().await;
    for w in workers {
        let _ = w.await;
    }

    for q in broker.queues().await? {
        let stats = broker.queue_stats(&q).await?;
        println!("{}", serde_json::to_string(&stats)?);
    }
    Ok(())
}
