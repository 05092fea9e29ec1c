//! Process wiring: build the component graph, run it until shutdown.
//!
//! Every component is owned by the `Application` instance; nothing lives in
//! process globals, so tests can stand up several applications side by side.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::daemon::{ChannelInventory, DaemonArgs};
use crate::directory::{Clock, RequesterDirectory};
use crate::fairness::FairnessMonitor;
use crate::ledger::store::JsonFileStore;
use crate::ledger::RequestLedger;
use crate::notifier::{self, LogSink, NotificationConsumer};
use crate::pool::ChannelPool;
use crate::worker::AllocationWorker;

/// Application core structure, managing all components.
pub struct Application {
    pub pool: Arc<ChannelPool>,
    pub ledger: Arc<RequestLedger>,
    pub directory: Arc<RequesterDirectory>,
    worker: Arc<AllocationWorker>,
    monitor: Arc<FairnessMonitor>,
    consumer: NotificationConsumer,
}

impl Application {
    /// Builds the component graph from daemon configuration.
    pub async fn build(args: &DaemonArgs) -> Result<Self> {
        ensure!(
            args.rate_min <= args.rate_max,
            "rate-min {} exceeds rate-max {}",
            args.rate_min,
            args.rate_max
        );

        let pool = match &args.inventory_path {
            Some(path) => {
                let inventory = ChannelInventory::load(path)?;
                ensure!(!inventory.channels.is_empty(), "channel inventory is empty");
                tracing::info!(
                    "Provisioning {} channels from {}",
                    inventory.channels.len(),
                    path.display()
                );
                Arc::new(ChannelPool::from_inventory(
                    inventory.channels.iter().map(|c| (c.id, c.data_rate)),
                    args.rate_min,
                    args.rate_max,
                ))
            }
            None => {
                ensure!(args.channel_count > 0, "channel count must be at least 1");
                tracing::info!(
                    "Provisioning {} channels with rates in [{}, {}]",
                    args.channel_count,
                    args.rate_min,
                    args.rate_max
                );
                Arc::new(ChannelPool::new(
                    args.channel_count,
                    args.rate_min,
                    args.rate_max,
                    args.seed,
                ))
            }
        };

        let store = Arc::new(JsonFileStore::open(&args.store_path).await?);
        let ledger = Arc::new(RequestLedger::recover(store).await?);

        let directory = Arc::new(RequesterDirectory::new());
        let clock = Arc::new(Clock::start());
        let (dispatcher, rx) = notifier::channel();

        let worker = Arc::new(AllocationWorker::new(
            pool.clone(),
            ledger.clone(),
            directory.clone(),
            args.policy.build(args.alpha),
            dispatcher,
            clock.clone(),
            Duration::from_millis(args.interval_ms),
        ));
        let consumer =
            NotificationConsumer::new(rx, ledger.clone(), directory.clone(), Arc::new(LogSink));
        let monitor = Arc::new(FairnessMonitor::new(
            pool.clone(),
            ledger.clone(),
            directory.clone(),
            clock,
            Duration::from_millis(args.monitor_interval_ms),
        ));

        Ok(Self {
            pool,
            ledger,
            directory,
            worker,
            monitor,
            consumer,
        })
    }

    /// Runs all tasks until Ctrl-C, then joins them.
    pub async fn run(self) -> Result<()> {
        let mut tasks = Tasks::new();
        tasks.spawn_all_tasks(self);
        tracing::info!("All application tasks started");
        tasks.wait_for_completion().await
    }
}

/// Task manager, responsible for starting and stopping the background tasks.
pub struct Tasks {
    tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn spawn_all_tasks(&mut self, app: Application) {
        let worker_task = {
            let worker = app.worker.clone();
            let token = self.cancellation_token.clone();
            tokio::spawn(async move {
                worker.run(token).await;
            })
        };
        self.tasks.push(worker_task);

        let consumer_task = {
            let token = self.cancellation_token.clone();
            let consumer = app.consumer;
            tokio::spawn(async move {
                tracing::info!("Starting notification consumer task");
                consumer.run(token).await;
                tracing::info!("Notification consumer task completed");
            })
        };
        self.tasks.push(consumer_task);

        let monitor_task = {
            let monitor = app.monitor.clone();
            let token = self.cancellation_token.clone();
            tokio::spawn(async move {
                tracing::info!("Starting fairness monitor task");
                monitor.run(token).await;
                tracing::info!("Fairness monitor task completed");
            })
        };
        self.tasks.push(monitor_task);
    }

    /// Waits for Ctrl-C (or an unexpected task exit), then cancels and joins.
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        let mut tasks = std::mem::take(&mut self.tasks);

        tokio::select! {
            _ = async {
                while let Some(task) = tasks.pop() {
                    if task.await.is_ok() {
                        return;
                    }
                }
            } => {
                tracing::error!("A task completed unexpectedly");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down...");
            }
        }

        tracing::info!("Cancelling all tasks...");
        self.cancellation_token.cancel();
        futures::future::join_all(tasks).await;
        Ok(())
    }
}
