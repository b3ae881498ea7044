//! Long-running event service.
//!
//! Inbound events are sharded across a fixed pool of workers by
//! [`Event::shard_key`], so events about one module are handled in arrival
//! order. Handler work runs on the blocking pool. The poller runs on its own
//! interval next to the event intake.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::scheduler::{Dispatcher, Event, Poller, RawMessage};

const QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Error)]
pub enum ServiceError {
  #[error("event service has stopped")]
  Stopped,

  #[error("event service task failed: {0}")]
  Join(#[from] JoinError),
}

pub struct ServiceHandle {
  sender: mpsc::Sender<Event>,
  shutdown: oneshot::Sender<()>,
  task: JoinHandle<()>,
}

impl ServiceHandle {
  pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
    self.sender.send(event).await.map_err(|_| ServiceError::Stopped)
  }

  /// Queue a bus message. Returns `false` when the message is not routed.
  pub async fn send_raw(&self, message: &RawMessage) -> Result<bool, ServiceError> {
    match message.parse() {
      Some(event) => self.send(event).await.map(|()| true),
      None => Ok(false),
    }
  }

  /// Stop accepting events, finish the queued ones and wait for the workers.
  pub async fn shutdown(self) -> Result<(), ServiceError> {
    let _ = self.shutdown.send(());
    self.task.await?;
    Ok(())
  }
}

fn shard(event: &Event, workers: usize) -> usize {
  let mut hasher = DefaultHasher::new();
  event.shard_key().hash(&mut hasher);
  (hasher.finish() % workers as u64) as usize
}

fn spawn_worker(index: usize, dispatcher: Arc<Dispatcher>) -> (mpsc::Sender<Event>, JoinHandle<()>) {
  let (sender, mut receiver) = mpsc::channel::<Event>(QUEUE_DEPTH);
  let task = tokio::spawn(async move {
    while let Some(event) = receiver.recv().await {
      let dispatcher = Arc::clone(&dispatcher);
      match tokio::task::spawn_blocking(move || dispatcher.dispatch(event)).await {
        Ok(handled) => debug!(worker = index, handled, "event drained"),
        Err(e) => warn!(worker = index, error = %e, "event handler panicked"),
      }
    }
    debug!(worker = index, "worker stopped");
  });
  (sender, task)
}

async fn run_poll(poller: &Poller) {
  let poller = poller.clone();
  if let Err(e) = tokio::task::spawn_blocking(move || poller.poll()).await {
    warn!(error = %e, "poller panicked");
  }
}

/// Start the event workers and the poller on the current tokio runtime.
pub fn spawn(dispatcher: Arc<Dispatcher>, poller: Poller) -> ServiceHandle {
  let config = &dispatcher.context().config.scheduler;
  let workers = config.workers.max(1);
  let period = config.polling_interval();

  let (sender, mut receiver) = mpsc::channel::<Event>(QUEUE_DEPTH);
  let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();

  let (shards, tasks): (Vec<_>, Vec<_>) = (0..workers)
    .map(|index| spawn_worker(index, Arc::clone(&dispatcher)))
    .unzip();

  let task = tokio::spawn(async move {
    info!(workers, polling_interval = ?period, "event service started");
    let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        _ = &mut shutdown_rx => break,
        event = receiver.recv() => match event {
          Some(event) => {
            let index = shard(&event, workers);
            if shards[index].send(event).await.is_err() {
              warn!(worker = index, "worker is gone, dropping event");
            }
          }
          None => break,
        },
        _ = ticker.tick(), if !period.is_zero() => run_poll(&poller).await,
      }
    }

    receiver.close();
    while let Some(event) = receiver.recv().await {
      let index = shard(&event, workers);
      let _ = shards[index].send(event).await;
    }
    drop(shards);
    for task in tasks {
      if let Err(e) = task.await {
        warn!(error = %e, "worker task failed");
      }
    }
    info!("event service stopped");
  });

  ServiceHandle { sender, shutdown, task }
}
