//! Serve command implementation.
//!
//! Runs the event service on a tokio runtime. Bus messages arrive as JSON
//! lines on stdin; events published by the in-process backend are fed back
//! into the service. The service stops on end of input or Ctrl-C.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use modbuild_lib::scheduler::RawMessage;
use modbuild_lib::service::{self, ServiceHandle};

use crate::engine::Engine;
use crate::output::{OutputFormat, format_duration, print_json, print_stat, print_success, print_warning};

const FORWARD_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default, Serialize)]
struct ServeSummary {
  messages: usize,
  routed: usize,
  malformed: usize,
  backend_events: usize,
}

pub fn cmd_serve(engine: Engine, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
  let summary = runtime.block_on(serve(&engine));
  // A pending stdin read must not hold up exit after Ctrl-C.
  runtime.shutdown_background();
  let summary = summary?;

  if output.is_json() {
    print_json(&summary)?;
  } else {
    println!();
    print_success("Event service stopped");
    print_stat("Messages", &summary.messages.to_string());
    print_stat("Routed", &summary.routed.to_string());
    print_stat("Malformed", &summary.malformed.to_string());
    print_stat("Backend events", &summary.backend_events.to_string());
    print_stat("Uptime", &format_duration(start.elapsed()));
  }
  Ok(())
}

async fn serve(engine: &Engine) -> Result<ServeSummary> {
  let handle = service::spawn(Arc::clone(&engine.dispatcher), engine.poller());
  let mut summary = ServeSummary::default();
  info!("reading bus messages from stdin");

  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  let mut forward = tokio::time::interval(FORWARD_INTERVAL);
  let ctrl_c = tokio::signal::ctrl_c();
  tokio::pin!(ctrl_c);

  loop {
    tokio::select! {
      line = lines.next_line() => match line.context("Failed to read from stdin")? {
        Some(line) if line.trim().is_empty() => {}
        Some(line) => {
          summary.messages += 1;
          match serde_json::from_str::<RawMessage>(&line) {
            Ok(message) => {
              if handle.send_raw(&message).await? {
                summary.routed += 1;
              } else {
                debug!(topic = %message.topic, "ignoring unrouted message");
              }
            }
            Err(e) => {
              summary.malformed += 1;
              print_warning(&format!("Skipping malformed message: {}", e));
            }
          }
        }
        None => break,
      },
      _ = forward.tick() => summary.backend_events += forward_backend_events(engine, &handle).await?,
      _ = &mut ctrl_c => break,
    }
  }

  summary.backend_events += forward_backend_events(engine, &handle).await?;
  handle.shutdown().await.context("Event service did not stop cleanly")?;
  summary.backend_events += engine.pump();
  Ok(summary)
}

async fn forward_backend_events(engine: &Engine, handle: &ServiceHandle) -> Result<usize> {
  let events = engine.backend.take_events();
  let count = events.len();
  for event in events {
    handle.send(event).await?;
  }
  Ok(count)
}
