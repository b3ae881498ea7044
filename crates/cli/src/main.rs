mod cmd;
mod engine;
mod output;
mod prompts;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use modbuild_lib::state::{ModuleState, RebuildStrategy};
use tracing_subscriber::EnvFilter;

use crate::cmd::{cmd_cancel, cmd_poll, cmd_resolve, cmd_retire, cmd_serve, cmd_status, cmd_submit};
use crate::engine::Engine;
use crate::output::OutputFormat;

/// mbs - Module build orchestration
#[derive(Parser)]
#[command(name = "mbs")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Path to the engine configuration (default: $MODBUILD_CONFIG)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Show the stream expansions a module definition resolves to
  Resolve {
    /// Module definition file (JSON or TOML)
    definition: PathBuf,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Submit a module definition for build
  Submit {
    /// Module definition file (JSON or TOML)
    definition: PathBuf,

    /// Owner recorded on the module builds
    #[arg(long, default_value = "mbs")]
    owner: String,

    /// Override the configured rebuild strategy (all, only-changed, changed-and-after)
    #[arg(long)]
    rebuild_strategy: Option<RebuildStrategy>,

    /// Record the builds in init without driving them
    #[arg(long)]
    no_wait: bool,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// List module builds, or show one in detail
  Status {
    /// Module build id
    id: Option<u64>,

    /// Only modules in this state
    #[arg(long)]
    state: Option<ModuleState>,

    /// Only modules with this name
    #[arg(long)]
    name: Option<String>,

    /// Only modules not modified for this long (e.g. "2h", "7days")
    #[arg(long, value_parser = humantime::parse_duration)]
    older_than: Option<Duration>,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Cancel a module build that is still in progress
  Cancel {
    /// Module build id
    id: u64,

    /// Who is canceling, recorded in the state reason
    #[arg(long, default_value = "mbs")]
    actor: String,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Move a finished module build to garbage
  Retire {
    /// Module build id
    id: u64,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    force: bool,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Run one reconciliation pass
  Poll {
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Run the event service, reading bus messages as JSON lines from stdin
  Serve {
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .without_time()
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let engine = Engine::load(cli.config.as_deref())?;

  match cli.command {
    Commands::Resolve { definition, output } => cmd_resolve(&engine, &definition, output),
    Commands::Submit {
      definition,
      owner,
      rebuild_strategy,
      no_wait,
      output,
    } => cmd_submit(&engine, &definition, &owner, rebuild_strategy, no_wait, output),
    Commands::Status {
      id,
      state,
      name,
      older_than,
      output,
    } => cmd_status(&engine, id, state, name, older_than, output),
    Commands::Cancel { id, actor, output } => cmd_cancel(&engine, id, &actor, output),
    Commands::Retire { id, force, output } => cmd_retire(&engine, id, force, output),
    Commands::Poll { output } => cmd_poll(&engine, output),
    Commands::Serve { output } => cmd_serve(engine, output),
  }
}
