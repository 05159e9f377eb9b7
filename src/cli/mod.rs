pub mod console;
pub mod today;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::ConsoleObserver;
use today::{process_clear_command, process_prune_command, process_today_command};
use tracing::{info, level_filters::LevelFilter};

use crate::{
    guard::{
        args::WatchArgs, config::GuardConfig, session::FixedSession, start_guard, CONFIG_FILE,
    },
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, LOG_PREFIX},
        runtime::multi_thread_runtime,
    },
};

#[derive(Parser, Debug)]
#[command(name = "Focusguard", version, long_about = None)]
#[command(about = "Tracks application usage during focus sessions and warns about distractions", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run the guard in this console until interrupted")]
    Watch {
        #[command(flatten)]
        args: WatchArgs,
    },
    #[command(about = "Print today's usage")]
    Today {
        #[arg(long, help = "Only show usage recorded for this task")]
        task_id: Option<String>,
    },
    #[command(about = "Remove usage older than the retention period")]
    Prune {},
    #[command(about = "Delete all recorded usage")]
    Clear {},
}

pub fn run_cli() -> Result<()> {
    let args = Args::parse();
    let app_dir = args.dir.map_or_else(create_application_default_path, Ok)?;

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(LOG_PREFIX, &app_dir.join("logs"), logging_level, args.log)?;

    match args.commands {
        Commands::Watch { args } => {
            let config = args.apply(GuardConfig::load(&app_dir.join(CONFIG_FILE))?);
            let session = args.session();
            match session.tracked_task() {
                Some(task) => println!("Watching task {}", task.title),
                None => println!("Watching global usage"),
            }
            info!("Starting guard with {config:?}");
            multi_thread_runtime()?.block_on(start_guard(
                &app_dir,
                config,
                Box::new(FixedSession(session)),
                Box::new(ConsoleObserver::new()),
            ))
        }
        Commands::Today { task_id } => process_today_command(&app_dir, task_id),
        Commands::Prune {} => process_prune_command(&app_dir),
        Commands::Clear {} => process_clear_command(&app_dir),
    }
}
