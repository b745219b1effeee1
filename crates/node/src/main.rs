//! stashd: block-data engine for a personal wallet. Ingests the block
//! files written by a full node, maintains the script-history index and
//! serves wallet-scoped queries.

mod sync;
mod viewer;
mod wallet;
mod zeroconf;

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fs2::FileExt;
use stashd_index::writer::{DbMode, PruneMode};
use stashd_log::{log_error, log_info};
use stashd_params::{chain_params, Network};
use stashd_storage::fjall::FjallStore;

use crate::sync::{Engine, RunState};
use crate::viewer::Viewer;

const DEFAULT_HOME_DIR: &str = ".stashd";
const DEFAULT_POLL_MILLIS: u64 = 1_000;
const LOCK_FILE_NAME: &str = ".lock";

struct Config {
    network: Network,
    home_dir: PathBuf,
    block_dir: Option<PathBuf>,
    db_dir: Option<PathBuf>,
    db_mode: DbMode,
    prune: PruneMode,
    rebuild: bool,
    poll_millis: u64,
    log_level: stashd_log::Level,
    log_format: stashd_log::Format,
    log_timestamps: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: Network::Main,
            home_dir: default_home_dir(),
            block_dir: None,
            db_dir: None,
            db_mode: DbMode::Bare,
            prune: PruneMode::None,
            rebuild: false,
            poll_millis: DEFAULT_POLL_MILLIS,
            log_level: stashd_log::Level::Info,
            log_format: stashd_log::Format::Text,
            log_timestamps: true,
        }
    }
}

enum CliAction {
    Run(Config),
    PrintHelp,
    PrintVersion,
}

fn default_home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_HOME_DIR)
}

fn parse_args<I>(raw_args: I) -> Result<CliAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut config = Config::default();
    let mut args = raw_args.into_iter();
    while let Some(arg) = args.next() {
        let mut take_value = |name: &str| {
            args.next()
                .ok_or_else(|| format!("{name} requires a value"))
        };
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliAction::PrintHelp),
            "--version" | "-V" => return Ok(CliAction::PrintVersion),
            "--network" => {
                let value = take_value("--network")?;
                config.network = Network::parse(&value)
                    .ok_or_else(|| format!("unknown network '{value}'"))?;
            }
            "--home-dir" => {
                config.home_dir = PathBuf::from(take_value("--home-dir")?);
            }
            "--block-dir" => {
                config.block_dir = Some(PathBuf::from(take_value("--block-dir")?));
            }
            "--db-dir" => {
                config.db_dir = Some(PathBuf::from(take_value("--db-dir")?));
            }
            "--db-type" => {
                let value = take_value("--db-type")?;
                config.db_mode = DbMode::parse(&value)
                    .ok_or_else(|| format!("unknown db type '{value}' (bare|super)"))?;
            }
            "--prune" => {
                let value = take_value("--prune")?;
                config.prune = PruneMode::parse(&value)
                    .ok_or_else(|| format!("unknown prune type '{value}' (none)"))?;
            }
            "--rebuild" => {
                config.rebuild = true;
            }
            "--poll-ms" => {
                let value = take_value("--poll-ms")?;
                config.poll_millis = value
                    .parse()
                    .map_err(|_| format!("invalid poll interval '{value}'"))?;
            }
            "--log-level" => {
                let value = take_value("--log-level")?;
                config.log_level = stashd_log::Level::from_name(&value)
                    .ok_or_else(|| format!("unknown log level '{value}'"))?;
            }
            "--log-format" => {
                let value = take_value("--log-format")?;
                config.log_format = stashd_log::Format::from_name(&value)
                    .ok_or_else(|| format!("unknown log format '{value}'"))?;
            }
            "--no-log-timestamps" => {
                config.log_timestamps = false;
            }
            other => return Err(format!("unknown argument '{other}'")),
        }
    }
    Ok(CliAction::Run(config))
}

fn print_help() {
    println!("stashd - wallet block-data engine");
    println!();
    println!("  --network <main|test|unit>   network to index (default main)");
    println!("  --home-dir <path>            engine home directory");
    println!("  --block-dir <path>           node block-file directory");
    println!("                               (default <home>/blocks)");
    println!("  --db-dir <path>              key-value store directory");
    println!("                               (default <home>/db)");
    println!("  --db-type <bare|super>       index tracked scripts only, or all");
    println!("  --prune <none>               prune mode");
    println!("  --rebuild                    wipe databases and resync");
    println!("  --poll-ms <millis>           block-file poll interval");
    println!("  --log-level <level>          error|warn|info|debug|trace");
    println!("  --log-format <text|json>     log line format");
    println!("  --no-log-timestamps          omit timestamps from text logs");
}

fn run(config: Config) -> Result<(), String> {
    stashd_log::init(stashd_log::LogConfig {
        level: config.log_level,
        format: config.log_format,
        timestamps: config.log_timestamps,
    });

    let params = chain_params(config.network);
    let block_dir = config
        .block_dir
        .unwrap_or_else(|| config.home_dir.join("blocks"));
    let db_dir = config.db_dir.unwrap_or_else(|| config.home_dir.join("db"));
    fs::create_dir_all(&config.home_dir)
        .map_err(|err| format!("cannot create {}: {err}", config.home_dir.display()))?;

    // One engine per home directory.
    let lock_path = config.home_dir.join(LOCK_FILE_NAME);
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|err| format!("cannot open {}: {err}", lock_path.display()))?;
    lock_file
        .try_lock_exclusive()
        .map_err(|_| format!("another instance holds {}", lock_path.display()))?;

    let store = FjallStore::open(&db_dir)
        .map_err(|err| format!("cannot open store at {}: {err}", db_dir.display()))?;
    let engine = Arc::new(
        Engine::new(
            params,
            Arc::new(store),
            config.db_mode,
            config.prune,
            &block_dir,
        )
        .map_err(|err| err.to_string())?,
    );

    log_info!(
        "starting on {} network ({:?} prune), {} bytes of block data at {}",
        engine.params.network.as_str(),
        engine.prune_mode(),
        engine.total_block_bytes(),
        block_dir.display()
    );
    engine.initial_sync(config.rebuild).map_err(|err| {
        log_error!("initial sync failed: {err}");
        err.to_string()
    })?;
    if engine.run_state() != RunState::Ready {
        return Err("engine did not reach ready state".to_string());
    }

    let (viewer, receiver) = Viewer::new(Arc::clone(&engine));
    let dispatcher = {
        let viewer = Arc::clone(&viewer);
        thread::Builder::new()
            .name("notification-dispatch".to_string())
            .spawn(move || viewer.run_dispatcher(receiver))
            .map_err(|err| err.to_string())?
    };
    viewer.send_init();

    // Tail follow: the node keeps appending to the newest block file.
    let poll = Duration::from_millis(config.poll_millis.max(10));
    loop {
        thread::sleep(poll);
        if let Err(err) = viewer.process_tail_update() {
            log_error!("tail processing failed: {err}");
        }
        if dispatcher.is_finished() {
            return Err("notification dispatcher exited".to_string());
        }
    }
}

fn main() -> ExitCode {
    let action = match parse_args(std::env::args().skip(1)) {
        Ok(action) => action,
        Err(message) => {
            eprintln!("stashd: {message}");
            return ExitCode::FAILURE;
        }
    };
    match action {
        CliAction::PrintHelp => {
            print_help();
            ExitCode::SUCCESS
        }
        CliAction::PrintVersion => {
            println!("stashd {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        CliAction::Run(config) => match run(config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(message) => {
                eprintln!("stashd: {message}");
                ExitCode::FAILURE
            }
        },
    }
}
