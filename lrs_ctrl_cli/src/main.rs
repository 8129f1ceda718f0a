//! # lrs_ctrl_cli
//!
//! Part of the lrs_ctrl crate family.
//!
//! This is the command line application of the LRS run and calibration coordinator. It
//! serves the control surface, talks to a running server, and writes metadata for single
//! data files.
//!
//! ## Install
//!
//! Use `cargo install --path ./lrs_ctrl_cli`
//!
//! ## Use
//!
//! Make a template configuration and edit it
//!
//! ```bash
//! lrs_ctrl_cli -p lrs_ctrl.yml new
//! ```
//!
//! Serve the control surface (watches the data directory until interrupted)
//!
//! ```bash
//! lrs_ctrl_cli -p lrs_ctrl.yml serve
//! ```
//!
//! Control a running server
//!
//! ```bash
//! lrs_ctrl_cli start --run 12 --data-stream physics
//! lrs_ctrl_cli stop
//! lrs_ctrl_cli calibrate
//! lrs_ctrl_cli status
//! ```
//!
//! Register a topology (copied into the topology directory) and make it active
//!
//! ```bash
//! lrs_ctrl_cli config import topology ./MOAS_20240501.csv --tag warm
//! lrs_ctrl_cli config activate topology 20240501
//! lrs_ctrl_cli config list topology
//! ```
//!
//! Write the metadata sidecar of one file without a server
//!
//! ```bash
//! lrs_ctrl_cli metadata /data/LRS/mpd_run_0012_p3.data --data-stream cosmics
//! ```
//!
//! Everything logged to the terminal is also written to `./lrs_ctrl.log`.
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use liblrs_ctrl::client::ControlClient;
use liblrs_ctrl::config::Config;
use liblrs_ctrl::config_store::{
    import_configuration_file, ConfigKind, ConfigStore, YamlConfigStore,
};
use liblrs_ctrl::control::RunRequest;
use liblrs_ctrl::metadata::{MetadataExtractor, MetadataOverrides};
use liblrs_ctrl::run_log::JsonlRunLog;
use liblrs_ctrl::server::serve;

const LOG_FILE: &str = "./lrs_ctrl.log";

fn run_args(run_required: bool) -> Vec<Arg> {
    vec![
        Arg::new("run")
            .long("run")
            .required(run_required)
            .value_parser(value_parser!(u32))
            .help("Run number"),
        Arg::new("subrun")
            .long("subrun")
            .value_parser(value_parser!(u32))
            .help("Subrun number"),
        Arg::new("data-stream")
            .long("data-stream")
            .help("Data stream tag, e.g. physics or cosmics"),
    ]
}

fn instance_arg() -> Arg {
    Arg::new("instance")
        .long("instance")
        .default_value("manual")
        .help("Who started the run")
}

fn kind_arg() -> Arg {
    Arg::new("kind")
        .required(true)
        .value_parser(["topology", "threshold", "moas", "foas"])
        .help("Configuration kind: topology (MOAS) or threshold (FOAS)")
}

fn config_command() -> Command {
    Command::new("config")
        .about("Manage the versioned topology and threshold configurations")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("import")
                .about("Register a MOAS_<version>.csv or FOAS_<version>.csv file")
                .arg(kind_arg())
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Configuration file"),
                )
                .arg(
                    Arg::new("tag")
                        .long("tag")
                        .default_value("manual")
                        .help("Free form tag stored with the version"),
                ),
        )
        .subcommand(
            Command::new("activate")
                .about("Make an imported version the active one")
                .arg(kind_arg())
                .arg(Arg::new("version").required(true).help("Version to activate")),
        )
        .subcommand(
            Command::new("active")
                .about("Show the active version")
                .arg(kind_arg()),
        )
        .subcommand(
            Command::new("list")
                .about("List the imported versions")
                .arg(kind_arg()),
        )
}

fn cli() -> Command {
    Command::new("lrs_ctrl_cli")
        .arg_required_else_help(true)
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .global(true)
                .help("Path to the configuration file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log debug messages to the terminal"),
        )
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(Command::new("serve").about("Serve the control surface"))
        .subcommand(
            Command::new("start")
                .about("Start a run")
                .args(run_args(true))
                .arg(instance_arg()),
        )
        .subcommand(Command::new("stop").about("Stop the run"))
        .subcommand(Command::new("calibrate").about("Run a calibration sequence"))
        .subcommand(Command::new("cancel").about("Cancel the running calibration"))
        .subcommand(
            Command::new("reset")
                .about("Replace the run context without starting the readout")
                .args(run_args(true))
                .arg(instance_arg()),
        )
        .subcommand(Command::new("status").about("Show the run context and calibration state"))
        .subcommand(config_command())
        .subcommand(
            Command::new("metadata")
                .about("Write the metadata sidecar of a single data file")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Data file"),
                )
                .args(run_args(false)),
        )
}

/// Terminal and file logging, routed through indicatif so progress bars stay intact
fn init_logging(verbose: bool) -> MultiProgress {
    let term_level = if verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };
    let mut loggers: Vec<Box<dyn simplelog::SharedLogger>> = vec![simplelog::TermLogger::new(
        term_level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )];
    match File::create(LOG_FILE) {
        Ok(file) => loggers.push(simplelog::WriteLogger::new(
            simplelog::LevelFilter::Debug,
            simplelog::Config::default(),
            file,
        )),
        Err(e) => eprintln!("Could not create log file {LOG_FILE}: {e}"),
    }

    let pb_manager = MultiProgress::new();
    LogWrapper::new(pb_manager.clone(), simplelog::CombinedLogger::new(loggers))
        .try_init()
        .expect("Could not create logging/progress!");
    pb_manager
}

/// Load the configuration. Client commands fall back to the defaults (plus environment
/// overrides) when there is no file.
fn load_config(path: &Path, required: bool) -> Option<Config> {
    if !required && !path.exists() {
        log::debug!(
            "No config at {}, using defaults",
            path.to_string_lossy()
        );
        let mut config = Config::default();
        if let Err(e) = config.apply_env_overrides(|key| std::env::var(key).ok()) {
            log::error!("{e}");
            return None;
        }
        return Some(config);
    }
    log::info!("Loading config from {}...", path.to_string_lossy());
    match Config::load(path) {
        Ok(c) => Some(c),
        Err(e) => {
            log::error!("{e}");
            None
        }
    }
}

fn run_request(args: &ArgMatches) -> RunRequest {
    let mut request = RunRequest::new(*args.get_one::<u32>("run").unwrap_or(&0));
    request.subrun = *args.get_one::<u32>("subrun").unwrap_or(&0);
    request.data_stream = args.get_one::<String>("data-stream").cloned();
    if let Some(instance) = args.get_one::<String>("instance") {
        request.run_starting_instance = instance.clone();
    }
    request
}

fn print_reply(reply: Result<serde_json::Value, liblrs_ctrl::error::ClientError>) -> ExitCode {
    match reply {
        Ok(value) => {
            match serde_json::to_string_pretty(&value) {
                Ok(text) => println!("{text}"),
                Err(e) => log::error!("{e}"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn calibrate(client: &ControlClient, pb_manager: &MultiProgress) -> ExitCode {
    let spinner = pb_manager.add(ProgressBar::new_spinner());
    spinner.set_message("Calibrating...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    let reply = client.start_calibration();
    spinner.finish_and_clear();
    print_reply(reply)
}

fn write_metadata(config: &Config, args: &ArgMatches) -> ExitCode {
    let Some(file) = args.get_one::<PathBuf>("file") else {
        return ExitCode::FAILURE;
    };
    let config_store = match YamlConfigStore::open(&config.config_store_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let run_log = Arc::new(JsonlRunLog::new(&config.run_log_path));
    let extractor = match MetadataExtractor::new(config, config_store, run_log) {
        Ok(x) => x,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let overrides = MetadataOverrides {
        run: args.get_one::<u32>("run").copied(),
        subrun: args.get_one::<u32>("subrun").copied(),
        data_stream: args.get_one::<String>("data-stream").cloned(),
    };
    match extractor.write_metadata(file, &overrides) {
        Ok(record) => {
            log::info!(
                "Wrote metadata for {} (run {} subrun {}, adler32 {})",
                record.name,
                record.run(),
                record.subrun(),
                record.checksums.adler32
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Metadata failed for {}: {e}", file.to_string_lossy());
            ExitCode::FAILURE
        }
    }
}

fn run_config_command(config: &Config, args: &ArgMatches) -> Result<(), String> {
    let Some((action, action_args)) = args.subcommand() else {
        return Err(String::from("No config action given"));
    };
    let kind = action_args
        .get_one::<String>("kind")
        .map(|k| k.parse::<ConfigKind>())
        .transpose()
        .map_err(|e| e.to_string())?
        .ok_or_else(|| String::from("No configuration kind given"))?;
    let store = YamlConfigStore::open(&config.config_store_path).map_err(|e| e.to_string())?;

    match action {
        "import" => {
            let file = action_args
                .get_one::<PathBuf>("file")
                .ok_or_else(|| String::from("No file given"))?;
            let tag = action_args
                .get_one::<String>("tag")
                .map(String::as_str)
                .unwrap_or("manual");
            // Topologies are loaded by version from the topology directory
            let dir = match kind {
                ConfigKind::Topology => Some(config.calibration.topology_dir.as_path()),
                ConfigKind::Threshold => None,
            };
            let version = import_configuration_file(&store, kind, file, tag, dir)
                .map_err(|e| e.to_string())?;
            println!("{version}");
        }
        "activate" => {
            let version = action_args
                .get_one::<String>("version")
                .ok_or_else(|| String::from("No version given"))?;
            store
                .set_active_version(kind, version)
                .map_err(|e| e.to_string())?;
        }
        "active" => match store.active_version(kind).map_err(|e| e.to_string())? {
            Some(version) => println!("{version}"),
            None => log::warn!("No active {} version", kind.label()),
        },
        "list" => {
            let active = store.active_version(kind).map_err(|e| e.to_string())?;
            for entry in store.versions(kind).map_err(|e| e.to_string())? {
                let marker = if active.as_deref() == Some(entry.version.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {} ({})", entry.version, entry.tag);
            }
        }
        other => return Err(format!("Unknown config action {other}")),
    }
    Ok(())
}

fn main() -> ExitCode {
    let matches = cli().get_matches();
    let pb_manager = init_logging(matches.get_flag("verbose"));

    let config_path = Config::resolve_path(matches.get_one::<String>("path").map(Path::new));

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        return match Config::write_template(&config_path) {
            Ok(()) => {
                log::info!("Done.");
                ExitCode::SUCCESS
            }
            Err(e) => {
                log::error!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    let server_side = matches!(matches.subcommand(), Some(("serve", _)));
    let Some(config) = load_config(&config_path, server_side) else {
        return ExitCode::FAILURE;
    };

    if server_side {
        log::info!("Data directory: {}", config.data_dir.to_string_lossy());
        log::info!("Run log: {}", config.run_log_path.to_string_lossy());
        let runtime = match tokio::runtime::Runtime::new() {
            Ok(r) => r,
            Err(e) => {
                log::error!("Could not start the async runtime: {e}");
                return ExitCode::FAILURE;
            }
        };
        return match runtime.block_on(serve(config)) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                log::error!("Server failed with error: {e}");
                ExitCode::FAILURE
            }
        };
    }

    if let Some(("metadata", args)) = matches.subcommand() {
        return write_metadata(&config, args);
    }

    if let Some(("config", args)) = matches.subcommand() {
        return match run_config_command(&config, args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                log::error!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    let client = match ControlClient::new(&config.base_url()) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    match matches.subcommand() {
        Some(("start", args)) => print_reply(client.start_run(&run_request(args))),
        Some(("stop", _)) => print_reply(client.stop_run()),
        Some(("calibrate", _)) => calibrate(&client, &pb_manager),
        Some(("cancel", _)) => print_reply(client.cancel_calibration()),
        Some(("reset", args)) => print_reply(client.reset_metadata(&run_request(args))),
        Some(("status", _)) => print_reply(client.status()),
        _ => ExitCode::FAILURE,
    }
}
