//! # lrs_ctrl
//!
//! lrs_ctrl is the run and calibration coordinator of the light readout system (LRS),
//! written in Rust. It starts and stops physics runs of the ADC64 readout, drives the
//! LED calibration sequence across the pulser and SiPM bias controllers, and binds every
//! raw data file written by the DAQ to the run it belongs to by writing a metadata sidecar
//! and a run log row once the file is complete.
//!
//! ## Installation
//!
//! The only method of install is from source. Build and install the command line
//! application with `cargo install --path ./lrs_ctrl_cli` from the top level repository.
//! Remote provisioning shells out to the system `ssh` and `scp` clients, which must be
//! configured for key based (non-interactive) login to every controller host.
//!
//! ## Configuration
//!
//! A template configuration is written by `lrs_ctrl_cli new -p <path>`. The file is looked
//! up from the `--path` argument, then the `LRS_CTRL_CONFIG` environment variable, then
//! `./lrs_ctrl.yml`. `LRS_CTRL_APP_HOST`, `LRS_CTRL_APP_PORT` and `LRS_CTRL_DATA_DIR`
//! override the matching fields after the file is read.
//!
//! ```yml
//! app_host: 127.0.0.1
//! app_port: 5000
//! data_dir: /data/LRS
//! file_prefix: mpd
//! namespace: neardet-2x2-lar-light
//! run_log_path: /data/LRS/lrs_run_log.jsonl
//! config_store_path: /data/LRS_det_config/config_store.yml
//! stop_drain_ms: 2000
//! signal:
//!   host: 127.0.0.1
//!   port: 6000
//! snapshots:
//!   EvB: /data/LRS_det_config/evb.json
//! calibration:
//!   topology_dir: /data/LRS_det_config/MOAS
//!   run_number: 0
//!   ...
//! ```
//!
//! ## Control surface
//!
//! | Endpoint | Method | Effect |
//! |---|---|---|
//! | `/api/start_run/` | POST `{run, data_stream, run_starting_instance}` | replace the run context, send the start signal |
//! | `/api/stop_run/` | GET | send the stop signal, drain, finalize the pending file |
//! | `/api/start_calib/` | GET | run the calibration sequence to completion |
//! | `/api/cancel_calib/` | GET | cancel the running calibration at the next check point |
//! | `/api/reset_metadata/` | POST run descriptor | replace the run context without signals |
//! | `/api/status/` | GET | run context and calibration progress |
//!
//! Errors are returned as `{"error": ..., "code": ...}`.
//!
//! ## Output
//!
//! - `<datafile>.json`: metadata sidecar of every finalized data file
//! - the run log: one JSON line per finalized data file
//! - `<data_dir>/<YYYYmmdd_HHMMSS>_run_summary.json`: the record of a calibration session
//!
//! ### Data file format
//!
//! Raw files are a stream of little-endian ADC64 records, each starting with the sync word
//! `0x2A50D5AF`. The unix millisecond timestamp sits 12 bytes after the start of the sync
//! word and the TAI seconds counter 32 bytes after it. The TAI counter is used as the event
//! number.
pub mod channel_id;
pub mod client;
pub mod config;
pub mod config_store;
pub mod constants;
pub mod control;
pub mod error;
pub mod generator;
pub mod metadata;
pub mod remote;
pub mod run_context;
pub mod run_file;
pub mod run_info;
pub mod run_log;
pub mod sequencer;
pub mod server;
pub mod signal;
pub mod timestamp_scanner;
pub mod topology;
pub mod watcher;
