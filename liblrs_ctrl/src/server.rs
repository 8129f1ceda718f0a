//! The HTTP control surface.
//!
//! Handlers are thin: each one hands its request to the [`Controller`] on a blocking thread
//! (stops drain, calibrations take minutes) and renders the outcome as JSON.
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;

use super::config::Config;
use super::config_store::YamlConfigStore;
use super::control::{CalibrationReply, Controller, RunRequest, StopReply};
use super::error::{
    ControlError, GeneratorError, RunInfoError, SequencerError, ServerError, TopologyError,
};
use super::metadata::MetadataExtractor;
use super::remote::SshExecutor;
use super::run_context::{RunContextStore, StoreSnapshot};
use super::run_log::JsonlRunLog;
use super::sequencer::{Collaborators, SystemClock};
use super::signal::UdpSignalRelay;
use super::watcher::{FileWatcher, PendingFileBinder};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum WebError {
    Control(ControlError),
    Internal(String),
}

impl From<ControlError> for WebError {
    fn from(err: ControlError) -> Self {
        WebError::Control(err)
    }
}

fn sequencer_status(err: &SequencerError) -> (StatusCode, &'static str) {
    match err {
        SequencerError::ConfigError(_)
        | SequencerError::GeneratorError(GeneratorError::ConfigError(_))
        | SequencerError::GeneratorError(GeneratorError::TopologyError(_)) => {
            (StatusCode::BAD_REQUEST, "config_error")
        }
        SequencerError::TopologyError(TopologyError::Invalid(_))
        | SequencerError::RunInfoError(RunInfoError::Invalid(_)) => {
            (StatusCode::BAD_REQUEST, "validation_error")
        }
        SequencerError::TopologyError(_) => (StatusCode::BAD_REQUEST, "config_error"),
        SequencerError::RemoteError(_) => (StatusCode::BAD_GATEWAY, "remote_error"),
        SequencerError::HardwareNotReady { .. } => (StatusCode::BAD_GATEWAY, "hardware_not_ready"),
        SequencerError::SignalError(_) => (StatusCode::BAD_GATEWAY, "signal_error"),
        SequencerError::Cancelled(_) => (StatusCode::CONFLICT, "cancelled"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

fn control_status(err: &ControlError) -> (StatusCode, &'static str) {
    match err {
        ControlError::CalibrationBusy => (StatusCode::CONFLICT, "busy"),
        ControlError::NoCalibration => (StatusCode::CONFLICT, "no_calibration"),
        ControlError::SignalError(_) => (StatusCode::BAD_GATEWAY, "signal_error"),
        ControlError::WatcherError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "watcher_error"),
        ControlError::SequencerError(e) => sequencer_status(e),
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            WebError::Control(err) => {
                let (status, code) = control_status(&err);
                (status, err.to_string(), code)
            }
            WebError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, "internal_error"),
        };
        if status.is_server_error() {
            log::error!("Request failed: {message}");
        } else {
            log::warn!("Request rejected: {message}");
        }

        let body = Json(ErrorResponse {
            error: message,
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

pub type WebResult<T> = Result<Json<T>, WebError>;

async fn blocking<T, F>(op: F) -> WebResult<T>
where
    F: FnOnce() -> Result<T, ControlError> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| WebError::Internal(e.to_string()))?;
    Ok(Json(result?))
}

async fn start_run(
    State(controller): State<Arc<Controller>>,
    Json(request): Json<RunRequest>,
) -> WebResult<StoreSnapshot> {
    blocking(move || controller.start_run(&request)).await
}

async fn stop_run(State(controller): State<Arc<Controller>>) -> WebResult<StopReply> {
    blocking(move || controller.stop_run()).await
}

async fn start_calibration(
    State(controller): State<Arc<Controller>>,
) -> WebResult<CalibrationReply> {
    blocking(move || controller.start_calibration()).await
}

async fn cancel_calibration(State(controller): State<Arc<Controller>>) -> WebResult<StoreSnapshot> {
    blocking(move || {
        controller.cancel_calibration()?;
        Ok(controller.status())
    })
    .await
}

async fn reset_metadata(
    State(controller): State<Arc<Controller>>,
    Json(request): Json<RunRequest>,
) -> Json<StoreSnapshot> {
    Json(controller.reset_metadata(&request))
}

async fn status(State(controller): State<Arc<Controller>>) -> Json<StoreSnapshot> {
    Json(controller.status())
}

pub fn router(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/api/start_run/", post(start_run))
        .route("/api/stop_run/", get(stop_run))
        .route("/api/start_calib/", get(start_calibration))
        .route("/api/cancel_calib/", get(cancel_calibration))
        .route("/api/reset_metadata/", post(reset_metadata))
        .route("/api/status/", get(status))
        .with_state(controller)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("Shutdown requested"),
        Err(e) => log::error!("Could not listen for the shutdown signal: {e}"),
    }
}

/// Wire the production collaborators together and serve until interrupted
pub async fn serve(config: Config) -> Result<(), ServerError> {
    std::fs::create_dir_all(&config.data_dir)?;
    let store = RunContextStore::new();
    let config_store = Arc::new(YamlConfigStore::open(&config.config_store_path)?);
    let run_log = Arc::new(JsonlRunLog::new(&config.run_log_path));
    let extractor = MetadataExtractor::new(&config, config_store.clone(), run_log)?;
    let pattern = extractor.pattern().clone();
    let watcher = FileWatcher::start(
        &config.data_dir,
        pattern,
        PendingFileBinder::new(store.clone(), extractor),
    )?;

    let collaborators = Collaborators {
        config_store,
        remote: Arc::new(SshExecutor::new(&config.calibration.remote_user)),
        relay: Arc::new(UdpSignalRelay::new(&config.signal)),
        flush: Arc::new(watcher.handle()),
        clock: Arc::new(SystemClock),
    };
    let address = config.bind_address();
    let controller = Arc::new(Controller::new(config, store, collaborators));

    let listener = tokio::net::TcpListener::bind(&address).await?;
    log::info!("Control server listening on http://{address}");
    axum::serve(listener, router(controller))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    drop(watcher);
    log::info!("Control server stopped");
    Ok(())
}
