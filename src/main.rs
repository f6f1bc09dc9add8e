use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::runtime::Builder;
use tracing::Subscriber;
use tracing_subscriber::EnvFilter;

use crate::brain::controller::Controller;
use crate::brain::events::{self, ControllerHandle};
use crate::config::Config;
use crate::http::AppState;
use crate::io::device_store::memory::InMemoryDeviceStore;
use crate::io::device_store::DeviceStateStore;
use crate::io::notify::NotificationBus;
use crate::io::weather::dummy::FixedTemperatures;
use crate::io::weather::open_meteo::OpenMeteoArchive;
use crate::io::weather::{load_outdoor_temperatures, OutdoorTemperatureSource, OutdoorTemperatureTable};
use crate::logging::LoggingHandle;
use crate::math::model::load_model;
use crate::time_util::mytime::RealTimeProvider;

mod brain;
mod config;
mod http;
mod io;
mod logging;
mod math;
mod time_util;

const CONFIG_FILE: &str = "heat_pump_sim.toml";
const NOTIFICATION_CAPACITY: usize = 64;

fn main() -> ExitCode {
    println!("Preparing...");

    let logging_handle = match logging::init_logging() {
        Ok(handle) => Arc::new(handle),
        Err(err) => {
            eprintln!("Failed to set up logging: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let config = match config::read_config(Path::new(CONFIG_FILE)) {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    let rt = match Builder::new_multi_thread().worker_threads(2).enable_time().enable_io().build() {
        Ok(rt) => rt,
        Err(err) => {
            error!("Failed to build runtime: {}", err);
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(config, logging_handle.clone())) {
        Ok(()) => {
            info!("Stopped.");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run<S: Subscriber + 'static>(config: Config, logging_handle: Arc<LoggingHandle<EnvFilter, S>>) -> Result<(), String> {
    let schedule = config
        .build_heating_schedule()
        .map_err(|err| format!("Invalid heating schedule: {}", err))?;
    for (index, segment) in schedule.get_segments().iter().enumerate() {
        info!("Schedule segment {}: {}", index, segment);
    }

    let model = load_model(config.get_model().get_params_file()).unwrap_or_else(|degraded| {
        warn!("Running without a power model: {}", degraded);
        degraded.into_fallback()
    });
    info!("Power model: {}", model);

    let weather_source: Box<dyn OutdoorTemperatureSource> = if config.get_weather().is_enabled() {
        info!("Fetching outdoor temperatures for {}...", config.get_weather().get_date());
        Box::new(OpenMeteoArchive::new(config.get_weather().clone()))
    } else {
        info!("Weather disabled, assuming 0C all day");
        Box::new(FixedTemperatures::new(OutdoorTemperatureTable::empty()))
    };
    let outdoor_temperatures = load_outdoor_temperatures(weather_source.as_ref()).await;

    let control_config = config.get_control_config();
    let store: Arc<dyn DeviceStateStore> = Arc::new(InMemoryDeviceStore::heat_pump(
        control_config.get_initial_indoor_temperature(),
        control_config.get_initial_mode().attribute_value(),
    ));
    let notifications = NotificationBus::new(NOTIFICATION_CAPACITY);
    let (handle, receiver) = ControllerHandle::channel();

    let forwarders = events::spawn_attribute_forwarders(store.as_ref(), handle.clone());

    let mut controller = Controller::new(
        schedule.clone(),
        outdoor_temperatures.clone(),
        model,
        store.clone(),
        notifications.clone(),
        RealTimeProvider::default(),
    )
    .map_err(|failure| format!("Failed to create controller: {}", failure))?
    .with_initial_mode(control_config.get_initial_mode())
    .with_hold_duration(*control_config.get_hold_duration())
    .map_err(|failure| format!("Bad hold duration: {}", failure))?;
    controller
        .start()
        .await
        .map_err(|failure| format!("Failed to start controller: {}", failure))?;

    let controller_task = tokio::spawn(events::run(controller, receiver));
    let ticker = events::spawn_ticker(handle.clone(), *control_config.get_tick_interval());

    #[cfg(unix)]
    tokio::spawn(reload_logging_on_hangup(logging_handle));
    #[cfg(not(unix))]
    drop(logging_handle);

    let state = AppState {
        controller: handle,
        store,
        notifications,
        outdoor_temperatures: Arc::new(outdoor_temperatures),
        schedule: Arc::new(schedule),
    };

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", err);
        }
        info!("Received termination signal, stopping...");
    };
    let served = http::serve(config.get_server(), state, shutdown).await;

    ticker.abort();
    forwarders.iter().for_each(|forwarder| forwarder.abort());
    controller_task.abort();

    served.map_err(|err| format!("Server error: {}", err))
}

#[cfg(unix)]
async fn reload_logging_on_hangup<S: Subscriber + 'static>(logging_handle: Arc<LoggingHandle<EnvFilter, S>>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(hangups) => hangups,
        Err(err) => {
            warn!("Cannot reload logging on SIGHUP: {}", err);
            return;
        }
    };
    while hangups.recv().await.is_some() {
        match logging::reload_log_level(&*logging_handle) {
            Ok(filter) => info!("Log level reloaded: {}", filter),
            Err(err) => warn!("Failed to reload log level: {:?}", err),
        }
    }
}
