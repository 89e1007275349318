mod config;
mod logging;
mod rumqttc_wrapper;
mod statestream;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::bail;
use config::Config;
use hass2qilowatt::{
    config_entry::ConfigEntry,
    config_flow::{FlowResult, FormErrors, OptionsFlow, SetupFlow, STEP_DEVICE},
    context::HostContext,
    dispatcher::{workmode_signal, Signal},
    host::{EntityRegistry, MemoryStates},
    integration::Integration,
};
use log::{error, info, warn};
use rumqttc_wrapper::RumqttcWrapper;

fn main() -> anyhow::Result<()> {
    logging::init_logger();
    info!("Running revision: {}", env!("GIT_HASH"));
    if std::env::args().len() > 1 {
        error!("Arguments passed. Tool is configured by config.toml in its path");
    }

    let config = Config::load();
    let registry = config.registry();
    let entry = configure_entry(&config, &registry)?;
    info!(
        "inverter {} ({}), update interval {}s",
        entry.inverter_id(),
        entry.data.inverter_model,
        entry.options.poll_interval().as_secs()
    );

    let states = Arc::new(MemoryStates::new());
    match &config.home_assistant {
        Some(broker) if broker.is_valid() => {
            let base = config
                .statestream_base_topic
                .as_deref()
                .unwrap_or(statestream::DEFAULT_BASE_TOPIC);
            info!("Reading entity states from {} under {base}/", broker.host);
            statestream::spawn(broker, base, states.clone())?;
        }
        _ => warn!("No Home Assistant broker configured, every reading will be unavailable"),
    }

    let delay = config.startup_delay();
    info!("Qilowatt integration will be started after {delay} seconds delay");
    thread::sleep(Duration::from_secs(delay));
    info!("{} entity states known", states.len());

    let context = HostContext::new();
    let _command_log = context
        .dispatcher()
        .connect(&workmode_signal(entry.inverter_id()), |signal| {
            if let Signal::WorkMode(command) = signal {
                info!("WORKMODE command: {command:?}");
            }
        });

    let mut integration = Integration::<RumqttcWrapper>::new(states, Arc::new(registry));
    integration.setup_entry(entry, &context)?;

    loop {
        context.run_for(Duration::from_secs(60));
    }
}

/// Runs the configured values through the setup and options flows, so a bad
/// configuration fails here with the same errors the forms would show.
fn configure_entry(config: &Config, registry: &dyn EntityRegistry) -> anyhow::Result<ConfigEntry> {
    let mut flow = SetupFlow::new(registry);
    for device in flow.discovered() {
        info!(
            "discovered {} device {} ({})",
            device.model, device.name, device.device_id
        );
    }

    let mut entry = match flow.step_user(Some(config.qilowatt.user.clone())) {
        FlowResult::CreateEntry(entry) => entry,
        FlowResult::ShowForm {
            step_id: STEP_DEVICE,
            ..
        } => match flow.step_device(Some(config.qilowatt.overrides.clone())) {
            FlowResult::CreateEntry(entry) => entry,
            FlowResult::ShowForm { step_id, errors } => bail!(rejected(step_id, &errors)),
        },
        FlowResult::ShowForm { step_id, errors } => bail!(rejected(step_id, &errors)),
    };

    let mut options = OptionsFlow::new(entry.options.clone());
    entry.options = match options.step_init(Some(config.qilowatt.options.clone())) {
        FlowResult::CreateEntry(options) => options,
        FlowResult::ShowForm { step_id, errors } => bail!(rejected(step_id, &errors)),
    };
    Ok(entry)
}

fn rejected(step_id: &str, errors: &FormErrors) -> String {
    let fields = errors
        .iter()
        .map(|(field, error)| format!("{field}: {error}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("invalid [qilowatt] configuration ({step_id} step): {fields}")
}
