use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use application::{BusClient, DeviceRegistry, RuleEvaluator, RuleStore, StateCache};
use central_server::{api, state::AppState};
use infrastructure::{AppConfig, FileDeviceRepository, FileRuleRepository, MqttTransportOptions};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding default.toml (and an optional {RUN_MODE}.toml overlay)
    #[arg(long, default_value = "config")]
    config_dir: String,

    /// Device definitions file (JSON, whole-object replace on every write)
    #[arg(long, default_value = "devices.json")]
    devices_file: String,

    /// Rule list file (JSON, whole-array replace on every write)
    #[arg(long, default_value = "rules.json")]
    rules_file: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            "info,central_server=debug",
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("automation engine starting");

    let config = AppConfig::load(&args.config_dir).context("loading configuration")?;

    let device_registry = DeviceRegistry::load(Arc::new(FileDeviceRepository::new(
        &args.devices_file,
    )))
    .await
    .context("loading device registry")?;
    let state_cache = StateCache::new(device_registry.clone());
    let rule_store = RuleStore::load(Arc::new(FileRuleRepository::new(&args.rules_file)))
        .await
        .context("loading rule store")?;
    let rule_evaluator = RuleEvaluator::new(rule_store.clone(), device_registry.clone());

    let bus_client = BusClient::new(
        MqttTransportOptions {
            broker_host: config.mqtt.broker_host.clone(),
            broker_port: config.mqtt.broker_port,
            client_id: "central-engine".to_string(),
            username: config.mqtt.username.clone(),
            password: config.mqtt.password.clone(),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(5),
        },
        device_registry.clone(),
        rule_evaluator.clone(),
        state_cache.clone(),
    );

    rule_store.set_listener(bus_client.clone()).await;
    rule_evaluator.reload().await.context("loading initial rule snapshot")?;
    rule_evaluator.set_action_handler(bus_client.clone());
    bus_client.start().await.context("starting bus client")?;

    let mut app_state = AppState::new(config.clone());
    app_state.device_registry = Some(device_registry);
    app_state.state_cache = Some(state_cache);
    app_state.rule_store = Some(rule_store);
    app_state.rule_evaluator = Some(rule_evaluator);
    app_state.bus_client = Some(bus_client.clone());

    let router = api::create_router(Arc::new(app_state));
    let addr = std::net::SocketAddr::new(
        config.app.host.parse().context("parsing app.host")?,
        config.app.port,
    );
    info!(%addr, "serving http api");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    bus_client.stop().await;
    info!("automation engine stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
