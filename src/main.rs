mod agent;
mod cli;
mod command;
mod config;
mod connection;
mod radio;
mod timer;
mod transport;

use agent::{Agent, AgentEvent};
use anyhow::{Context, Result};
use bluer::Address;
use bytes::Bytes;
use clap::Parser;
use cli::{Cli, Command};
use command::CommandDispatcher;
use config::AgentConfig;
use connection::LinkSessionManager;
use radio::{LogPrompt, NmcliRadioPlane};
use std::sync::Arc;
use std::time::Duration;
use timer::TokioScheduler;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use transport::ble_discovery::{get_adapter, sort_by_signal};
use transport::{BluerStack, FallbackTransport, PeerDiscovery, PeerDiscoveryConfig, TcpFallback};

/// How long replies are printed after a one-shot send
const SEND_REPLY_WINDOW: Duration = Duration::from_secs(3);
/// Upper bound on connecting for a one-shot send
const SEND_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
/// Grace period for the final disconnect to reach BlueZ
const RELEASE_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    if let Err(e) = real_main().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn real_main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config.clone() {
        Some(p) => p,
        None => config::default_config_path()?,
    };

    match cli.command {
        Some(Command::PrintConfigPath) => {
            println!("{}", config_path.display());
            Ok(())
        }
        Some(Command::InitConfig { force }) => {
            config::save(&config_path, &AgentConfig::default(), force)?;
            println!("Wrote default config to {}", config_path.display());
            Ok(())
        }
        Some(Command::Scan { timeout, all }) => {
            let cfg = config::load(&config_path)?;
            scan(&cfg, timeout, all).await
        }
        Some(Command::Send { json }) => {
            let mut cfg = config::load(&config_path)?;
            apply_mac_override(&mut cfg, cli.mac.as_deref());
            send_once(cfg, json).await
        }
        Some(Command::Run) | None => {
            let mut cfg = config::load(&config_path)?;
            apply_mac_override(&mut cfg, cli.mac.as_deref());
            run_agent(cfg).await
        }
    }
}

fn apply_mac_override(cfg: &mut AgentConfig, mac: Option<&str>) {
    if let Some(mac) = mac {
        cfg.link.peer_address = Some(mac.to_string());
    }
}

fn peer_address(cfg: &AgentConfig) -> Result<Option<Address>> {
    cfg.link
        .peer_address
        .as_deref()
        .map(|raw| {
            raw.parse::<Address>()
                .with_context(|| format!("invalid peer address: {}", raw))
        })
        .transpose()
}

async fn scan(cfg: &AgentConfig, timeout_secs: u64, all: bool) -> Result<()> {
    let adapter = get_adapter().await?;
    let discovery = PeerDiscovery::new(PeerDiscoveryConfig {
        scan_duration: Duration::from_secs(timeout_secs),
        name_hints: cfg.link.name_hints.clone(),
        show_all: all,
    });

    let mut records = discovery.scan(&adapter).await?;
    sort_by_signal(&mut records);

    if records.is_empty() {
        println!("No devices found");
        return Ok(());
    }
    for record in &records {
        let rssi = record
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "n/a".into());
        println!(
            "{}  {:<24}  {}",
            record.address,
            record.name.as_deref().unwrap_or("(unnamed)"),
            rssi
        );
    }
    Ok(())
}

type LiveAgent = Agent<
    BluerStack,
    TokioScheduler<connection::LinkTimer>,
    TokioScheduler<command::DispatchTimer>,
>;

/// Wire the radio stack, radio plane and fallback into one agent
async fn build_agent(
    cfg: &AgentConfig,
    tx: &mpsc::UnboundedSender<AgentEvent>,
) -> Result<(LiveAgent, Arc<NmcliRadioPlane>)> {
    let peer = peer_address(cfg)?;
    let adapter = get_adapter().await?;
    info!("[MAIN] Using adapter {}", adapter.name());

    let stack = BluerStack::new(adapter, agent::sink(tx, AgentEvent::Radio))
        .await
        .context("failed to open radio stack")?;
    let radios = Arc::new(NmcliRadioPlane::start(cfg.radio.clone(), stack.powered_flag()));

    let fallback: Option<Arc<dyn FallbackTransport>> = match cfg.fallback.address {
        Some(_) => Some(Arc::new(TcpFallback::start(
            cfg.fallback.clone(),
            cfg.device_id.clone(),
            agent::sink(tx, AgentEvent::Fallback),
        )?)),
        None => None,
    };

    let link = LinkSessionManager::new(
        cfg.link.clone(),
        peer,
        stack,
        TokioScheduler::new(agent::sink(tx, AgentEvent::LinkTimer)),
    );
    let dispatcher = CommandDispatcher::new(
        cfg.dispatch.clone(),
        cfg.device_id.clone(),
        radios.clone(),
        fallback,
        Arc::new(LogPrompt),
        agent::sink(tx, AgentEvent::NetworkResult),
        TokioScheduler::new(agent::sink(tx, AgentEvent::DispatchTimer)),
    );

    Ok((Agent::new(link, dispatcher), radios))
}

async fn run_agent(cfg: AgentConfig) -> Result<()> {
    info!("[MAIN] Field agent starting: {}", cfg.device_id);
    if let Some(addr) = &cfg.link.peer_address {
        info!("[MAIN]   Peer: {}", addr);
    }
    if let Some(addr) = &cfg.fallback.address {
        info!("[MAIN]   Fallback: {}", addr);
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let (mut agent, radios) = build_agent(&cfg, &tx).await?;

    let mut snapshots = radios.watch();
    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow().clone();
            info!(
                "[RADIO] Secondary radio {}, network {}",
                if snapshot.secondary_enabled { "on" } else { "off" },
                snapshot.joined_network.as_deref().unwrap_or("none")
            );
        }
    });

    let shutdown_tx = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(AgentEvent::Shutdown);
        }
    });

    agent.start(None);
    let mut link = agent.run(rx).await.into_link();
    link.stack_mut().wait_released(RELEASE_GRACE).await;
    Ok(())
}

async fn send_once(cfg: AgentConfig, json: String) -> Result<()> {
    serde_json::from_str::<serde_json::Value>(&json).context("message is not valid JSON")?;
    let direct = peer_address(&cfg)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let (mut agent, _radios) = build_agent(&cfg, &tx).await?;
    agent.set_auto_reconnect(false);

    let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
    agent.set_send_notifier(Arc::new(move |n: usize| {
        let _ = sent_tx.send(n);
    }));

    agent.start(direct);
    let _ = tx.send(AgentEvent::Outbound(Bytes::from(json.into_bytes())));
    let loop_handle = tokio::spawn(agent.run(rx));

    match tokio::time::timeout(SEND_CONNECT_TIMEOUT, sent_rx.recv()).await {
        Ok(Some(n)) => {
            info!("[MAIN] Sent {} bytes, listening for replies", n);
            tokio::time::sleep(SEND_REPLY_WINDOW).await;
        }
        _ => warn!("[MAIN] Message was not sent, link never became ready"),
    }

    let _ = tx.send(AgentEvent::Shutdown);
    let mut link = loop_handle.await.context("agent loop panicked")?.into_link();
    link.stack_mut().wait_released(RELEASE_GRACE).await;
    Ok(())
}
