use anyhow::{bail, Context, Result};
use clap::Parser;
use robot_link::{
    BluetoothMode, ConnectionEvent, ConnectionManager, LinkConfig, MemoryRobotStore,
    NmcliPlatform, RobotEndpoint, RobotStore, StaticPlatform, Transport, WifiPlatform,
};
use robot_link_shared::link;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Drive a robot over Bluetooth serial or WiFi HTTP
#[derive(Parser, Debug)]
#[command(name = "robot-link", version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bluetooth MAC address of the robot
    #[arg(long, conflicts_with = "wifi")]
    bt: Option<String>,

    /// SSID of the robot's access point
    #[arg(long)]
    wifi: Option<String>,

    /// WPA2 passphrase of the robot's access point
    #[arg(long, default_value = link::DEFAULT_WIFI_PASSPHRASE)]
    passphrase: String,

    /// Robot HTTP server as ip:port
    #[arg(long)]
    target: Option<String>,

    /// Id of a configured robot record
    #[arg(long)]
    robot: Option<String>,

    /// Talk to robot-sim over TCP instead of RFCOMM
    #[arg(long)]
    simulate: bool,

    /// Assume the device is already on the robot's network
    #[arg(long)]
    assume_associated: bool,

    /// Long-running mode: allow more reconnect attempts
    #[arg(long)]
    background: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let mut config = LinkConfig::load_or_default(args.config.as_deref())?;
    if args.simulate {
        config.bluetooth.mode = BluetoothMode::TcpSimulation;
    }
    if args.background {
        config.reconnect.max_attempts = link::MAX_BACKGROUND_RECONNECT_ATTEMPTS;
    }

    let store = Arc::new(MemoryRobotStore::with_records(config.robots.clone()));
    let endpoint = resolve_endpoint(&args, &config, store.as_ref())?;

    let platform: Arc<dyn WifiPlatform> = if args.assume_associated {
        Arc::new(StaticPlatform::new(endpoint.address()))
    } else {
        Arc::new(NmcliPlatform::new())
    };

    let preview_len = config.wifi.body_preview_len;
    info!("Robot link starting: {}", endpoint);
    info!("  Bluetooth mode: {:?}", config.bluetooth.mode);
    info!("  Reconnect: {} attempts, {:?} apart", config.reconnect.max_attempts, config.reconnect.delay);

    let mut manager = ConnectionManager::new(config, store, platform);
    manager.connect(endpoint.clone());

    // Stdin lines feed the command loop
    let (input_tx, mut input_rx) = mpsc::channel::<String>(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if input_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            event = manager.recv() => match event {
                Some(event) => print_event(&event, preview_len),
                None => {
                    error!("Connection manager closed");
                    break;
                }
            },
            line = input_rx.recv() => {
                let Some(line) = line else {
                    break;
                };
                if !handle_input(line.trim(), &manager, &endpoint).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    manager.disconnect().await;
    Ok(())
}

/// Build the endpoint from flags, falling back to a configured robot record
fn resolve_endpoint(
    args: &Args,
    config: &LinkConfig,
    store: &dyn RobotStore,
) -> Result<RobotEndpoint> {
    let endpoint = match (&args.bt, &args.wifi, &args.robot) {
        (Some(address), _, _) => RobotEndpoint::bluetooth(address.clone()),
        (None, Some(ssid), _) => RobotEndpoint::wifi(ssid.clone(), args.passphrase.clone())
            .with_target(
                args.target
                    .clone()
                    .unwrap_or_else(|| config.wifi.default_target.clone()),
            ),
        (None, None, Some(id)) => {
            let record = store
                .get_robot(id)?
                .with_context(|| format!("no robot record {:?} in configuration", id))?;
            match record.connection_type {
                Transport::Bluetooth => {
                    let address = record
                        .mac_address
                        .with_context(|| format!("robot {:?} has no MAC address", id))?;
                    RobotEndpoint::bluetooth(address)
                }
                Transport::Wifi => {
                    let target = args.target.clone().unwrap_or_else(|| match &record.ip_address {
                        Some(ip) => format!("{}:{}", ip, target_port(&config.wifi.default_target)),
                        None => config.wifi.default_target.clone(),
                    });
                    RobotEndpoint::wifi(link::DEFAULT_WIFI_SSID, args.passphrase.clone())
                        .with_target(target)
                }
            }
        }
        (None, None, None) => bail!("one of --bt, --wifi or --robot is required"),
    };

    Ok(match &args.robot {
        Some(id) => endpoint.with_robot_id(id.clone()),
        None => endpoint,
    })
}

fn target_port(target: &str) -> &str {
    target.rsplit_once(':').map(|(_, port)| port).unwrap_or("80")
}

/// Returns false when the user asked to quit
async fn handle_input(line: &str, manager: &ConnectionManager, endpoint: &RobotEndpoint) -> bool {
    match line {
        "" => {}
        "quit" | "exit" => return false,
        "connect" => manager.connect(endpoint.clone()),
        "disconnect" => manager.disconnect().await,
        "history" => println!("{}", manager.render_received()),
        "state" => println!("State: {}", manager.state()),
        "scan" | "scan wifi" => match manager.scan_wifi().await {
            Ok(networks) if networks.is_empty() => println!("No robot WiFi found"),
            Ok(networks) => {
                for ap in networks {
                    println!("  {:<32} signal {}/4", ap.ssid, ap.signal_level());
                }
            }
            Err(e) => warn!("WiFi scan failed: {}", e),
        },
        "scan bt" => scan_bluetooth().await,
        "auto on" => manager.set_auto_reconnect(true),
        "auto off" => manager.set_auto_reconnect(false),
        command => {
            if let Err(e) = manager.send_command(command) {
                warn!("Command {:?} rejected: {}", command, e);
            }
        }
    }
    true
}

#[cfg(feature = "rfcomm")]
async fn scan_bluetooth() {
    use robot_link::transport::{bt_service, discover_robots, BtDiscoveryConfig};

    let devices = match bt_service::get_adapter().await {
        Ok(adapter) => discover_robots(&adapter, &BtDiscoveryConfig::default()).await,
        Err(e) => Err(e),
    };
    match devices {
        Ok(devices) if devices.is_empty() => println!("No Bluetooth devices found"),
        Ok(devices) => {
            for device in devices {
                let paired = if device.paired { " (paired)" } else { "" };
                println!("  {}  {}{}", device.address, device.display_name(), paired);
            }
        }
        Err(e) => warn!("Bluetooth scan failed: {:#}", e),
    }
}

#[cfg(not(feature = "rfcomm"))]
async fn scan_bluetooth() {
    warn!("Bluetooth scan needs the rfcomm feature");
}

fn print_event(event: &ConnectionEvent, preview_len: usize) {
    match event {
        ConnectionEvent::Connected {
            transport,
            endpoint,
            reconnected,
        } => {
            if *reconnected {
                println!("Reconnected to {} via {}", endpoint, transport);
            } else {
                println!("Connected to {} via {}", endpoint, transport);
            }
        }
        ConnectionEvent::Disconnected { reason } => println!("Disconnected: {}", reason),
        ConnectionEvent::Reconnecting {
            attempt,
            max_attempts,
        } => println!("Reconnecting ({}/{})...", attempt, max_attempts),
        ConnectionEvent::ConnectionFailed { reason } => println!("Connection failed: {}", reason),
        ConnectionEvent::DataReceived(line) => println!("[Robot] {}", line),
        ConnectionEvent::Command(report) => println!("{}", report.status_line(preview_len)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robot_link::RobotRecord;

    fn args(argv: &[&str]) -> Args {
        Args::parse_from(std::iter::once("robot-link").chain(argv.iter().copied()))
    }

    #[test]
    fn test_bluetooth_flag() {
        let store = MemoryRobotStore::new();
        let endpoint =
            resolve_endpoint(&args(&["--bt", "00:11:22:33:44:55"]), &LinkConfig::default(), &store)
                .unwrap();
        assert_eq!(endpoint, RobotEndpoint::bluetooth("00:11:22:33:44:55"));
    }

    #[test]
    fn test_wifi_flag_uses_default_target() {
        let store = MemoryRobotStore::new();
        let endpoint =
            resolve_endpoint(&args(&["--wifi", "Robot_AP"]), &LinkConfig::default(), &store).unwrap();
        assert_eq!(endpoint, RobotEndpoint::wifi("Robot_AP", "12345678"));
    }

    #[test]
    fn test_robot_record_lookup() {
        let mut record = RobotRecord::new("r7", "Arm", Transport::Wifi);
        record.ip_address = Some("10.0.0.9".into());
        let store = MemoryRobotStore::with_records([record]);

        let endpoint =
            resolve_endpoint(&args(&["--robot", "r7"]), &LinkConfig::default(), &store).unwrap();
        assert_eq!(
            endpoint,
            RobotEndpoint::wifi("Robot_AP", "12345678")
                .with_target("10.0.0.9:8888")
                .with_robot_id("r7")
        );
    }

    #[test]
    fn test_missing_endpoint_is_an_error() {
        let store = MemoryRobotStore::new();
        assert!(resolve_endpoint(&args(&[]), &LinkConfig::default(), &store).is_err());
        assert!(resolve_endpoint(&args(&["--robot", "nope"]), &LinkConfig::default(), &store).is_err());
    }

    #[test]
    fn test_bt_and_wifi_conflict() {
        let result = Args::try_parse_from([
            "robot-link",
            "--bt",
            "00:11:22:33:44:55",
            "--wifi",
            "Robot_AP",
        ]);
        assert!(result.is_err());
    }
}
