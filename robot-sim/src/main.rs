//! Robot simulator for developing against the link without hardware.
//!
//! - TCP port 9000 stands in for the Bluetooth serial module: every command
//!   is answered with `ACK <command>` and telemetry lines are streamed.
//! - HTTP port 8888 mirrors the robot's access point control server.

use anyhow::Result;
use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use robot_link_shared::RobotCommand;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "robot-sim")]
struct Args {
    /// Serial stand-in listen address
    #[arg(long, default_value = "0.0.0.0:9000")]
    serial: String,

    /// HTTP control server listen address
    #[arg(long, default_value = "0.0.0.0:8888")]
    http: String,

    /// Telemetry interval in milliseconds, 0 to disable
    #[arg(long, default_value_t = 2000)]
    telemetry_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let serial = TcpListener::bind(&args.serial).await?;
    info!("[SIM] Serial stand-in listening on {}", args.serial);
    let http = TcpListener::bind(&args.http).await?;
    info!("[SIM] HTTP control server listening on {}", args.http);

    let telemetry = Duration::from_millis(args.telemetry_ms);
    tokio::spawn(async move {
        loop {
            match serial.accept().await {
                Ok((socket, peer)) => {
                    info!("[SIM] Serial client {}", peer);
                    tokio::spawn(async move {
                        if let Err(e) = serve_serial(socket, telemetry).await {
                            warn!("[SIM] Serial client {} error: {}", peer, e);
                        }
                        info!("[SIM] Serial client {} gone", peer);
                    });
                }
                Err(e) => warn!("[SIM] Accept failed: {}", e),
            }
        }
    });

    axum::serve(http, router()).await?;
    Ok(())
}

async fn serve_serial(mut socket: TcpStream, telemetry: Duration) -> Result<()> {
    let mut pending = String::new();
    let mut buf = vec![0u8; 1024];
    let mut battery: u32 = 100;
    let mut ticker = tokio::time::interval(if telemetry.is_zero() {
        Duration::from_secs(3600)
    } else {
        telemetry
    });
    ticker.tick().await;

    loop {
        tokio::select! {
            result = socket.read(&mut buf) => {
                let n = result?;
                if n == 0 {
                    return Ok(());
                }
                pending.push_str(&String::from_utf8_lossy(&buf[..n]));
                for command in split_commands(&mut pending) {
                    let reply = serial_reply(&command);
                    debug!("[SIM] {:?} -> {:?}", command, reply);
                    socket.write_all(reply.as_bytes()).await?;
                }
            }
            _ = ticker.tick(), if !telemetry.is_zero() => {
                battery = battery.saturating_sub(1).max(1);
                socket.write_all(format!("BAT {}\r\n", battery).as_bytes()).await?;
            }
        }
    }
}

/// Pull complete commands out of `pending`: single letters, or `p<i>:<a>;`
fn split_commands(pending: &mut String) -> Vec<String> {
    let mut commands = Vec::new();
    loop {
        let trimmed = pending.trim_start().to_string();
        *pending = trimmed;
        let Some(first) = pending.chars().next() else {
            break;
        };
        if first == 'p' || first == 'P' {
            match pending.find(';') {
                Some(end) => {
                    commands.push(pending[..=end].to_string());
                    pending.drain(..=end);
                }
                None => break,
            }
        } else {
            let len = first.len_utf8();
            commands.push(pending[..len].to_string());
            pending.drain(..len);
        }
    }
    commands
}

fn serial_reply(command: &str) -> String {
    match RobotCommand::parse(command) {
        Ok(parsed) => format!("ACK {}\r\n", parsed.bluetooth_literal()),
        Err(e) => format!("ERR {}\r\n", e),
    }
}

#[derive(Debug, Deserialize)]
struct ServoQuery {
    servo: i64,
    angle: i64,
}

fn router() -> Router {
    Router::new()
        .route("/forward", get(|| async { "OK forward" }))
        .route("/backward", get(|| async { "OK backward" }))
        .route("/left", get(|| async { "OK left" }))
        .route("/right", get(|| async { "OK right" }))
        .route("/stop", get(|| async { "OK stop" }))
        .route("/set", get(set_servo))
}

async fn set_servo(Query(query): Query<ServoQuery>) -> (StatusCode, String) {
    match RobotCommand::servo(query.servo, query.angle) {
        Ok(RobotCommand::Servo { index, angle }) => {
            (StatusCode::OK, format!("OK servo {} angle {}", index, angle))
        }
        Ok(other) => (StatusCode::BAD_REQUEST, format!("unexpected {}", other)),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()),
    }
}
