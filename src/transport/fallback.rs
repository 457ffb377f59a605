//! Fallback transport for radio requests when the control link is down
//!
//! The concrete adapter keeps a persistent TCP connection to a relay with
//! automatic reconnection and exponential backoff. Frames are 4-byte
//! big-endian length-prefixed JSON in both directions: radio requests out,
//! directives in.

use crate::timer::EventSink;
use anyhow::{anyhow, Result};
use bytes::Bytes;
use fieldlink_shared::codec::{self, FrameDecoder};
use fieldlink_shared::Directive;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Secondary channel for radio requests
pub trait FallbackTransport: Send + Sync {
    /// Whether a request published now would reach the relay
    fn is_available(&self) -> bool;

    /// Publish a radio request; false if it could not be queued
    fn publish(&self, action: &str, reason: &str) -> bool;
}

/// Configuration for the TCP fallback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Relay address; `None` disables the fallback
    pub address: Option<String>,
    /// Reconnection delay (initial)
    pub reconnect_delay_ms: u64,
    /// Maximum reconnection delay
    pub max_reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            address: None,
            reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
            connect_timeout_ms: 5_000,
        }
    }
}

/// Radio request as published over the fallback
#[derive(Debug, Serialize)]
struct PublishedRequest<'a> {
    action: &'a str,
    reason: &'a str,
    #[serde(rename = "sessionId")]
    session_id: &'a str,
}

/// Persistent TCP connection to the relay
pub struct TcpFallback {
    device_id: String,
    connected: Arc<AtomicBool>,
    outbound_tx: mpsc::UnboundedSender<Bytes>,
    task: JoinHandle<()>,
}

impl TcpFallback {
    /// Start the connection loop; inbound directives go to `sink`
    pub fn start(config: FallbackConfig, device_id: String, sink: EventSink<Directive>) -> Result<Self> {
        let address = config
            .address
            .clone()
            .ok_or_else(|| anyhow!("fallback address not configured"))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Bytes>();
        let connected = Arc::new(AtomicBool::new(false));

        let flag = connected.clone();
        let task = tokio::spawn(async move {
            connection_loop(address, config, flag, outbound_rx, sink).await;
        });

        Ok(Self {
            device_id,
            connected,
            outbound_tx,
            task,
        })
    }
}

impl FallbackTransport for TcpFallback {
    fn is_available(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, action: &str, reason: &str) -> bool {
        if !self.is_available() {
            return false;
        }

        let request = PublishedRequest {
            action,
            reason,
            session_id: &self.device_id,
        };
        let encoded = serde_json::to_vec(&request)
            .map_err(anyhow::Error::from)
            .and_then(|json| codec::encode(&json).map_err(anyhow::Error::from));

        match encoded {
            Ok(frame) => {
                debug!("[FALLBACK] Publishing {}", action);
                self.outbound_tx.send(frame).is_ok()
            }
            Err(e) => {
                warn!("[FALLBACK] Cannot encode {}: {}", action, e);
                false
            }
        }
    }
}

impl Drop for TcpFallback {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn connection_loop(
    address: String,
    config: FallbackConfig,
    connected: Arc<AtomicBool>,
    mut outbound_rx: mpsc::UnboundedReceiver<Bytes>,
    sink: EventSink<Directive>,
) {
    let initial_delay = Duration::from_millis(config.reconnect_delay_ms);
    let max_delay = Duration::from_millis(config.max_reconnect_delay_ms);
    let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
    let mut reconnect_delay = initial_delay;

    loop {
        match timeout(connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => {
                info!("[FALLBACK] Connected to relay {}", address);
                reconnect_delay = initial_delay;

                // Requests queued while disconnected are stale
                while outbound_rx.try_recv().is_ok() {}
                connected.store(true, Ordering::SeqCst);

                let result = handle_connection(stream, &mut outbound_rx, &sink).await;
                connected.store(false, Ordering::SeqCst);
                if let Err(reason) = result {
                    warn!("[FALLBACK] Disconnected: {}", reason);
                }
            }
            Ok(Err(e)) => debug!("[FALLBACK] Connect to {} failed: {}", address, e),
            Err(_) => debug!("[FALLBACK] Connect to {} timed out", address),
        }

        // Wait before reconnecting
        tokio::time::sleep(reconnect_delay).await;

        // Exponential backoff
        reconnect_delay = std::cmp::min(reconnect_delay * 2, max_delay);
    }
}

async fn handle_connection(
    stream: TcpStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<Bytes>,
    sink: &EventSink<Directive>,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 4096];

    loop {
        tokio::select! {
            Some(frame) = outbound_rx.recv() => {
                writer.write_all(&frame).await?;
            }

            result = reader.read(&mut read_buf) => {
                let n = result.map_err(|e| anyhow!("Read error: {}", e))?;
                if n == 0 {
                    return Err(anyhow!("Relay closed connection"));
                }
                decoder.extend(&read_buf[..n]);

                loop {
                    match decoder.decode_next() {
                        Ok(Some(frame)) => match Directive::parse(&frame) {
                            Ok(directive) => sink(directive),
                            Err(e) => warn!("[FALLBACK] Dropping directive: {}", e),
                        },
                        Ok(None) => break,
                        Err(e) => {
                            decoder.reset();
                            return Err(anyhow!("Bad frame from relay: {}", e));
                        }
                    }
                }
            }
        }
    }
}
