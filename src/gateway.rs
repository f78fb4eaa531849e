//! Gateway – drives [`RelayService`] from transport events and the
//! broadcast tick.
//!
//! ## Event contract (inbound, from the hosting transport)
//!
//! | Event     | Carries                      | Effect                     |
//! |-----------|------------------------------|----------------------------|
//! | `Opened`  | conn, world, outbound sender | `connect` + hello frame    |
//! | `Inbound` | conn, raw frame              | `handle_message` (+ echo)  |
//! | `Closed`  | conn                         | `disconnect` (tombstone)   |
//!
//! ## Outbound
//!
//! One 0xA4 frame per observer per tick, pushed into that connection's
//! outbound channel. The service lock is held for the tick pass only;
//! dispatch happens after it is released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::service::RelayService;
use crate::types::{ConnectionId, RelayConfig};

/// Ticks between periodic stats lines.
const STATS_EVERY: u64 = 1024;

// ---------------------------------------------------------------------------
// Connection events
// ---------------------------------------------------------------------------

/// Lifecycle and traffic events the hosting transport feeds the gateway.
#[derive(Debug)]
pub enum ConnectionEvent {
    Opened {
        conn: ConnectionId,
        world: String,
        outbound: mpsc::UnboundedSender<Bytes>,
    },
    Inbound {
        conn: ConnectionId,
        frame: Bytes,
    },
    Closed {
        conn: ConnectionId,
    },
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Wraps a [`RelayService`] and drives it from connection events.
///
/// Call [`RelayGateway::run`] inside a Tokio task (or as the main task) to
/// start the tick loop.
pub struct RelayGateway {
    config: RelayConfig,
    service: Arc<Mutex<RelayService>>,
    outbound: HashMap<ConnectionId, mpsc::UnboundedSender<Bytes>>,
}

impl RelayGateway {
    pub fn new(config: RelayConfig, service: Arc<Mutex<RelayService>>) -> Self {
        Self {
            config,
            service,
            outbound: HashMap::new(),
        }
    }

    /// Run until the event channel closes or SIGINT arrives.
    ///
    /// The tick pass is synchronous under the service lock, so shutdown
    /// always lands between passes — an in-flight pass completes and its
    /// deletion records go out first.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) -> Result<()> {
        let period = Duration::from_millis(self.config.tick_interval_ms);
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(tick_ms = self.config.tick_interval_ms, "gateway running");

        loop {
            tokio::select! {
                _ = timer.tick() => self.run_tick(period),
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        info!("transport event channel closed, stopping");
                        break;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("SIGINT received, stopping between ticks");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Apply one transport event, holding the service lock for the single
    /// mutation only.
    pub fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened {
                conn,
                world,
                outbound,
            } => {
                let hello = self.service.lock().connect(conn, world);
                match hello {
                    Ok(frame) => {
                        if outbound.send(frame).is_err() {
                            // Connection died before the hello went out; its
                            // Closed event will tombstone the cursor.
                            debug!(conn, "hello undeliverable");
                        }
                        self.outbound.insert(conn, outbound);
                    }
                    Err(err) => {
                        // Fatal to this connection only: dropping the sender
                        // tears the transport side down.
                        warn!(conn, %err, "refusing connection");
                    }
                }
            }
            ConnectionEvent::Inbound { conn, frame } => {
                let reply = self.service.lock().handle_message(conn, &frame);
                if let Some(reply) = reply {
                    if let Some(tx) = self.outbound.get(&conn) {
                        let _ = tx.send(reply);
                    }
                }
            }
            ConnectionEvent::Closed { conn } => {
                self.outbound.remove(&conn);
                self.service.lock().disconnect(conn);
            }
        }
    }

    /// One broadcast pass: tick under the lock, dispatch after releasing it.
    pub fn run_tick(&mut self, period: Duration) {
        let started = Instant::now();
        let output = {
            let mut service = self.service.lock();
            service.tick()
        };

        for (conn, frame) in output.frames {
            match self.outbound.get(&conn) {
                Some(tx) => {
                    if tx.send(frame).is_err() {
                        // Isolated to this observer for this tick; its
                        // Closed event is already in flight.
                        warn!(conn, tick = output.tick, "dropping frame for dead connection");
                    }
                }
                None => debug!(conn, "no outbound channel for frame"),
            }
        }

        let elapsed = started.elapsed();
        if elapsed > period.mul_f64(0.9) {
            warn!(
                tick = output.tick,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow tick"
            );
        }

        if output.tick % STATS_EVERY == 0 {
            let stats = self.service.lock().stats();
            match serde_json::to_string(&stats) {
                Ok(line) => debug!(stats = %line, "periodic stats"),
                Err(err) => debug!(%err, "stats serialisation failed"),
            }
        }
    }
}
