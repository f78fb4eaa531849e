//! Framed-TCP hosting transport.
//!
//! The relay core is transport-agnostic: anything that can deliver
//! [`ConnectionEvent`]s works. This module is the minimal host — a TCP
//! listener with length-delimited framing standing in for whatever duplex
//! channel (WebSocket, pipe, …) fronts the service in a deployment.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::gateway::ConnectionEvent;
use crate::types::{ConnectionId, RelayConfig};

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Accept connections forever, one [`drive_connection`] task each.
pub async fn listen(
    config: RelayConfig,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) -> Result<()> {
    let addr = format!("{}:{}", config.listen, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, world = %config.world, "listening");

    loop {
        let (stream, peer) = listener.accept().await.context("accepting connection")?;
        let conn = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
        debug!(conn, %peer, "connection accepted");
        tokio::spawn(drive_connection(
            stream,
            conn,
            config.world.clone(),
            events.clone(),
        ));
    }
}

/// Pump one connection until either side hangs up.
///
/// Emits `Opened` with this connection's outbound sender, then forwards
/// inbound frames and drains the outbound channel into the sink. Always
/// emits `Closed` on the way out so the gateway can tombstone the cursor.
pub async fn drive_connection<T>(
    io: T,
    conn: ConnectionId,
    world: String,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, LengthDelimitedCodec::new());
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Bytes>();

    if events
        .send(ConnectionEvent::Opened {
            conn,
            world,
            outbound: outbound_tx,
        })
        .is_err()
    {
        // Gateway already gone; nothing to drive.
        return;
    }

    loop {
        tokio::select! {
            inbound = framed.next() => match inbound {
                Some(Ok(frame)) => {
                    if events
                        .send(ConnectionEvent::Inbound { conn, frame: frame.freeze() })
                        .is_err()
                    {
                        break;
                    }
                }
                Some(Err(err)) => {
                    warn!(conn, %err, "read error");
                    break;
                }
                None => break, // peer hung up
            },
            frame = outbound_rx.recv() => match frame {
                Some(frame) => {
                    if let Err(err) = framed.send(frame).await {
                        warn!(conn, %err, "write error");
                        break;
                    }
                }
                // Gateway dropped the sender: server-side teardown.
                None => break,
            },
        }
    }

    let _ = events.send(ConnectionEvent::Closed { conn });
    debug!(conn, "connection closed");
}
