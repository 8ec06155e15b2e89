//! Link lifecycle driver.
//!
//! Owns the transport and drives one [`SpanningTree`] instance: opening
//! burst, read loop, outbound flushing, and PING liveness. The protocol
//! core itself never blocks; this is the only place that does I/O.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{error, info};

use crate::protocol::SpanningTree;
use crate::state::now_ts;
use crate::transport::Transport;

/// Liveness settings for one link.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// How often to ping the uplink.
    pub ping_interval: Duration,
    /// How long without a PONG before the link is declared dead.
    pub ping_timeout: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        LinkOptions {
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(120),
        }
    }
}

/// Run one link to completion: connect burst, then read/write until the
/// socket closes, a fatal protocol error occurs, or the uplink stops
/// answering pings.
pub async fn run(proto: Arc<SpanningTree>, mut transport: Transport, options: LinkOptions) -> Result<()> {
    proto.connect();
    flush(&proto, &mut transport).await?;

    let started = now_ts();
    let mut ping_timer = tokio::time::interval(options.ping_interval);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            read = transport.read_line() => {
                match read {
                    Ok(Some(line)) => {
                        if let Err(e) = proto.handle_line(&line) {
                            error!(error = %e, "fatal protocol error, closing link");
                            return Err(e.into());
                        }
                        flush(&proto, &mut transport).await?;
                    }
                    Ok(None) => {
                        info!("uplink closed the connection");
                        return Ok(());
                    }
                    Err(e) => bail!("read error: {}", e),
                }
            }
            _ = proto.outbound_ready() => {
                flush(&proto, &mut transport).await?;
            }
            _ = ping_timer.tick() => {
                if proto.connected() {
                    let last = proto.last_pong();
                    let deadline = options.ping_timeout.as_secs() as i64;
                    if last > 0 && now_ts() - last > deadline {
                        bail!("ping timeout: no PONG for {}s", now_ts() - last);
                    }
                    if last == 0 && now_ts() - started > deadline {
                        bail!("ping timeout: never received a PONG");
                    }
                    proto.ping_server(None, None)?;
                    flush(&proto, &mut transport).await?;
                }
            }
        }
    }
}

async fn flush(proto: &SpanningTree, transport: &mut Transport) -> Result<()> {
    for line in proto.take_outbound() {
        transport.write_line(&line).await?;
    }
    Ok(())
}
