use crate::config::Config;
use crate::connection::Connection;
use crate::error::Error;
use crate::message::Stanza;
use log::{info, warn};
use rand::Rng;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// A supervised stream of stanzas from NWWS-OI.
///
/// `IngestStream` reconnects on network failure with exponential backoff
/// and gives up only on credential problems or after
/// `nwwsoi.maxReconnectAttempts` consecutive failures.
pub struct IngestStream {
    rx: tokio::sync::mpsc::Receiver<StreamEvent>,
}

impl IngestStream {
    pub fn new(config: Config) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel(32);

        // tokio-xmpp's client is !Send; give it a dedicated thread with a
        // single-threaded runtime
        std::thread::spawn(move || {
            let local = tokio::task::LocalSet::new();

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("ingest runtime");

            local.spawn_local(supervise(config, tx));

            rt.block_on(local);
        });

        Self { rx }
    }
}

impl futures::Stream for IngestStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_recv(cx)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Joined,
    BackingOff,
    Fatal,
}

#[derive(Debug)]
pub enum StreamEvent {
    ConnectionState(ConnectionState),
    Error(Error),
    Stanza(Stanza),
}

type SendResult = Result<(), tokio::sync::mpsc::error::SendError<StreamEvent>>;

async fn supervise(config: Config, tx: tokio::sync::mpsc::Sender<StreamEvent>) -> SendResult {
    use ConnectionState::*;

    let max_attempts = config.nwwsoi.max_reconnect_attempts;
    let initial_delay = config.nwwsoi.initial_reconnect_delay;
    let mut attempt: u32 = 0;

    tx.send(StreamEvent::ConnectionState(Disconnected)).await?;

    loop {
        tx.send(StreamEvent::ConnectionState(Connecting)).await?;

        match Connection::new(&config).await {
            Ok(mut conn) => {
                tx.send(StreamEvent::ConnectionState(Joined)).await?;
                attempt = 0;

                loop {
                    match conn.next_stanza().await {
                        Ok(stanza) => tx.send(StreamEvent::Stanza(stanza)).await?,
                        Err(e) => {
                            warn!("session ended: {}", e);
                            tx.send(StreamEvent::Error(e)).await?;
                            tokio::task::spawn_local(conn.end());
                            break;
                        }
                    }
                }
            }
            Err(e) if e.is_fatal() => {
                tx.send(StreamEvent::Error(e)).await?;
                tx.send(StreamEvent::ConnectionState(Fatal)).await?;
                return Ok(());
            }
            Err(e) => {
                // Unknown connect failures are logged and retried like
                // network failures
                warn!("connect attempt failed: {}", e);
                tx.send(StreamEvent::Error(e)).await?;
            }
        }

        attempt += 1;
        if attempt >= max_attempts {
            tx.send(StreamEvent::Error(Error::ReconnectsExhausted(attempt)))
                .await?;
            tx.send(StreamEvent::ConnectionState(Fatal)).await?;
            return Ok(());
        }

        tx.send(StreamEvent::ConnectionState(BackingOff)).await?;
        let delay = backoff_delay(initial_delay, attempt);
        info!(
            "reconnecting in {:.1}s (attempt {}/{})",
            delay.as_secs_f64(),
            attempt,
            max_attempts
        );
        tokio::time::sleep(delay).await;
    }
}

/// `initial * 2^attempt` plus up to a second of jitter.
fn backoff_delay(initial_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.min(16);
    let base = initial_ms.saturating_mul(1u64 << exponent);
    let jitter = rand::thread_rng().gen_range(0..1000u64);
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_with_jitter() {
        for attempt in 1..=5u32 {
            let d = backoff_delay(2000, attempt).as_millis() as u64;
            let base = 2000 * (1 << attempt);
            assert!(d >= base && d < base + 1000, "attempt {}: {}ms", attempt, d);
        }
    }

    #[test]
    fn backoff_exponent_is_capped() {
        // must not overflow for absurd attempt counts
        let d = backoff_delay(2000, 1000);
        assert!(d >= Duration::from_millis(2000));
    }
}
