use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::common::{Message, NetworkError, ProcessId};

use super::codec;
use super::Transport;

/// TCP transport with one long-lived connection per destination.
///
/// Each destination gets a writer task fed by an unbounded channel, so
/// `send` never blocks the event loop. The task connects lazily, reconnects
/// after a failed write, and drops the frame it could not deliver.
pub struct TcpTransport {
    links: Mutex<HashMap<String, UnboundedSender<Vec<u8>>>>,
    connect_timeout: Duration,
    shutdown: CancellationToken,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration, shutdown: CancellationToken) -> Self {
        TcpTransport {
            links: Mutex::new(HashMap::new()),
            connect_timeout,
            shutdown,
        }
    }

    fn spawn_link(&self, addr: &str) -> UnboundedSender<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let span = tracing::debug_span!("link", to = addr);
        tokio::spawn(
            run_link(addr.to_string(), rx, self.connect_timeout, self.shutdown.clone()).instrument(span),
        );
        tx
    }
}

impl Transport for TcpTransport {
    fn send(&self, destination: &ProcessId, envelope: Message) {
        let frame = match codec::encode_frame(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(to = %destination, message = %envelope, error = %e, "could not encode frame");
                return;
            }
        };
        if self.shutdown.is_cancelled() {
            return;
        }

        let addr = format!("{}:{}", destination.host, destination.port);
        let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        let link = links.entry(addr.clone()).or_insert_with(|| self.spawn_link(&addr));
        if let Err(mpsc::error::SendError(frame)) = link.send(frame) {
            // The writer task ended; start a fresh one.
            let link = self.spawn_link(&addr);
            if link.send(frame).is_err() {
                tracing::warn!(to = %addr, "link unavailable, dropping frame");
            }
            links.insert(addr, link);
        }
    }
}

async fn run_link(
    addr: String,
    mut frames: UnboundedReceiver<Vec<u8>>,
    connect_timeout: Duration,
    shutdown: CancellationToken,
) {
    let mut stream: Option<TcpStream> = None;
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if stream.is_none() {
            match connect(&addr, connect_timeout).await {
                Ok(connected) => stream = Some(connected),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping frame");
                    continue;
                }
            }
        }
        if let Some(connected) = stream.as_mut() {
            if let Err(e) = codec::write_frame(connected, &frame).await {
                tracing::warn!(error = %e, "write failed, dropping frame and reconnecting");
                stream = None;
            }
        }
    }
}

pub async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream, NetworkError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(source)) => Err(NetworkError::Connect {
            addr: addr.to_string(),
            source,
        }),
        Err(_) => Err(NetworkError::Timeout { addr: addr.to_string() }),
    }
}

/// Opens a connection, writes one frame and closes it.
pub async fn send_frame(destination: &ProcessId, envelope: &Message, timeout: Duration) -> Result<(), NetworkError> {
    let addr = format!("{}:{}", destination.host, destination.port);
    let frame = codec::encode_frame(envelope)?;
    let mut stream = connect(&addr, timeout).await?;
    codec::write_frame(&mut stream, &frame).await?;
    Ok(())
}
