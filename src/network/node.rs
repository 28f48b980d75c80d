use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::common::{Error, NetworkError, ProcessId};
use crate::config::{NodeConfig, ProcessConfig};
use crate::system::{Event, EventProcessor, EventQueue, System, TokioScheduler};

use super::codec;
use super::transport::{send_frame, TcpTransport};

/// One running process: its listener and its event loop.
pub struct Node {
    pub process: ProcessId,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Binds the listener, registers with the hub and starts the event loop.
    ///
    /// An invalid configuration, or failing to bind or to register, is fatal
    /// for this process and is returned; once running, a dead listener
    /// cancels `shutdown`.
    pub async fn start(process: &ProcessConfig, config: &NodeConfig, shutdown: CancellationToken) -> Result<Node, Error> {
        config.validate()?;
        let me = process.process_id();
        let hub = config.hub();
        let listener = bind(&me.host, me.port).await?;

        let (queue, events) = EventQueue::channel();
        let transport = Arc::new(TcpTransport::new(config.connect_timeout, shutdown.clone()));
        let scheduler = Box::new(TokioScheduler::new(queue.clone()));
        let system = System::new(me.clone(), hub.clone(), config.heartbeat, queue.clone(), transport, scheduler);

        send_frame(&hub, &System::registration(&me), config.connect_timeout).await?;
        tracing::info!(process = %me, hub = %hub, "registered with hub");

        let span = tracing::info_span!("process", port = me.port);
        let listen = tokio::spawn(listen(listener, queue, shutdown.clone()).instrument(span.clone()));
        let run = tokio::spawn(EventProcessor::new(system, events, shutdown.clone()).run().instrument(span));

        Ok(Node {
            process: me,
            shutdown,
            tasks: vec![listen, run],
        })
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Waits until the listener and the event loop have both ended.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(process = %self.process, error = %e, "process task failed");
            }
        }
    }
}

pub async fn bind(host: &str, port: u16) -> Result<TcpListener, NetworkError> {
    let addr = format!("{}:{}", host, port);
    TcpListener::bind(&addr)
        .await
        .map_err(|source| NetworkError::Bind { addr, source })
}

async fn listen(listener: TcpListener, queue: EventQueue, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                tracing::trace!(%peer, "accepted connection");
                tokio::spawn(read_connection(stream, queue.clone(), shutdown.clone()).in_current_span());
            }
            Err(e) => {
                tracing::error!(error = %e, "listener failed, stopping process");
                shutdown.cancel();
                break;
            }
        }
    }
    queue.push(Event::Shutdown);
}

async fn read_connection(mut stream: TcpStream, queue: EventQueue, shutdown: CancellationToken) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = codec::read_frame(&mut stream) => frame,
        };
        match frame {
            Ok(Some(body)) => match codec::decode_envelope(&body) {
                Ok(envelope) => {
                    if !queue.push(Event::Network(envelope)) {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "dropping malformed frame"),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "closing connection");
                break;
            }
        }
    }
}
