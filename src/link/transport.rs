use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::{encode, ConnectionState, EventBus, InboundMessage, LineDecoder, LinkError, LinkEvent, MessageSink};
use crate::config::ConnectionConfig;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Single TCP connection to the bot with automatic reconnect.
///
/// A background task owns the socket. [`Transport::send`] only queues bytes
/// for that task, so it never waits on the network.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    bus: EventBus,
    sink: Arc<dyn MessageSink>,
    link: Mutex<LinkState>,
    worker: Mutex<Option<Worker>>,
}

#[derive(Default)]
struct LinkState {
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    /// Bumped on every `start`; only the matching worker may write the state
    generation: u64,
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
    generation: u64,
}

/// Why a connected session ended without an I/O error
enum SessionEnd {
    PeerClosed,
    Shutdown,
}

impl Transport {
    pub fn new(config: ConnectionConfig, bus: EventBus, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                bus,
                sink,
                link: Mutex::new(LinkState::default()),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Spawn the connect/receive loop on the current Tokio runtime.
    ///
    /// Does nothing if the loop is already running.
    pub fn start(&self) {
        let mut worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = worker.as_ref() {
            if !running.handle.is_finished() {
                return;
            }
        }

        let generation = self.inner.next_generation();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.run(generation, shutdown_rx).await });
        *worker = Some(Worker {
            shutdown,
            handle,
            generation,
        });
        info!(addr = %self.inner.config.address(), "bot link started");
    }

    /// Stop the loop and close the socket.
    ///
    /// Once this returns no further transport events are emitted.
    pub async fn stop(&self) {
        let worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(worker) = worker {
            let _ = worker.shutdown.send(true);
            if let Err(err) = worker.handle.await {
                warn!(?err, "bot link worker ended abnormally");
            }
            self.inner.set_state(worker.generation, ConnectionState::Disconnected, None);
            info!("bot link stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock_link().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Queue a command for the bot.
    ///
    /// Returns `Ok(false)` when there is no live connection. Fails only when
    /// `data` cannot be serialized as a JSON object.
    pub fn send<T>(&self, command: &str, data: &T) -> Result<bool, LinkError>
    where
        T: Serialize + ?Sized,
    {
        let mut link = self.inner.lock_link();
        let Some(outbound) = link.outbound.as_ref() else {
            return Ok(false);
        };

        let bytes = encode(command, data)?;
        if outbound.send(bytes).is_err() {
            link.outbound = None;
            link.state = ConnectionState::Disconnected;
            return Ok(false);
        }

        debug!(command, "queued command");
        Ok(true)
    }
}

impl Inner {
    fn lock_link(&self) -> MutexGuard<'_, LinkState> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_generation(&self) -> u64 {
        let mut link = self.lock_link();
        link.generation += 1;
        link.generation
    }

    /// Ignored when a newer worker has been started since `generation`
    fn set_state(
        &self,
        generation: u64,
        state: ConnectionState,
        outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    ) {
        let mut link = self.lock_link();
        if link.generation != generation {
            return;
        }
        link.state = state;
        link.outbound = outbound;
    }

    async fn run(self: Arc<Self>, generation: u64, mut shutdown: watch::Receiver<bool>) {
        let addr = self.config.address();

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(generation, ConnectionState::Connecting, None);
            let connected = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.connect(&addr) => result,
            };

            let delay = match connected {
                Ok(stream) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    self.set_state(generation, ConnectionState::Connected, Some(tx));
                    info!(addr = %addr, "connected to bot");
                    self.bus.emit(LinkEvent::Connected);

                    let outcome = self.run_session(stream, rx, &mut shutdown).await;
                    self.set_state(generation, ConnectionState::Disconnected, None);

                    match outcome {
                        Ok(SessionEnd::Shutdown) => {
                            info!(addr = %addr, "disconnected from bot");
                            self.bus.emit(LinkEvent::Disconnected);
                            break;
                        }
                        Ok(SessionEnd::PeerClosed) => {
                            info!(addr = %addr, "bot closed the connection");
                            self.bus.emit(LinkEvent::Disconnected);
                        }
                        Err(err) => {
                            warn!(%err, addr = %addr, "bot connection lost");
                            self.bus.emit(LinkEvent::Disconnected);
                            self.bus.emit(LinkEvent::Error(err.to_string()));
                        }
                    }
                    self.config.reconnect_delay()
                }
                Err(err) => {
                    self.set_state(generation, ConnectionState::Disconnected, None);
                    warn!(%err, addr = %addr, "failed to connect to bot");
                    self.bus.emit(LinkEvent::Error(err.to_string()));
                    self.config.retry_backoff()
                }
            };

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep(delay) => {}
            }
        }

        self.set_state(generation, ConnectionState::Disconnected, None);
    }

    async fn connect(&self, addr: &str) -> Result<TcpStream, LinkError> {
        let limit = self.config.connect_timeout();
        match timeout(limit, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                Ok(stream)
            }
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(LinkError::ConnectTimeout {
                addr: addr.to_string(),
                timeout: limit,
            }),
        }
    }

    async fn run_session(
        &self,
        stream: TcpStream,
        mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, LinkError> {
        let (mut reader, mut writer) = stream.into_split();
        let mut decoder = LineDecoder::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let read_timeout = self.config.read_timeout();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    let _ = writer.shutdown().await;
                    return Ok(SessionEnd::Shutdown);
                }
                Some(frame) = outbound.recv() => {
                    writer.write_all(&frame).await?;
                }
                read = timeout(read_timeout, reader.read(&mut buf)) => {
                    match read {
                        // Idle bot; go round and look at shutdown/outbound again
                        Err(_) => continue,
                        Ok(Ok(0)) => return Ok(SessionEnd::PeerClosed),
                        Ok(Ok(n)) => {
                            for value in decoder.feed(&buf[..n]) {
                                self.dispatch(value);
                            }
                        }
                        Ok(Err(err)) => return Err(err.into()),
                    }
                }
            }
        }
    }

    fn dispatch(&self, value: serde_json::Value) {
        match serde_json::from_value::<InboundMessage>(value) {
            Ok(message) => self.sink.handle(message),
            Err(err) => {
                let err = LinkError::Protocol(err);
                debug!(%err, "dropping message with unexpected shape");
            }
        }
    }
}
