//! TCP listener speaking the request protocol.

use crate::config::ServerConfig;
use crate::engine::ServerEngine;
use crate::error::{ServerError, ServerResult};
use crate::hub::SubscriptionHub;
use ogre_protocol::{
    check_magic, frame, parse_length, MessageCodec, ProtocolError, ProtocolResult, RequestCode,
    RequestTarget, WireMessage, LENGTH_LEN,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The replication server.
///
/// One accepted connection is one conversation: a request code byte, an
/// enveloped [`RequestTarget`], then either a single reply envelope or, for
/// subscriptions, a stream of update envelopes.
///
/// # Example
///
/// ```no_run
/// use ogre_protocol::CborCodec;
/// use ogre_server::{ReplicationServer, ServerConfig, ServerEngine, SubscriptionHub};
/// use std::sync::Arc;
///
/// # async fn run() -> ogre_server::ServerResult<()> {
/// let hub = Arc::new(SubscriptionHub::new(Arc::new(CborCodec)));
/// let mut engine = ServerEngine::new();
/// // engine.add_data_source(...)?;
/// engine.set_publisher(hub.clone())?;
/// engine.initialise()?;
///
/// let handle = ReplicationServer::new(ServerConfig::default(), engine, hub)
///     .start()
///     .await?;
/// println!("listening on {}", handle.local_addr());
/// handle.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct ReplicationServer {
    config: ServerConfig,
    engine: Arc<ServerEngine>,
    hub: Arc<SubscriptionHub>,
}

struct Shared {
    engine: Arc<ServerEngine>,
    hub: Arc<SubscriptionHub>,
    max_payload_len: usize,
}

impl ReplicationServer {
    /// Creates a server over an initialised engine whose publisher is `hub`.
    pub fn new(config: ServerConfig, engine: ServerEngine, hub: Arc<SubscriptionHub>) -> Self {
        Self {
            config,
            engine: Arc::new(engine),
            hub,
        }
    }

    /// The engine answering lookups.
    pub fn engine(&self) -> &Arc<ServerEngine> {
        &self.engine
    }

    /// Binds the listener and starts accepting connections.
    ///
    /// # Errors
    ///
    /// `Configuration` if the engine is not initialised, or an I/O error
    /// if the address cannot be bound.
    pub async fn start(self) -> ServerResult<ServerHandle> {
        if !self.engine.is_initialised() {
            return Err(ServerError::configuration(
                "server engine must be initialised before start",
            ));
        }

        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "replication server listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            engine: self.engine,
            hub: Arc::clone(&self.hub),
            max_payload_len: self.config.max_payload_len,
        });
        let task = tokio::spawn(accept_loop(listener, shared, shutdown_rx));

        Ok(ServerHandle {
            local_addr,
            hub: self.hub,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    hub: Arc<SubscriptionHub>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and ends every subscription stream.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.hub.close_all();
        if let Err(e) = self.task.await {
            warn!(error = %e, "accept loop ended abnormally");
        }
        info!(addr = %self.local_addr, "replication server stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let shared = Arc::clone(&shared);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, shared, shutdown).await {
                            if e.is_client_error() {
                                warn!(%peer, error = %e, "protocol error, connection closed");
                            } else {
                                debug!(%peer, error = %e, "connection ended with error");
                            }
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
            _ = shutdown.changed() => break,
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    shutdown: watch::Receiver<bool>,
) -> ServerResult<()> {
    let _ = stream.set_nodelay(true);

    let code = match stream.read_u8().await {
        Ok(byte) => RequestCode::try_from(byte)?,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            debug!(%peer, "connection closed before request");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let payload = read_envelope(&mut stream, shared.max_payload_len).await?;
    let target = match shared.hub.codec().decode(&payload)? {
        WireMessage::Request(target) => target,
        other => {
            return Err(ProtocolError::UnexpectedMessage {
                expected: "request",
                found: other.kind(),
            }
            .into())
        }
    };
    debug!(%peer, request = %code, target = %target, "request received");

    match code {
        RequestCode::FetchTypeDomain => {
            let reply = match shared.engine.type_domain(&target.type_domain_id) {
                Ok(domain) => WireMessage::TypeDomain(domain.as_ref().clone()),
                Err(e) => not_found(peer, e)?,
            };
            reply_once(&mut stream, &shared, &reply).await
        }
        RequestCode::FetchSnapshot => {
            let reply = match shared
                .engine
                .object_graph(&target.type_domain_id, &target.object_graph_id)
            {
                Ok(snapshot) => WireMessage::Snapshot(snapshot),
                Err(e) => not_found(peer, e)?,
            };
            reply_once(&mut stream, &shared, &reply).await
        }
        RequestCode::Subscribe => {
            if !shared
                .engine
                .has_object_graph(&target.type_domain_id, &target.object_graph_id)
            {
                let reply = WireMessage::NotFound(format!("object graph '{target}'"));
                return reply_once(&mut stream, &shared, &reply).await;
            }
            stream_updates(stream, peer, target, &shared, shutdown).await
        }
    }
}

fn not_found(peer: SocketAddr, error: ServerError) -> ServerResult<WireMessage> {
    match error {
        ServerError::NotFound(what) => {
            debug!(%peer, %what, "not found");
            Ok(WireMessage::NotFound(what))
        }
        other => Err(other),
    }
}

async fn reply_once(
    stream: &mut TcpStream,
    shared: &Shared,
    message: &WireMessage,
) -> ServerResult<()> {
    let bytes = frame(shared.hub.codec().as_ref(), message)?;
    stream.write_all(&bytes).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn stream_updates(
    stream: TcpStream,
    peer: SocketAddr,
    target: RequestTarget,
    shared: &Shared,
    mut shutdown: watch::Receiver<bool>,
) -> ServerResult<()> {
    let (mut reader, mut writer) = stream.into_split();
    let (id, mut queue) = shared.hub.subscribe(target);
    info!(%peer, subscriber = id, "subscription opened");

    let mut scratch = [0u8; 64];
    let result = loop {
        tokio::select! {
            next = queue.recv() => match next {
                Some(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        break Err(e.into());
                    }
                }
                // hub dropped us: server shutting down
                None => break Ok(()),
            },
            read = reader.read(&mut scratch) => match read {
                Ok(0) => break Ok(()),
                // clients send nothing after the request; ignore it
                Ok(_) => {}
                Err(e) => break Err(e.into()),
            },
            _ = shutdown.changed() => break Ok(()),
        }
    };

    shared.hub.unsubscribe(id);
    let _ = writer.shutdown().await;
    info!(%peer, subscriber = id, "subscription closed");
    result
}

/// Async counterpart of `ogre_protocol::read_envelope`.
async fn read_envelope<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_payload_len: usize,
) -> ProtocolResult<Vec<u8>> {
    let mut magic = [0u8; 6];
    fill_exact(reader, &mut magic).await?;
    check_magic(&magic)?;

    let mut length = [0u8; LENGTH_LEN];
    fill_exact(reader, &mut length).await?;
    let len = parse_length(length, max_payload_len)?;

    let mut payload = vec![0u8; len];
    fill_exact(reader, &mut payload).await?;
    Ok(payload)
}

async fn fill_exact<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> ProtocolResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(ProtocolError::TruncatedStream {
                expected: buf.len(),
                actual: filled,
            });
        }
        filled += n;
    }
    Ok(())
}
