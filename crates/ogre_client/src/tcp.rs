//! Blocking TCP transport.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::transport::{ReplicaTransport, Subscription, UpdateSink, UpdateSubscriber};
use ogre_core::{GraphUpdate, TypeDomain};
use ogre_protocol::{
    frame, read_envelope, CborCodec, EnvelopeReader, MessageCodec, ProtocolError, RequestCode,
    RequestTarget, WireMessage,
};
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

/// Talks to a replication server over TCP, one connection per request.
///
/// Fetches block the calling thread. Each subscription owns a dedicated
/// reader thread that calls the sink for every update received.
pub struct TcpTransport {
    config: ClientConfig,
    codec: Arc<dyn MessageCodec>,
}

impl TcpTransport {
    /// Creates a transport using the CBOR codec.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_codec(config, Arc::new(CborCodec))
    }

    /// Creates a transport with a custom codec.
    pub fn with_codec(config: ClientConfig, codec: Arc<dyn MessageCodec>) -> Self {
        Self { config, codec }
    }

    /// The configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn open(&self, code: RequestCode, target: &RequestTarget) -> ClientResult<TcpStream> {
        let mut stream =
            TcpStream::connect_timeout(&self.config.server_addr, self.config.connect_timeout)?;
        stream.set_nodelay(true)?;

        let mut request = vec![u8::from(code)];
        request.extend(frame(
            self.codec.as_ref(),
            &WireMessage::Request(target.clone()),
        )?);
        stream.write_all(&request)?;
        stream.flush()?;
        debug!(server = %self.config.server_addr, request = %code, target = %target, "request sent");
        Ok(stream)
    }

    fn fetch(&self, code: RequestCode, target: &RequestTarget) -> ClientResult<WireMessage> {
        let mut stream = self.open(code, target)?;
        stream.set_read_timeout(Some(self.config.read_timeout))?;
        let payload = read_envelope(&mut stream, self.config.max_payload_len)?;
        match self.codec.decode(&payload)? {
            WireMessage::NotFound(what) => Err(ClientError::NotFound(what)),
            message => Ok(message),
        }
    }
}

impl ReplicaTransport for TcpTransport {
    fn fetch_type_domain(&self, type_domain_id: &str) -> ClientResult<TypeDomain> {
        let target = RequestTarget::type_domain(type_domain_id);
        match self.fetch(RequestCode::FetchTypeDomain, &target)? {
            WireMessage::TypeDomain(domain) => Ok(domain),
            other => Err(unexpected("type-domain", &other)),
        }
    }

    fn fetch_snapshot(&self, target: &RequestTarget) -> ClientResult<GraphUpdate> {
        match self.fetch(RequestCode::FetchSnapshot, target)? {
            WireMessage::Snapshot(snapshot) => Ok(snapshot),
            other => Err(unexpected("snapshot", &other)),
        }
    }
}

impl UpdateSubscriber for TcpTransport {
    fn subscribe(
        &self,
        target: &RequestTarget,
        mut sink: UpdateSink,
    ) -> ClientResult<Box<dyn Subscription>> {
        let stream = self.open(RequestCode::Subscribe, target)?;
        stream.set_read_timeout(None)?;
        let reader_stream = stream.try_clone()?;
        let closed = Arc::new(AtomicBool::new(false));

        let codec = Arc::clone(&self.codec);
        let max_payload_len = self.config.max_payload_len;
        let reader_closed = Arc::clone(&closed);
        let label = target.to_string();
        let thread = thread::Builder::new()
            .name(format!("ogre-subscription-{label}"))
            .spawn(move || {
                let mut reader = EnvelopeReader::new(reader_stream, max_payload_len);
                let outcome = read_updates(&mut reader, codec.as_ref(), &mut sink);
                if reader_closed.load(Ordering::SeqCst) {
                    debug!(target = %label, "subscription closed locally");
                    return;
                }
                match outcome {
                    Ok(()) => {
                        debug!(target = %label, "subscription ended by server");
                        sink(Err(ClientError::SubscriptionClosed));
                    }
                    Err(e) => {
                        warn!(target = %label, error = %e, "subscription failed");
                        sink(Err(e));
                    }
                }
            })?;

        Ok(Box::new(TcpSubscription {
            stream,
            closed,
            thread: Some(thread),
        }))
    }
}

/// Reads updates until the stream ends cleanly or fails.
fn read_updates(
    reader: &mut EnvelopeReader<TcpStream>,
    codec: &dyn MessageCodec,
    sink: &mut UpdateSink,
) -> ClientResult<()> {
    while let Some(payload) = reader.next_envelope()? {
        match codec.decode(&payload)? {
            WireMessage::Update(update) => {
                trace!(version = update.data_version, "update received");
                sink(Ok(update));
            }
            WireMessage::NotFound(what) => return Err(ClientError::NotFound(what)),
            other => return Err(unexpected("update", &other)),
        }
    }
    Ok(())
}

fn unexpected(expected: &'static str, found: &WireMessage) -> ClientError {
    ProtocolError::UnexpectedMessage {
        expected,
        found: found.kind(),
    }
    .into()
}

/// A subscription backed by one TCP connection and one reader thread.
struct TcpSubscription {
    stream: TcpStream,
    closed: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Subscription for TcpSubscription {
    fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Unblocks the reader thread.
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(thread) = self.thread.take() {
            // A sink may drop its own subscription; never join ourselves.
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }

    fn is_active(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for TcpSubscription {
    fn drop(&mut self) {
        self.close();
    }
}
