// Subscriber for the per-RFQ bid channel (`/ws/rfqs/{id}/`).
//
// One subscription task owns one socket. It reports connection state changes
// and decoded `bid_placed` bids to the session, tagged with the generation it
// was started for, and stops as soon as its cancellation token fires. Once
// cancelled it sends nothing further and closes the socket exactly once.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use reqwest::Url;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{parse_channel_message, Bid, ChannelMessage, RfqId};

/// Upper bound on sending our close frame during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;
pub type MessageSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Both halves of an open bid channel socket.
pub struct BidSocket {
    pub sink: MessageSink,
    pub stream: MessageStream,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("cannot derive a channel address from `{base}`: {reason}")]
    Address { base: String, reason: String },

    #[error("websocket connect failed: {0}")]
    Connect(#[from] WsError),

    #[error("websocket connect timed out after {0:?}")]
    ConnectTimeout(Duration),
}

// ---------------------------------------------------------------------------
// Connection state and events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Live,
    /// The server closed the channel or the stream ended.
    Disconnected,
    /// Transport failure or connect failure. Not retried.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Live => "Live",
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Error => "Connection Error",
        };
        f.write_str(label)
    }
}

/// Emitted by a subscription task. `generation` identifies the RFQ view the
/// task belongs to so the session can drop events from torn-down views.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    State {
        state: ConnectionState,
        generation: u64,
    },
    BidPlaced {
        bid: Bid,
        generation: u64,
    },
}

impl StreamEvent {
    pub fn generation(&self) -> u64 {
        match self {
            StreamEvent::State { generation, .. } | StreamEvent::BidPlaced { generation, .. } => {
                *generation
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Addressing
// ---------------------------------------------------------------------------

/// Derive the channel address from the REST base address: `http` becomes
/// `ws`, `https` becomes `wss`, host and port are kept, and the base path is
/// replaced with `/ws/rfqs/{id}/`.
pub fn channel_url(api_base: &Url, rfq_id: RfqId) -> Result<Url, StreamError> {
    let address_error = |reason: String| StreamError::Address {
        base: api_base.to_string(),
        reason,
    };

    let scheme = match api_base.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(address_error(format!("unsupported scheme `{other}`"))),
    };

    let mut url = api_base.clone();
    url.set_scheme(scheme)
        .map_err(|()| address_error(format!("cannot switch to `{scheme}`")))?;
    url.set_path(&format!("/ws/rfqs/{rfq_id}/"));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

// ---------------------------------------------------------------------------
// Connector seam
// ---------------------------------------------------------------------------

/// Opens bid channel sockets. The session only talks to this trait so it can
/// be driven by in-memory sockets.
#[async_trait]
pub trait BidStreamConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<BidSocket, StreamError>;
}

/// Production connector backed by `tokio-tungstenite`.
pub struct TungsteniteConnector {
    connect_timeout: Duration,
}

impl TungsteniteConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl BidStreamConnector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<BidSocket, StreamError> {
        let connecting = tokio_tungstenite::connect_async(url.as_str());
        let (ws_stream, response) = tokio::time::timeout(self.connect_timeout, connecting)
            .await
            .map_err(|_| StreamError::ConnectTimeout(self.connect_timeout))??;
        debug!(status = ?response.status(), "WebSocket handshake complete");

        let (sink, stream) = ws_stream.split();
        Ok(BidSocket {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Why [`pump_messages`] stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    Cancelled,
    PeerClosed,
    Failed,
    ReceiverGone,
}

/// Read frames from `stream` in delivery order, forwarding decoded bids
/// through `tx`, until the peer closes, the transport fails, `tx` is closed,
/// or `cancel` fires.
///
/// Generic over the stream type so it can be exercised with in-memory
/// streams.
pub async fn pump_messages<St>(
    stream: &mut St,
    tx: &mpsc::Sender<StreamEvent>,
    generation: u64,
    cancel: &CancellationToken,
) -> PumpExit
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return PumpExit::Cancelled,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => match parse_channel_message(text.as_str()) {
                Ok(ChannelMessage::BidPlaced(bid)) => {
                    debug!(bid = %bid.id, line_item = %bid.line_item, "bid_placed received");
                    if !forward(tx, StreamEvent::BidPlaced { bid, generation }, cancel).await {
                        return if cancel.is_cancelled() {
                            PumpExit::Cancelled
                        } else {
                            PumpExit::ReceiverGone
                        };
                    }
                }
                Ok(ChannelMessage::Ignored(kind)) => {
                    debug!(kind, "Ignoring channel event");
                }
                Err(e) => {
                    warn!("Dropping malformed channel frame: {e}");
                }
            },
            Some(Ok(Message::Close(frame))) => {
                info!(?frame, "Bid channel closed by server");
                return PumpExit::PeerClosed;
            }
            Some(Ok(_)) => {
                // Binary, Ping, Pong and raw frames carry nothing for us.
            }
            Some(Err(e)) => {
                warn!("Bid channel transport error: {e}");
                return PumpExit::Failed;
            }
            None => {
                info!("Bid channel stream ended");
                return PumpExit::PeerClosed;
            }
        }
    }
}

/// Run one subscription to `url` until it ends or `cancel` fires.
///
/// The caller has already put the view into `Connecting`. This task reports
/// `Live` on open and `Disconnected`/`Error` when the channel ends on its
/// own. Nothing is reported after cancellation.
pub async fn run_subscription(
    connector: Arc<dyn BidStreamConnector>,
    url: Url,
    generation: u64,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) {
    info!(%url, generation, "Connecting to bid channel");

    let connected = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            debug!(generation, "Subscription cancelled before connect finished");
            return;
        }
        res = connector.connect(&url) => res,
    };

    let BidSocket {
        mut sink,
        mut stream,
    } = match connected {
        Ok(socket) => socket,
        Err(e) => {
            warn!(%url, "Bid channel connect failed: {e}");
            let error = StreamEvent::State {
                state: ConnectionState::Error,
                generation,
            };
            forward(&tx, error, &cancel).await;
            return;
        }
    };

    if cancel.is_cancelled() {
        close_socket(&mut sink).await;
        return;
    }

    info!(generation, "Bid channel live");
    let live = StreamEvent::State {
        state: ConnectionState::Live,
        generation,
    };
    if !forward(&tx, live, &cancel).await {
        close_socket(&mut sink).await;
        return;
    }

    let final_state = match pump_messages(&mut stream, &tx, generation, &cancel).await {
        PumpExit::Cancelled | PumpExit::ReceiverGone => {
            close_socket(&mut sink).await;
            return;
        }
        PumpExit::PeerClosed => ConnectionState::Disconnected,
        PumpExit::Failed => ConnectionState::Error,
    };
    let ended = StreamEvent::State {
        state: final_state,
        generation,
    };
    forward(&tx, ended, &cancel).await;
}

/// Send `event` unless `cancel` fires first. Returns false if it was not
/// delivered.
async fn forward(
    tx: &mpsc::Sender<StreamEvent>,
    event: StreamEvent,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

async fn close_socket(sink: &mut MessageSink) {
    let closing = async {
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!("Close frame not delivered: {e}");
        }
        if let Err(e) = sink.close().await {
            debug!("Socket close failed: {e}");
        }
    };
    if tokio::time::timeout(CLOSE_TIMEOUT, closing).await.is_err() {
        warn!("Timed out closing bid channel socket");
        return;
    }
    debug!("Bid channel socket closed");
}
