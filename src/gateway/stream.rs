//! Streaming market-data client.
//!
//! The gateway exposes a socket that pushes LTP, quote, and depth messages
//! for subscribed instruments. One `StreamClient` is shared by the whole
//! process: executions running in parallel subscribe and unsubscribe
//! through it concurrently, so the subscription registry and connection
//! state are lock-guarded here rather than in the callers.
//!
//! Delivery is callback-based: `subscribe` registers a callback for one
//! `(mode, exchange, symbol)` instrument and the reader task invokes it for
//! every matching message. Streaming node handlers wrap the callback
//! around a one-shot channel and wait for the first message with a bounded
//! timeout (see `handlers::streaming`).

use futures_util::{SinkExt, StreamExt};
use miette::Diagnostic;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Default wait for the first streamed message before handlers fall back
/// to the synchronous REST query.
pub const FIRST_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Which stream a subscription listens to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamMode {
    Ltp,
    Quote,
    Depth,
}

impl StreamMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamMode::Ltp => "ltp",
            StreamMode::Quote => "quote",
            StreamMode::Depth => "depth",
        }
    }

    /// Parse a stream-type tag; `None` for `"all"` or anything unknown.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ltp" => Some(StreamMode::Ltp),
            "quote" => Some(StreamMode::Quote),
            "depth" => Some(StreamMode::Depth),
            _ => None,
        }
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum StreamError {
    #[error("failed to connect to streaming endpoint {url}: {source}")]
    #[diagnostic(
        code(tradeweave::stream::connect),
        help("Check the streaming URL in settings and that the gateway is running.")
    )]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("streaming channel is not connected")]
    #[diagnostic(code(tradeweave::stream::not_connected))]
    NotConnected,
}

/// Callback invoked with the message payload for a subscribed instrument.
pub type StreamCallback = Arc<dyn Fn(&Value) + Send + Sync>;

struct Subscription {
    mode: StreamMode,
    exchange: String,
    symbol: String,
    callback: StreamCallback,
}

enum ConnState {
    Disconnected,
    Connected {
        outbound: mpsc::UnboundedSender<String>,
        tasks: Vec<JoinHandle<()>>,
        // Held only by the test stub to keep the outbound channel open.
        _parked: Option<mpsc::UnboundedReceiver<String>>,
    },
}

struct Inner {
    ws_url: String,
    api_key: String,
    first_message_timeout: Duration,
    state: Mutex<ConnState>,
    subs: Mutex<Vec<Subscription>>,
}

impl Inner {
    /// Route an incoming socket message to matching subscriptions.
    ///
    /// Expected shape: `{"type": "market_data", "mode": "ltp",
    /// "exchange": "NSE", "symbol": "RELIANCE", "data": {…}}`.
    fn dispatch(&self, message: &Value) {
        let Some(mode) = message
            .get("mode")
            .and_then(Value::as_str)
            .and_then(StreamMode::parse)
        else {
            return;
        };
        let exchange = message.get("exchange").and_then(Value::as_str).unwrap_or("");
        let symbol = message.get("symbol").and_then(Value::as_str).unwrap_or("");
        let payload = message.get("data").cloned().unwrap_or(Value::Null);

        // Callbacks are cloned out so the registry lock is not held while
        // user code runs.
        let matching: Vec<StreamCallback> = {
            let subs = self.subs.lock();
            subs.iter()
                .filter(|s| s.mode == mode && s.exchange == exchange && s.symbol == symbol)
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };
        for callback in matching {
            callback(&payload);
        }
    }

    fn send_frame(&self, frame: String) -> Result<(), StreamError> {
        let state = self.state.lock();
        match &*state {
            ConnState::Connected { outbound, .. } => {
                outbound.send(frame).map_err(|_| StreamError::NotConnected)
            }
            ConnState::Disconnected => Err(StreamError::NotConnected),
        }
    }
}

/// Process-global streaming client. Clones share the same connection and
/// registry.
#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<Inner>,
    connect_lock: Arc<tokio::sync::Mutex<()>>,
}

impl fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamClient")
            .field("ws_url", &self.inner.ws_url)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl StreamClient {
    #[must_use]
    pub fn new(ws_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                ws_url: ws_url.into(),
                api_key: api_key.into(),
                first_message_timeout: FIRST_MESSAGE_TIMEOUT,
                state: Mutex::new(ConnState::Disconnected),
                subs: Mutex::new(Vec::new()),
            }),
            connect_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Override the first-message wait used by streaming handlers.
    #[must_use]
    pub fn with_first_message_timeout(mut self, timeout: Duration) -> Self {
        let inner = Arc::get_mut(&mut self.inner).map(|inner| {
            inner.first_message_timeout = timeout;
        });
        if inner.is_none() {
            warn!("first-message timeout override ignored on shared client");
        }
        self
    }

    #[must_use]
    pub fn first_message_timeout(&self) -> Duration {
        self.inner.first_message_timeout
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(&*self.inner.state.lock(), ConnState::Connected { .. })
    }

    /// Open the socket if it is not already open. Concurrent callers are
    /// serialized; losers of the race see the winner's connection.
    pub async fn connect(&self) -> Result<(), StreamError> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let (socket, _) =
            connect_async(self.inner.ws_url.as_str())
                .await
                .map_err(|source| StreamError::Connect {
                    url: self.inner.ws_url.clone(),
                    source,
                })?;
        debug!(url = %self.inner.ws_url, "streaming socket connected");

        let (mut write, mut read) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if write.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let inner = Arc::clone(&self.inner);
        let reader = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if let Ok(value) = serde_json::from_str::<Value>(&text) {
                            inner.dispatch(&value);
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            *inner.state.lock() = ConnState::Disconnected;
            debug!("streaming socket closed");
        });

        let auth = json!({ "action": "authenticate", "api_key": self.inner.api_key }).to_string();
        let _ = tx.send(auth);

        *self.inner.state.lock() = ConnState::Connected {
            outbound: tx,
            tasks: vec![writer, reader],
            _parked: None,
        };
        Ok(())
    }

    /// Register a callback for one instrument and ask the gateway to start
    /// streaming it.
    pub fn subscribe(
        &self,
        mode: StreamMode,
        exchange: &str,
        symbol: &str,
        callback: StreamCallback,
    ) -> Result<(), StreamError> {
        self.inner.send_frame(
            json!({
                "action": "subscribe",
                "mode": mode.as_str(),
                "exchange": exchange,
                "symbol": symbol,
            })
            .to_string(),
        )?;
        self.inner.subs.lock().push(Subscription {
            mode,
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            callback,
        });
        Ok(())
    }

    /// Drop every registration for one instrument/mode and tell the
    /// gateway to stop streaming it.
    pub fn unsubscribe(
        &self,
        mode: StreamMode,
        exchange: &str,
        symbol: &str,
    ) -> Result<(), StreamError> {
        self.inner
            .subs
            .lock()
            .retain(|s| !(s.mode == mode && s.exchange == exchange && s.symbol == symbol));
        self.inner.send_frame(
            json!({
                "action": "unsubscribe",
                "mode": mode.as_str(),
                "exchange": exchange,
                "symbol": symbol,
            })
            .to_string(),
        )
    }

    /// Close the socket and clear every subscription.
    pub fn disconnect(&self) {
        let mut state = self.inner.state.lock();
        if let ConnState::Connected { tasks, .. } =
            std::mem::replace(&mut *state, ConnState::Disconnected)
        {
            for task in tasks {
                task.abort();
            }
        }
        drop(state);
        self.inner.subs.lock().clear();
    }

    /// Feed a message through dispatch as if it arrived on the socket.
    #[cfg(test)]
    pub(crate) fn inject(&self, message: &Value) {
        self.inner.dispatch(message);
    }

    /// A client in connected state without a real socket, for handler
    /// tests that drive dispatch by hand.
    #[cfg(test)]
    pub(crate) fn connected_stub(timeout: Duration) -> Self {
        let client = StreamClient::new("ws://stub", "test").with_first_message_timeout(timeout);
        let (tx, rx) = mpsc::unbounded_channel();
        *client.inner.state.lock() = ConnState::Connected {
            outbound: tx,
            tasks: Vec::new(),
            _parked: Some(rx),
        };
        client
    }
}
