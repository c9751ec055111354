//! Watcher socket protocol.
//!
//! One websocket connection per process. Outbound messages are JSON
//! objects tagged by `kind` and go through an unbounded channel to a
//! single writer task; the reader task only listens for `reload`.

use crate::error::Result;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Inbound command asking for a reload
pub const RELOAD_COMMAND: &str = "reload";

/// Outbound socket message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SocketMessage {
    /// Host stack trace captured when the module wrote to stderr
    StackTrace {
        /// Captured trace
        #[serde(rename = "stackTrace")]
        stack_trace: String,
    },
    /// Accumulated stdout of a test run
    TestRunOutput {
        /// Output text
        #[serde(rename = "testRunOutput")]
        test_run_output: String,
    },
    /// The test run exited with code 0
    TestPassed,
    /// The test run failed or crashed
    ErrorReport {
        /// Error description
        #[serde(rename = "errorReport")]
        error_report: String,
    },
}

impl SocketMessage {
    /// Capture the current host stack trace
    pub fn stack_trace() -> Self {
        SocketMessage::StackTrace {
            stack_trace: std::backtrace::Backtrace::force_capture().to_string(),
        }
    }

    /// Encode as a JSON text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Whether an inbound text frame is the reload command. Accepts the raw
/// word and its JSON string encoding.
pub fn is_reload(text: &str) -> bool {
    let text = text.trim();
    text == RELOAD_COMMAND
        || serde_json::from_str::<String>(text)
            .map(|command| command == RELOAD_COMMAND)
            .unwrap_or(false)
}

/// Destination of outbound messages
pub trait ReportSink: Send + Sync {
    /// Queue a message; never blocks
    fn send(&self, message: SocketMessage);
}

enum Outbound {
    Message(SocketMessage),
    Close,
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ReportSink for ChannelSink {
    fn send(&self, message: SocketMessage) {
        if self.tx.send(Outbound::Message(message)).is_err() {
            debug!("Watcher socket writer gone, dropping message");
        }
    }
}

/// Connection to the dev server's watcher endpoint
pub struct WatcherSocket {
    tx: mpsc::UnboundedSender<Outbound>,
    reload: Arc<Notify>,
    closed: watch::Receiver<bool>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl WatcherSocket {
    /// Connect to `url` (`ws://host/watcher`)
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
        info!(url = url, "Connected to watcher socket");

        let (mut write, mut read) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        let reload = Arc::new(Notify::new());
        let (closed_tx, closed) = watch::channel(false);

        let writer = tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                let message = match outbound {
                    Outbound::Message(message) => message,
                    Outbound::Close => break,
                };
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode socket message");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!(error = %e, "Failed to send socket message");
                    break;
                }
            }
            let _ = write.close().await;
        });

        let reload_notify = Arc::clone(&reload);
        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) if is_reload(&text) => {
                        info!("Reload requested by watcher");
                        reload_notify.notify_one();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Watcher socket failed");
                        break;
                    }
                }
            }
            info!("Watcher socket closed");
            let _ = closed_tx.send(true);
        });

        Ok(Self {
            tx,
            reload,
            closed,
            writer,
            reader,
        })
    }

    /// A sink queuing messages on this connection
    pub fn sink(&self) -> Arc<dyn ReportSink> {
        Arc::new(ChannelSink { tx: self.tx.clone() })
    }

    /// Wait for the next reload command
    pub async fn reload_requested(&self) {
        self.reload.notified().await;
    }

    /// Wait until the server closed the connection
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Flush queued messages and close the connection
    pub async fn close(self) {
        let _ = self.tx.send(Outbound::Close);
        if let Err(e) = self.writer.await {
            warn!(error = %e, "Watcher socket writer panicked");
        }
        self.reader.abort();
    }
}
