//! Minimal dev server for entry mode tests: serves one module at any path
//! and upgrades `/watcher` to a websocket driven by a [`WatcherScript`].

use crate::config::DEFAULT_WATCHER_PATH;
use crate::entry::socket::RELOAD_COMMAND;
use std::net::SocketAddr;
use std::time::Duration;
use tiny_http::{Header, Request, Response, Server, StatusCode};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocket};
use tokio_tungstenite::tungstenite::Message;

/// What the watcher endpoint does after accepting
#[derive(Clone, Copy)]
pub enum WatcherScript {
    /// Collect messages until the client closes
    Listen,
    /// Close the connection after the first message
    CloseAfterFirst,
    /// Wait, send `reload`, wait again, close
    ReloadThenClose(Duration),
}

pub struct DevServer {
    pub addr: SocketAddr,
    pub messages: mpsc::UnboundedReceiver<String>,
}

impl DevServer {
    pub fn start(wasm: Vec<u8>, script: WatcherScript) -> Self {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let (tx, messages) = mpsc::unbounded_channel();

        std::thread::spawn(move || {
            for request in server.incoming_requests() {
                if request.url() == DEFAULT_WATCHER_PATH {
                    let tx = tx.clone();
                    std::thread::spawn(move || serve_watcher(request, tx, script));
                } else {
                    let response = Response::from_data(wasm.clone())
                        .with_header(header("Content-Type", "application/wasm"));
                    let _ = request.respond(response);
                }
            }
        });

        Self { addr, messages }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

fn header(name: &str, value: &str) -> Header {
    Header::from_bytes(name, value).unwrap()
}

fn serve_watcher(request: Request, tx: mpsc::UnboundedSender<String>, script: WatcherScript) {
    let key = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Sec-WebSocket-Key"))
        .map(|h| h.value.as_str().to_string());
    let Some(key) = key else {
        let _ = request.respond(Response::empty(StatusCode(400)));
        return;
    };

    let response = Response::empty(StatusCode(101))
        .with_header(header("Sec-WebSocket-Accept", &derive_accept_key(key.as_bytes())));
    let stream = request.upgrade("websocket", response);
    let mut ws = WebSocket::from_raw_socket(stream, Role::Server, None);

    match script {
        WatcherScript::Listen => {}
        WatcherScript::CloseAfterFirst => {
            while let Ok(frame) = ws.read() {
                if let Message::Text(text) = frame {
                    let _ = tx.send(text);
                    let _ = ws.close(None);
                    break;
                }
            }
        }
        WatcherScript::ReloadThenClose(delay) => {
            std::thread::sleep(delay);
            let _ = ws.send(Message::Text(RELOAD_COMMAND.to_string()));
            std::thread::sleep(delay);
            let _ = ws.close(None);
        }
    }

    // Collect until the close handshake completes.
    while let Ok(frame) = ws.read() {
        if let Message::Text(text) = frame {
            let _ = tx.send(text);
        }
    }
}
