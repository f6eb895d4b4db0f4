//! Mock IRC-over-WebSocket chat server.
//!
//! Records every line the client sends (handshake and PRIVMSGs) and lets
//! tests inject inbound lines — tagged PRIVMSGs, PINGs — toward the most
//! recent connection.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, broadcast};
use tokio_tungstenite::tungstenite::protocol::Message;

pub struct MockChat {
    addr: SocketAddr,
    inbound: broadcast::Sender<String>,
    received: Arc<Mutex<Vec<String>>>,
}

impl MockChat {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock chat");
        let addr = listener.local_addr().expect("local addr");
        let (inbound, _) = broadcast::channel::<String>(256);
        let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let inbound_accept = inbound.clone();
        let received_accept = received.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _peer)) = listener.accept().await else {
                    break;
                };
                let inbound_rx = inbound_accept.subscribe();
                let received = received_accept.clone();
                tokio::spawn(serve_connection(stream, inbound_rx, received));
            }
        });

        MockChat {
            addr,
            inbound,
            received,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Deliver one raw IRC line to the connected client.
    pub fn send_line(&self, line: &str) {
        let _ = self.inbound.send(line.to_owned());
    }

    /// Convenience: a tagged PRIVMSG into `#channel`.
    pub fn send_privmsg(&self, channel: &str, sender: &str, badges: &str, text: &str) {
        let line = format!(
            "@badges={badges};display-name={sender};mod=0 :{lower}!{lower}@{lower}.tmi PRIVMSG #{channel} :{text}",
            lower = sender.to_lowercase(),
        );
        self.send_line(&line);
    }

    /// Every line the client has sent so far.
    pub async fn received_lines(&self) -> Vec<String> {
        self.received.lock().await.clone()
    }

    /// Poll until a client-sent line satisfies `predicate`.
    pub async fn wait_for_line<F>(&self, predicate: F, timeout: Duration) -> Option<String>
    where
        F: Fn(&str) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let lines = self.received.lock().await;
                if let Some(line) = lines.iter().find(|l| predicate(l)) {
                    return Some(line.clone());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    mut inbound: broadcast::Receiver<String>,
    received: Arc<Mutex<Vec<String>>>,
) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    loop {
        tokio::select! {
            pushed = inbound.recv() => match pushed {
                Ok(line) => {
                    if ws.send(Message::Text(format!("{line}\r\n").into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let mut lines = received.lock().await;
                    for line in text.split("\r\n").filter(|l| !l.is_empty()) {
                        lines.push(line.to_owned());
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }
}
