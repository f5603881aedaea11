//! WebSocket front end: accept loop and the per-connection request loop.
//!
//! Every accepted connection gets its own [`CommandDispatcher`] (and with it
//! its own [`ReaderSession`]). Requests on a connection are handled strictly
//! one after the other: a request runs on the blocking thread pool while the
//! connection task keeps the socket alive with pings, and the next frame is
//! only read once the response has been sent.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    WebSocketStream,
};

use crate::core::commands::{CommandDispatcher, Response};
use crate::core::error::BridgeError;
use crate::core::session::ReaderSession;
use crate::core::transport::CardTransport;
use crate::server::config::BridgeConfig;

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

/// Bound WebSocket listener serving reader sessions
pub struct BridgeServer {
    listener: TcpListener,
    config: Arc<BridgeConfig>,
    transport: Arc<dyn CardTransport>,
}

impl BridgeServer {
    /// Bind the listener on `config.bind_addr`.
    ///
    /// Binding to port 0 picks a free port; see [`BridgeServer::local_addr`].
    pub async fn bind(config: BridgeConfig, transport: Arc<dyn CardTransport>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind WebSocket listener on {}", config.bind_addr))?;

        Ok(Self {
            listener,
            config: Arc::new(config),
            transport,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Connections already being served keep running on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        log::info!("NFC bridge listening on ws://{}", self.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        log::info!("New client connection from {}", peer_addr);
                        let config = Arc::clone(&self.config);
                        let transport = Arc::clone(&self.transport);
                        tokio::spawn(async move {
                            handle_connection(stream, peer_addr, config, transport).await;
                        });
                    }
                    Err(e) => log::error!("Accept error: {}", e),
                },
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<BridgeConfig>,
    transport: Arc<dyn CardTransport>,
) {
    match run_connection(stream, peer_addr, config, transport).await {
        Ok(()) => log::info!("Client {} disconnected", peer_addr),
        Err(e) => log::warn!("Client {} dropped with error: {:#}", peer_addr, e),
    }
}

async fn run_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<BridgeConfig>,
    transport: Arc<dyn CardTransport>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let session = ReaderSession::new(transport).with_retry_interval(config.retry_interval);
    let mut dispatcher =
        Some(CommandDispatcher::new(session).with_connect_timeout(config.connect_timeout));

    let mut ticker = interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    let result = loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let message = match frame {
                    Some(Ok(message)) => message,
                    Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) | None => break Ok(()),
                    Some(Err(e)) => break Err(anyhow::Error::new(e).context("WebSocket read failed")),
                };
                last_seen = Instant::now();

                let text = match message {
                    WsMessage::Text(text) => text,
                    WsMessage::Binary(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            let error = BridgeError::MalformedRequest("Binary frame is not UTF-8 text".into());
                            if let Err(e) = send_response(&mut ws_tx, &Response::failure(&error)).await {
                                break Err(e);
                            }
                            continue;
                        }
                    },
                    WsMessage::Close(_) => break Ok(()),
                    WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
                };

                let Some(idle) = dispatcher.take() else {
                    break Ok(());
                };
                log::debug!("{} -> {}", peer_addr, text);

                let (returned, response) =
                    match dispatch_blocking(idle, text, &mut ws_tx, &mut ticker).await {
                        Ok(handled) => handled,
                        Err(e) => break Err(e),
                    };
                dispatcher = Some(returned);
                last_seen = Instant::now();

                log::debug!("{} <- {}", peer_addr, response.to_json());
                if let Err(e) = send_response(&mut ws_tx, &response).await {
                    break Err(e);
                }
            }
            _ = ticker.tick() => {
                if last_seen.elapsed() >= config.idle_limit() {
                    log::warn!("Client {} stopped answering pings", peer_addr);
                    break Ok(());
                }
                if let Err(e) = ws_tx.send(WsMessage::Ping(Vec::new())).await {
                    break Err(anyhow::Error::new(e).context("Failed to send keep-alive ping"));
                }
            }
        }
    };

    if let Some(mut dispatcher) = dispatcher {
        tokio::task::spawn_blocking(move || dispatcher.close())
            .await
            .context("Session teardown panicked")?;
    }

    result
}

/// Run one request on the blocking pool, pinging the client while it runs.
///
/// A failed ping is not fatal here; the read loop notices the dead peer once
/// the request has finished.
async fn dispatch_blocking(
    mut dispatcher: CommandDispatcher,
    text: String,
    ws_tx: &mut WsSink,
    ticker: &mut Interval,
) -> anyhow::Result<(CommandDispatcher, Response)> {
    let mut task = tokio::task::spawn_blocking(move || {
        let response = dispatcher.handle(&text);
        (dispatcher, response)
    });
    let mut peer_alive = true;

    loop {
        tokio::select! {
            joined = &mut task => return joined.context("Request handler panicked"),
            _ = ticker.tick(), if peer_alive => {
                if let Err(e) = ws_tx.send(WsMessage::Ping(Vec::new())).await {
                    log::debug!("Keep-alive ping failed during request: {}", e);
                    peer_alive = false;
                }
            }
        }
    }
}

async fn send_response(ws_tx: &mut WsSink, response: &Response) -> anyhow::Result<()> {
    ws_tx
        .send(WsMessage::Text(response.to_json()))
        .await
        .context("Failed to send response")
}
