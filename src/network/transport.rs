use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::sockjs::{self, SockJsFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unsupported endpoint scheme `{0}`")]
    UnsupportedScheme(String),
    #[error("invalid endpoint `{0}`")]
    InvalidEndpoint(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("sockjs protocol error: {0}")]
    Protocol(String),
}

/// One open bidirectional text channel to the broker.
///
/// `ws://` and `wss://` endpoints speak STOMP directly over a WebSocket.
/// `http://` and `https://` endpoints are SockJS: the WebSocket flavour is
/// tried first and XHR polling is used when that cannot be opened.
pub enum Transport {
    WebSocket(WsStream),
    SockJsWebSocket(WsStream),
    XhrPolling(XhrSession),
}

impl Transport {
    pub async fn open(endpoint: &Url, http: &reqwest::Client) -> Result<Self, TransportError> {
        match endpoint.scheme() {
            "ws" | "wss" => {
                let (stream, _) = connect_async(endpoint.as_str()).await?;
                log::info!("WebSocket transport open to {endpoint}");
                Ok(Self::WebSocket(stream))
            }
            "http" | "https" => match Self::open_sockjs_websocket(endpoint).await {
                Ok(transport) => Ok(transport),
                Err(err) => {
                    log::warn!("SockJS websocket unavailable ({err}); falling back to xhr polling");
                    let session = sockjs::session_url(endpoint)?;
                    let xhr = XhrSession::open(http.clone(), session).await?;
                    log::info!("SockJS xhr-polling transport open to {endpoint}");
                    Ok(Self::XhrPolling(xhr))
                }
            },
            other => Err(TransportError::UnsupportedScheme(other.to_string())),
        }
    }

    async fn open_sockjs_websocket(endpoint: &Url) -> Result<Self, TransportError> {
        let session = sockjs::session_url(endpoint)?;
        let url = sockjs::websocket_url(&session)?;
        let (mut stream, _) = connect_async(url.as_str()).await?;
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match sockjs::parse_frame(&text)? {
                SockJsFrame::Open => {
                    log::info!("SockJS websocket transport open to {endpoint}");
                    Ok(Self::SockJsWebSocket(stream))
                }
                other => Err(TransportError::Protocol(format!(
                    "expected open frame, got {other:?}"
                ))),
            },
            Some(Ok(other)) => Err(TransportError::Protocol(format!(
                "expected open frame, got {other:?}"
            ))),
            Some(Err(err)) => Err(err.into()),
            None => Err(TransportError::Protocol(
                "closed before open frame".to_string(),
            )),
        }
    }

    pub async fn send(&mut self, payload: &str) -> Result<(), TransportError> {
        match self {
            Self::WebSocket(stream) => {
                stream.send(Message::Text(payload.to_string())).await?;
            }
            Self::SockJsWebSocket(stream) => {
                let wrapped = sockjs::encode_messages(&[payload])?;
                stream.send(Message::Text(wrapped)).await?;
            }
            Self::XhrPolling(xhr) => xhr.send(payload).await?,
        }
        Ok(())
    }

    /// Next batch of STOMP payloads.
    ///
    /// `Ok(None)` means the peer closed the channel. An empty batch is
    /// transport-level keep-alive traffic and still counts as liveness.
    /// Cancel safe.
    pub async fn recv(&mut self) -> Result<Option<Vec<String>>, TransportError> {
        match self {
            Self::WebSocket(stream) => match stream.next().await {
                None | Some(Ok(Message::Close(_))) => Ok(None),
                Some(Ok(Message::Text(text))) => Ok(Some(vec![text])),
                Some(Ok(Message::Binary(bytes))) => String::from_utf8(bytes)
                    .map(|text| Some(vec![text]))
                    .map_err(|_| TransportError::Protocol("non utf-8 binary frame".to_string())),
                Some(Ok(_)) => Ok(Some(Vec::new())),
                Some(Err(err)) => Err(err.into()),
            },
            Self::SockJsWebSocket(stream) => match stream.next().await {
                None | Some(Ok(Message::Close(_))) => Ok(None),
                Some(Ok(Message::Text(text))) => match sockjs::parse_frame(&text)? {
                    SockJsFrame::Messages(messages) => Ok(Some(messages)),
                    SockJsFrame::Open | SockJsFrame::Heartbeat => Ok(Some(Vec::new())),
                    SockJsFrame::Close { code, reason } => {
                        log::info!("SockJS session closed by server ({code}: {reason})");
                        Ok(None)
                    }
                },
                Some(Ok(_)) => Ok(Some(Vec::new())),
                Some(Err(err)) => Err(err.into()),
            },
            Self::XhrPolling(xhr) => xhr.recv().await,
        }
    }

    pub async fn close(&mut self) {
        match self {
            Self::WebSocket(stream) | Self::SockJsWebSocket(stream) => {
                if let Err(err) = stream.close(None).await {
                    log::debug!("WebSocket close: {err}");
                }
            }
            Self::XhrPolling(xhr) => xhr.close(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::WebSocket(_) => "websocket",
            Self::SockJsWebSocket(_) => "sockjs-websocket",
            Self::XhrPolling(_) => "sockjs-xhr",
        }
    }
}

/// SockJS XHR polling session.
///
/// Polling runs in its own task so that dropping a `recv` future never loses
/// a response that was already read off the wire.
pub struct XhrSession {
    http: reqwest::Client,
    send_url: Url,
    inbound: mpsc::Receiver<Result<Vec<String>, TransportError>>,
    poller: JoinHandle<()>,
}

impl XhrSession {
    async fn open(http: reqwest::Client, session: Url) -> Result<Self, TransportError> {
        let poll_url = sockjs::with_segments(&session, &["xhr"])?;
        let send_url = sockjs::with_segments(&session, &["xhr_send"])?;

        let body = http
            .post(poll_url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        match sockjs::parse_frames(&body)?.first() {
            Some(SockJsFrame::Open) => {}
            other => {
                return Err(TransportError::Protocol(format!(
                    "expected open frame, got {other:?}"
                )));
            }
        }

        let (tx, inbound) = mpsc::channel(32);
        let poller = tokio::spawn(poll_loop(http.clone(), poll_url, tx));
        Ok(Self {
            http,
            send_url,
            inbound,
            poller,
        })
    }

    async fn send(&self, payload: &str) -> Result<(), TransportError> {
        self.http
            .post(self.send_url.clone())
            .header(reqwest::header::CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(sockjs::encode_messages(&[payload])?)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Vec<String>>, TransportError> {
        match self.inbound.recv().await {
            Some(Ok(batch)) => Ok(Some(batch)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }

    fn close(&self) {
        self.poller.abort();
    }
}

impl Drop for XhrSession {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

async fn poll_loop(
    http: reqwest::Client,
    poll_url: Url,
    tx: mpsc::Sender<Result<Vec<String>, TransportError>>,
) {
    loop {
        let body = match poll_once(&http, &poll_url).await {
            Ok(body) => body,
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                return;
            }
        };
        let frames = match sockjs::parse_frames(&body) {
            Ok(frames) => frames,
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                return;
            }
        };
        for frame in frames {
            let batch = match frame {
                SockJsFrame::Messages(messages) => messages,
                SockJsFrame::Open | SockJsFrame::Heartbeat => Vec::new(),
                SockJsFrame::Close { code, reason } => {
                    log::info!("SockJS xhr session closed by server ({code}: {reason})");
                    return;
                }
            };
            if tx.send(Ok(batch)).await.is_err() {
                return;
            }
        }
    }
}

async fn poll_once(http: &reqwest::Client, url: &Url) -> Result<String, TransportError> {
    Ok(http
        .post(url.clone())
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?)
}
