//! SockJS framing shared by the SockJS WebSocket and XHR polling transports.

use url::Url;
use uuid::Uuid;

use super::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockJsFrame {
    Open,
    Heartbeat,
    Messages(Vec<String>),
    Close { code: u16, reason: String },
}

pub fn parse_frame(raw: &str) -> Result<SockJsFrame, TransportError> {
    let raw = raw.trim_end_matches('\n');
    let Some(kind) = raw.chars().next() else {
        return Err(TransportError::Protocol("empty sockjs frame".to_string()));
    };
    let payload = &raw[kind.len_utf8()..];
    match kind {
        'o' => Ok(SockJsFrame::Open),
        'h' => Ok(SockJsFrame::Heartbeat),
        'a' => serde_json::from_str::<Vec<String>>(payload)
            .map(SockJsFrame::Messages)
            .map_err(|err| TransportError::Protocol(format!("bad sockjs array frame: {err}"))),
        'c' => serde_json::from_str::<(u16, String)>(payload)
            .map(|(code, reason)| SockJsFrame::Close { code, reason })
            .map_err(|err| TransportError::Protocol(format!("bad sockjs close frame: {err}"))),
        other => Err(TransportError::Protocol(format!(
            "unknown sockjs frame type `{other}`"
        ))),
    }
}

/// XHR responses may hold several newline separated frames.
pub fn parse_frames(body: &str) -> Result<Vec<SockJsFrame>, TransportError> {
    body.split('\n')
        .filter(|line| !line.is_empty())
        .map(parse_frame)
        .collect()
}

pub fn encode_messages(messages: &[&str]) -> Result<String, TransportError> {
    serde_json::to_string(messages)
        .map_err(|err| TransportError::Protocol(format!("cannot encode sockjs payload: {err}")))
}

/// `{endpoint}/{server}/{session}` with a random server bucket and session id.
pub fn session_url(endpoint: &Url) -> Result<Url, TransportError> {
    let session = Uuid::new_v4();
    let bytes = session.as_bytes();
    let server = format!("{:03}", u16::from_be_bytes([bytes[0], bytes[1]]) % 1000);
    let session = session.simple().to_string();
    with_segments(endpoint, &[server.as_str(), session.as_str()])
}

pub fn with_segments(base: &Url, segments: &[&str]) -> Result<Url, TransportError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| TransportError::InvalidEndpoint(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Same location on the `ws`/`wss` scheme.
pub fn websocket_url(session: &Url) -> Result<Url, TransportError> {
    let mut url = with_segments(session, &["websocket"])?;
    let scheme = if session.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidEndpoint(session.to_string()))?;
    Ok(url)
}
