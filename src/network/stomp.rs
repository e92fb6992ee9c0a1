//! STOMP 1.2 text frames as carried inside WebSocket / SockJS messages.

use std::time::Duration;

use thiserror::Error;

const NUL: char = '\0';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StompError {
    #[error("frame has no command line")]
    MissingCommand,
    #[error("malformed header line `{0}`")]
    MalformedHeader(String),
    #[error("invalid escape sequence in `{0}`")]
    InvalidEscape(String),
    #[error("invalid content-length `{0}`")]
    InvalidContentLength(String),
    #[error("frame is not NUL terminated")]
    Truncated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First occurrence wins, as STOMP 1.2 requires for repeated headers.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn encode(&self) -> String {
        let escape = escapes_headers(&self.command);
        let mut out = String::with_capacity(self.command.len() + self.body.len() + 64);
        out.push_str(&self.command);
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push(NUL);
        out
    }
}

/// CONNECT and CONNECTED headers are sent verbatim for 1.0 compatibility.
fn escapes_headers(command: &str) -> bool {
    command != "CONNECT" && command != "CONNECTED"
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            _ => return Err(StompError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}

/// Splits one transport message into frames.
///
/// Bare EOLs between frames are heart-beats and produce nothing, so a
/// heart-beat-only message decodes to an empty vector.
pub fn decode_frames(text: &str) -> Result<Vec<Frame>, StompError> {
    let mut frames = Vec::new();
    let mut rest = text;
    loop {
        rest = rest.trim_start_matches(['\r', '\n']);
        if rest.is_empty() {
            return Ok(frames);
        }
        let (frame, remaining) = decode_one(rest)?;
        frames.push(frame);
        rest = remaining;
    }
}

fn decode_one(text: &str) -> Result<(Frame, &str), StompError> {
    let (head, after_head) = split_head(text).ok_or(StompError::Truncated)?;
    let mut lines = head.lines().map(|line| line.trim_end_matches('\r'));
    let command = lines
        .next()
        .filter(|line| !line.is_empty())
        .ok_or(StompError::MissingCommand)?
        .to_string();

    let escape = escapes_headers(&command);
    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| StompError::MalformedHeader(line.to_string()))?;
        if escape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let mut frame = Frame {
        command,
        headers,
        body: String::new(),
    };

    let remaining = match frame.get("content-length") {
        Some(raw) => {
            let len: usize = raw
                .trim()
                .parse()
                .map_err(|_| StompError::InvalidContentLength(raw.to_string()))?;
            let body = after_head
                .get(..len)
                .ok_or_else(|| StompError::InvalidContentLength(raw.to_string()))?;
            frame.body = body.to_string();
            after_head[len..]
                .strip_prefix(NUL)
                .ok_or(StompError::Truncated)?
        }
        None => {
            let end = after_head.find(NUL).ok_or(StompError::Truncated)?;
            frame.body = after_head[..end].to_string();
            &after_head[end + NUL.len_utf8()..]
        }
    };

    Ok((frame, remaining))
}

/// Header block ends at the first blank line (LF or CRLF).
fn split_head(text: &str) -> Option<(&str, &str)> {
    let lf = text.find("\n\n").map(|idx| (idx, 2));
    let crlf = text.find("\r\n\r\n").map(|idx| (idx, 4));
    let (idx, sep) = match (lf, crlf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    Some((&text[..idx], &text[idx + sep..]))
}

/// Negotiated keep-alive periods; zero disables a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub outgoing: Duration,
    pub incoming: Duration,
}

impl Heartbeat {
    pub fn header_value(&self) -> String {
        format!(
            "{},{}",
            self.outgoing.as_millis(),
            self.incoming.as_millis()
        )
    }

    /// Combines our offer with the broker's `heart-beat` header.
    pub fn negotiate(self, server: Option<&str>) -> Heartbeat {
        let (server_out, server_in) = server.and_then(parse_heartbeat).unwrap_or((0, 0));
        let ours_out = self.outgoing.as_millis() as u64;
        let ours_in = self.incoming.as_millis() as u64;
        Heartbeat {
            outgoing: pick(ours_out, server_in),
            incoming: pick(ours_in, server_out),
        }
    }
}

fn pick(ours: u64, theirs: u64) -> Duration {
    if ours == 0 || theirs == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(ours.max(theirs))
    }
}

fn parse_heartbeat(raw: &str) -> Option<(u64, u64)> {
    let (sx, sy) = raw.split_once(',')?;
    Some((sx.trim().parse().ok()?, sy.trim().parse().ok()?))
}

pub fn connect_frame(host: &str, token: Option<&str>, heartbeat: Heartbeat) -> Frame {
    let mut frame = Frame::new("CONNECT")
        .header("accept-version", "1.2,1.1,1.0")
        .header("host", host)
        .header("heart-beat", heartbeat.header_value());
    if let Some(token) = token {
        frame = frame.header("Authorization", format!("Bearer {token}"));
    }
    frame
}

pub fn disconnect_frame() -> Frame {
    Frame::new("DISCONNECT")
}

/// A single EOL, the STOMP keep-alive.
pub const HEARTBEAT: &str = "\n";
