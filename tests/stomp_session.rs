use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use whisker_chat::auth::StaticToken;
use whisker_chat::network::stomp::{Frame, decode_frames};
use whisker_chat::network::{FixedDelay, SEND_DESTINATION, private_queue_for};
use whisker_chat::{ChatMessage, ChatSession, ConnectionSettings, Conversation, NetworkEvent};

const WAIT: Duration = Duration::from_secs(5);

enum Action {
    Send(String),
    Drop,
}

/// How STOMP text travels over the socket.
#[derive(Clone, Copy)]
enum Framing {
    Stomp,
    SockJs,
}

impl Framing {
    fn wrap(self, text: String) -> String {
        match self {
            Framing::Stomp => text,
            Framing::SockJs => format!("a{}", serde_json::to_string(&[text]).unwrap()),
        }
    }

    fn unwrap_payloads(self, text: &str) -> Vec<String> {
        match self {
            Framing::Stomp => vec![text.to_string()],
            Framing::SockJs => serde_json::from_str(text).unwrap(),
        }
    }
}

/// What the broker answers to CONNECT.
#[derive(Clone, Copy)]
enum Handshake {
    /// CONNECTED with this `heart-beat` header.
    Accept(&'static str),
    /// ERROR, then the connection is closed.
    Reject,
}

impl Handshake {
    fn reply(self) -> Frame {
        match self {
            Handshake::Accept(heart_beat) => Frame::new("CONNECTED")
                .header("version", "1.2")
                .header("heart-beat", heart_beat),
            Handshake::Reject => Frame::new("ERROR")
                .header("message", "Unauthorized")
                .with_body("bad token"),
        }
    }
}

/// Minimal STOMP broker: answers CONNECT, reports every client frame and
/// pushes whatever the test asks for. Connections are served one at a time.
struct Broker {
    url: Url,
    frames: mpsc::UnboundedReceiver<Frame>,
    actions: mpsc::UnboundedSender<Action>,
}

impl Broker {
    async fn start() -> Self {
        Self::websocket(Framing::Stomp, Handshake::Accept("0,0")).await
    }

    async fn websocket(framing: Framing, handshake: Handshake) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (frame_tx, frames) = mpsc::unbounded_channel();
        let (actions, mut action_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(mut ws) = accept_async(stream).await else {
                    continue;
                };
                if let Framing::SockJs = framing {
                    ws.send(Message::Text("o".to_string())).await.unwrap();
                    ws.send(Message::Text("h".to_string())).await.unwrap();
                }
                'session: loop {
                    tokio::select! {
                        inbound = ws.next() => match inbound {
                            Some(Ok(Message::Text(text))) => {
                                for payload in framing.unwrap_payloads(&text) {
                                    for frame in decode_frames(&payload).unwrap() {
                                        let connect = frame.command == "CONNECT";
                                        let _ = frame_tx.send(frame);
                                        if !connect {
                                            continue;
                                        }
                                        let reply = framing.wrap(handshake.reply().encode());
                                        ws.send(Message::Text(reply)).await.unwrap();
                                        if let Handshake::Reject = handshake {
                                            let _ = ws.close(None).await;
                                            break 'session;
                                        }
                                    }
                                }
                            }
                            Some(Ok(_)) => {}
                            _ => break,
                        },
                        action = action_rx.recv() => match action {
                            Some(Action::Send(text)) => {
                                if ws.send(Message::Text(framing.wrap(text))).await.is_err() {
                                    break;
                                }
                            }
                            Some(Action::Drop) => {
                                let _ = ws.close(None).await;
                                break;
                            }
                            None => return,
                        },
                    }
                }
            }
        });

        let scheme = match framing {
            Framing::Stomp => "ws",
            Framing::SockJs => "http",
        };
        Self {
            url: Url::parse(&format!("{scheme}://{addr}/ws")).unwrap(),
            frames,
            actions,
        }
    }

    /// SockJS server that refuses the WebSocket upgrade and only speaks
    /// `xhr` / `xhr_send`, one request per connection.
    async fn xhr_only() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (frame_tx, frames) = mpsc::unbounded_channel();
        let (actions, action_rx) = mpsc::unbounded_channel::<Action>();
        let replies = actions.clone();
        let outbound = Arc::new(Mutex::new(action_rx));
        let opened = Arc::new(AtomicBool::new(false));

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let frame_tx = frame_tx.clone();
                let replies = replies.clone();
                let outbound = Arc::clone(&outbound);
                let opened = Arc::clone(&opened);
                tokio::spawn(async move {
                    let (path, body) = read_request(&mut stream).await;
                    let (status, payload) = if path.ends_with("/xhr_send") {
                        let messages: Vec<String> = serde_json::from_str(&body).unwrap();
                        for message in messages {
                            for frame in decode_frames(&message).unwrap() {
                                if frame.command == "CONNECT" {
                                    let reply = Handshake::Accept("0,0").reply().encode();
                                    let _ = replies.send(Action::Send(reply));
                                }
                                let _ = frame_tx.send(frame);
                            }
                        }
                        ("204 No Content", String::new())
                    } else if path.ends_with("/xhr") {
                        if !opened.swap(true, Ordering::SeqCst) {
                            ("200 OK", "o\n".to_string())
                        } else {
                            let mut queue = outbound.lock().await;
                            match timeout(Duration::from_millis(500), queue.recv()).await {
                                Ok(Some(Action::Send(text))) => {
                                    ("200 OK", format!("{}\n", Framing::SockJs.wrap(text)))
                                }
                                Ok(Some(Action::Drop)) | Ok(None) => {
                                    ("200 OK", "c[3000,\"Go away!\"]\n".to_string())
                                }
                                Err(_) => ("200 OK", "h\n".to_string()),
                            }
                        }
                    } else {
                        ("404 Not Found", String::new())
                    };
                    let response = format!(
                        "HTTP/1.1 {status}\r\ncontent-type: application/javascript; charset=UTF-8\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{payload}",
                        payload.len()
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self {
            url: Url::parse(&format!("http://{addr}/ws")).unwrap(),
            frames,
            actions,
        }
    }

    fn settings(&self) -> ConnectionSettings {
        ConnectionSettings::new(self.url.clone())
            .with_heartbeat(Duration::ZERO, Duration::ZERO)
            .with_reconnect_policy(FixedDelay(Duration::from_millis(50)))
    }

    async fn next_frame(&mut self) -> Frame {
        timeout(WAIT, self.frames.recv())
            .await
            .expect("broker saw no frame in time")
            .expect("broker stopped")
    }

    /// Waits for the session handshake and returns the subscription id.
    async fn expect_handshake(&mut self) -> String {
        assert_eq!(self.next_frame().await.command, "CONNECT");
        let subscribe = self.next_frame().await;
        assert_eq!(subscribe.command, "SUBSCRIBE");
        subscribe.get("id").unwrap().to_string()
    }

    fn deliver(&self, subscription: &str, destination: &str, body: &str) {
        let frame = Frame::new("MESSAGE")
            .header("subscription", subscription)
            .header("destination", destination)
            .header("message-id", "m-1")
            .with_body(body);
        self.actions.send(Action::Send(frame.encode())).unwrap();
    }
}

/// Reads one HTTP request; returns its path and body.
async fn read_request(stream: &mut TcpStream) -> (String, String) {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            return (String::new(), String::new());
        }
        data.extend_from_slice(&buf[..n]);
    };

    let head = String::from_utf8_lossy(&data[..head_end]).into_owned();
    let path = head.split_whitespace().nth(1).unwrap_or_default().to_string();
    let length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .map_or(0, |(_, value)| value.trim().parse::<usize>().unwrap());
    while data.len() < head_end + length {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    let body = String::from_utf8_lossy(&data[head_end..]).into_owned();
    (path, body)
}

async fn next_event(session: &mut ChatSession) -> NetworkEvent {
    timeout(WAIT, session.next_event())
        .await
        .expect("no event in time")
        .expect("session closed")
}

#[tokio::test]
async fn connects_with_bearer_and_subscribes_to_private_queue() {
    let mut broker = Broker::start().await;
    let mut session = ChatSession::open(
        broker.settings(),
        Some(5),
        Arc::new(StaticToken::new("tok")),
    );

    let connect = broker.next_frame().await;
    assert_eq!(connect.command, "CONNECT");
    assert_eq!(connect.get("Authorization"), Some("Bearer tok"));
    assert_eq!(connect.get("heart-beat"), Some("0,0"));

    let subscribe = broker.next_frame().await;
    assert_eq!(subscribe.command, "SUBSCRIBE");
    assert_eq!(subscribe.get("destination"), Some("/user/queue/private-5"));

    assert_eq!(next_event(&mut session).await, NetworkEvent::Connected);
    assert!(session.is_connected());
    session.shutdown().await;

    let disconnect = broker.next_frame().await;
    assert_eq!(disconnect.command, "DISCONNECT");
}

#[tokio::test]
async fn connects_without_authorization_when_no_token() {
    let mut broker = Broker::start().await;
    let mut session = ChatSession::open(broker.settings(), Some(5), Arc::new(StaticToken::default()));

    let connect = broker.next_frame().await;
    assert_eq!(connect.get("Authorization"), None);
    assert_eq!(next_event(&mut session).await, NetworkEvent::Connected);
}

#[tokio::test]
async fn routes_private_messages_and_drops_strays() {
    let mut broker = Broker::start().await;
    let mut session = ChatSession::open(broker.settings(), Some(5), Arc::new(StaticToken::new("tok")));
    let sub = broker.expect_handshake().await;
    assert_eq!(next_event(&mut session).await, NetworkEvent::Connected);

    let mine = private_queue_for(5);
    broker.deliver(
        &sub,
        "/user/queue/private-6",
        r#"{"senderId":7,"recipientId":6,"content":"not for you"}"#,
    );
    broker.deliver(&sub, &mine, r#"{"senderId":7,"content":"no recipient"}"#);
    broker.deliver(&sub, &mine, "not json");
    broker.deliver(
        "sub-other",
        &mine,
        r#"{"senderId":7,"recipientId":5,"content":"wrong subscription"}"#,
    );
    broker.deliver(
        &sub,
        &mine,
        r#"{"id":3,"senderId":7,"recipientId":5,"content":"meow","timestamp":"2024-01-01T10:00:00Z"}"#,
    );

    match next_event(&mut session).await {
        NetworkEvent::MessageReceived(message) => {
            assert_eq!(message.id, Some(3));
            assert_eq!(message.content, "meow");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(session.messages().len(), 1);
}

#[tokio::test]
async fn published_message_collapses_with_server_echo() {
    let mut broker = Broker::start().await;
    let mut session = ChatSession::open(broker.settings(), Some(5), Arc::new(StaticToken::new("tok")));
    let sub = broker.expect_handshake().await;
    assert_eq!(next_event(&mut session).await, NetworkEvent::Connected);

    let sent = session.send(7, "  purr  ").unwrap();
    assert_eq!(sent.content, "purr");

    let publish = broker.next_frame().await;
    assert_eq!(publish.command, "SEND");
    assert_eq!(publish.get("destination"), Some(SEND_DESTINATION));
    let wire = ChatMessage::decode(&publish.body).unwrap();
    assert_eq!(wire, sent);

    broker.deliver(&sub, &private_queue_for(5), &publish.body);
    assert!(matches!(
        next_event(&mut session).await,
        NetworkEvent::MessageReceived(_)
    ));

    let live = session.messages();
    assert_eq!(live.len(), 2);
    let view = Conversation::with_history(5, 7, Vec::new()).view(&live);
    assert_eq!(view, vec![sent]);
}

#[tokio::test]
async fn reconnects_after_broker_drops_the_connection() {
    let mut broker = Broker::start().await;
    let mut session = ChatSession::open(broker.settings(), Some(5), Arc::new(StaticToken::new("tok")));
    let first = broker.expect_handshake().await;
    assert_eq!(next_event(&mut session).await, NetworkEvent::Connected);

    broker.actions.send(Action::Drop).unwrap();
    assert_eq!(next_event(&mut session).await, NetworkEvent::Disconnected);
    assert!(!session.is_connected());

    let second = broker.expect_handshake().await;
    assert_ne!(first, second);
    assert_eq!(next_event(&mut session).await, NetworkEvent::Connected);

    broker.deliver(
        &second,
        &private_queue_for(5),
        r#"{"senderId":7,"recipientId":5,"content":"back again"}"#,
    );
    assert!(matches!(
        next_event(&mut session).await,
        NetworkEvent::MessageReceived(message) if message.content == "back again"
    ));
}

#[tokio::test]
async fn closed_session_stops_talking_to_the_broker() {
    let mut broker = Broker::start().await;
    let mut session = ChatSession::open(broker.settings(), Some(5), Arc::new(StaticToken::new("tok")));
    broker.expect_handshake().await;
    assert_eq!(next_event(&mut session).await, NetworkEvent::Connected);

    session.close();
    session.close();
    assert!(!session.is_connected());
    assert_eq!(session.next_event().await, None);
    assert!(session.send(7, "hello?").is_err());

    // Aborted without a goodbye: nothing more reaches the broker.
    let after = timeout(Duration::from_millis(200), broker.frames.recv()).await;
    assert!(!matches!(after, Ok(Some(frame)) if frame.command == "DISCONNECT"));
}

#[tokio::test]
async fn silent_broker_trips_heartbeat_watchdog_and_reconnects() {
    let mut broker = Broker::websocket(Framing::Stomp, Handshake::Accept("100,0")).await;
    let settings = broker
        .settings()
        .with_heartbeat(Duration::ZERO, Duration::from_millis(100));
    let mut session = ChatSession::open(settings, Some(5), Arc::new(StaticToken::new("tok")));

    let connect = broker.next_frame().await;
    assert_eq!(connect.get("heart-beat"), Some("0,100"));
    assert_eq!(broker.next_frame().await.command, "SUBSCRIBE");
    assert_eq!(next_event(&mut session).await, NetworkEvent::Connected);

    // The broker promised a beat every 100 ms and never sends one.
    assert_eq!(next_event(&mut session).await, NetworkEvent::Disconnected);
    broker.expect_handshake().await;
    assert_eq!(next_event(&mut session).await, NetworkEvent::Connected);
}

#[tokio::test]
async fn rejected_connect_is_retried_without_connecting() {
    let mut broker = Broker::websocket(Framing::Stomp, Handshake::Reject).await;
    let mut session = ChatSession::open(broker.settings(), Some(5), Arc::new(StaticToken::new("tok")));

    assert_eq!(broker.next_frame().await.command, "CONNECT");
    // No SUBSCRIBE after an ERROR; the next frame is a fresh attempt.
    assert_eq!(broker.next_frame().await.command, "CONNECT");

    assert_eq!(session.handle_network_events(), 0);
    assert!(!session.is_connected());
    assert_eq!(session.send(7, "hi"), Err(whisker_chat::SendError::Disconnected));
}

#[tokio::test]
async fn sockjs_websocket_carries_frames_both_ways() {
    let mut broker = Broker::websocket(Framing::SockJs, Handshake::Accept("0,0")).await;
    assert_eq!(broker.url.scheme(), "http");
    let mut session = ChatSession::open(broker.settings(), Some(5), Arc::new(StaticToken::new("tok")));

    let sub = broker.expect_handshake().await;
    assert_eq!(next_event(&mut session).await, NetworkEvent::Connected);

    broker.deliver(
        &sub,
        &private_queue_for(5),
        r#"{"senderId":7,"recipientId":5,"content":"über","timestamp":"2024-01-01T10:00:00Z"}"#,
    );
    assert!(matches!(
        next_event(&mut session).await,
        NetworkEvent::MessageReceived(message) if message.content == "über"
    ));

    let sent = session.send(7, "schnurr").unwrap();
    let publish = broker.next_frame().await;
    assert_eq!(publish.command, "SEND");
    assert_eq!(ChatMessage::decode(&publish.body).unwrap(), sent);
}

#[tokio::test]
async fn falls_back_to_xhr_polling_when_websocket_is_refused() {
    let mut broker = Broker::xhr_only().await;
    let mut session = ChatSession::open(broker.settings(), Some(5), Arc::new(StaticToken::new("tok")));

    let connect = broker.next_frame().await;
    assert_eq!(connect.command, "CONNECT");
    assert_eq!(connect.get("Authorization"), Some("Bearer tok"));
    let subscribe = broker.next_frame().await;
    assert_eq!(subscribe.command, "SUBSCRIBE");
    let sub = subscribe.get("id").unwrap().to_string();
    assert_eq!(next_event(&mut session).await, NetworkEvent::Connected);

    broker.deliver(
        &sub,
        &private_queue_for(5),
        r#"{"id":11,"senderId":7,"recipientId":5,"content":"polled"}"#,
    );
    assert!(matches!(
        next_event(&mut session).await,
        NetworkEvent::MessageReceived(message) if message.id == Some(11)
    ));

    let sent = session.send(7, "over xhr").unwrap();
    let publish = broker.next_frame().await;
    assert_eq!(publish.get("destination"), Some(SEND_DESTINATION));
    assert_eq!(ChatMessage::decode(&publish.body).unwrap(), sent);
}
