//! In-process mock STOMP broker used by the integration tests.
//!
//! The broker accepts one connection at a time, answers CONNECT with a
//! CONNECTED frame, auto-replies RECEIPT to any frame carrying a `receipt`
//! header, forwards every frame it reads (CONNECT included) to the test for
//! assertions, and lets the test push frames to the client or drop the
//! active connection to simulate a transport failure.

// Each integration test crate compiles this module separately and uses a
// different subset of the helpers.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use cobalt_stomp::{Command, Frame, StompCodec, StompItem};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

pub struct MockBroker {
    pub addr: SocketAddr,
    frames_rx: mpsc::UnboundedReceiver<Frame>,
    push_tx: mpsc::UnboundedSender<Frame>,
    drop_tx: mpsc::UnboundedSender<()>,
}

impl MockBroker {
    /// Next frame the broker read from any client connection, bounded by
    /// `timeout`.
    pub async fn recv_frame(&mut self, timeout: Duration) -> Option<Frame> {
        tokio::time::timeout(timeout, self.frames_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Receive frames until one with the given command arrives. Panics on
    /// timeout; intervening frames are discarded.
    pub async fn expect_command(&mut self, command: Command, timeout: Duration) -> Frame {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .unwrap_or(Duration::ZERO);
            match self.recv_frame(remaining).await {
                Some(frame) if frame.command == command => return frame,
                Some(_) => continue,
                None => panic!("timed out waiting for {command:?} frame"),
            }
        }
    }

    /// Push a frame to the currently connected client.
    pub fn push(&self, frame: Frame) {
        self.push_tx.send(frame).expect("broker task gone");
    }

    /// Drop the active connection, simulating a transport failure.
    pub fn drop_connection(&self) {
        self.drop_tx.send(()).expect("broker task gone");
    }
}

pub async fn spawn_broker() -> MockBroker {
    spawn_broker_with("0,0").await
}

/// Spawn a broker that advertises the given `heart-beat` header in its
/// CONNECTED frames. The mock never actually sends heartbeats, which is
/// exactly what the watchdog tests need.
pub async fn spawn_broker_with(heart_beat: &str) -> MockBroker {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let heart_beat = heart_beat.to_string();

    let (frames_tx, frames_rx) = mpsc::unbounded_channel::<Frame>();
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Frame>();
    let (drop_tx, mut drop_rx) = mpsc::unbounded_channel::<()>();

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let mut framed = Framed::new(socket, StompCodec::new());

            // Handshake: read CONNECT, answer CONNECTED.
            let connected = loop {
                match framed.next().await {
                    Some(Ok(StompItem::Frame(frame)))
                        if matches!(frame.command, Command::Connect | Command::Stomp) =>
                    {
                        let _ = frames_tx.send(frame);
                        break true;
                    }
                    Some(Ok(_)) => continue,
                    _ => break false,
                }
            };
            if !connected {
                continue;
            }
            let reply = Frame::new(Command::Connected)
                .header("version", "1.2")
                .header("heart-beat", heart_beat.clone())
                .header("session", "mock");
            if framed.send(StompItem::Frame(reply)).await.is_err() {
                continue;
            }

            // Serve until the client goes away or the test drops us.
            loop {
                tokio::select! {
                    item = framed.next() => match item {
                        Some(Ok(StompItem::Frame(frame))) => {
                            if let Some(receipt) = frame.get_header("receipt") {
                                let receipt = Frame::new(Command::Receipt)
                                    .header("receipt-id", receipt);
                                let _ = framed.send(StompItem::Frame(receipt)).await;
                            }
                            let _ = frames_tx.send(frame);
                        }
                        Some(Ok(StompItem::Heartbeat)) => {}
                        Some(Err(_)) | None => break,
                    },
                    maybe = push_rx.recv() => match maybe {
                        Some(frame) => {
                            if framed.send(StompItem::Frame(frame)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    maybe = drop_rx.recv() => {
                        if maybe.is_some() {
                            // Close the socket abruptly; the client must
                            // notice and fail over.
                        }
                        break;
                    }
                }
            }
        }
    });

    MockBroker {
        addr,
        frames_rx,
        push_tx,
        drop_tx,
    }
}

/// A MESSAGE frame the way a 1.2 broker would deliver it.
pub fn broker_message(subscription: &str, destination: &str, message_id: &str, body: &str) -> Frame {
    Frame::new(Command::Message)
        .header("subscription", subscription)
        .header("destination", destination)
        .header("message-id", message_id)
        .header("ack", format!("ack-{message_id}"))
        .set_body(body.as_bytes().to_vec())
}
