//! # Summary
//!
//! This module implements the coordinator's session with one participant.
//! Incoming frames are handed to the shared hub, and messages the hub routes
//! to this participant are written back out over the socket.
//!
//! The session ends when the participant disconnects, when a frame cannot be
//! read at all, or when nothing has arrived for the idle interval. Heartbeat
//! `PING`s from the node keep an otherwise quiet participant alive. Dropping
//! the session unregisters the participant from the hub.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{self, Instant};

use crate::internal;
use crate::message::Message;
use crate::shared::Shared;
use crate::socket;

pub struct Connection {
    id: usize,
    rx: socket::Rx,
    tx: socket::Tx,
    outbound: internal::Rx<Message>,
    shared: Shared,
    idle: Duration,
}

impl Connection {
    pub fn new(stream: TcpStream, shared: Shared, idle: Duration) -> Self {
        let (rx, tx) = socket::split(stream);
        let (outbound, outbound_tx) = internal::new();
        let id = shared.connect(outbound_tx);
        Connection { id, rx, tx, outbound, shared, idle }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub async fn run(mut self) {
        let idle = time::sleep(self.idle);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                frame = self.rx.recv() => match frame {
                | None => {
                    info!("participant {} closed the connection", self.id);
                    return
                }
                | Some(Ok(message)) => {
                    idle.as_mut().reset(Instant::now() + self.idle);
                    trace!("participant {} sent {}", self.id, message);
                    self.shared.receive(self.id, message);
                }
                | Some(Err(error)) if error.is_fatal() => {
                    warn!("dropping participant {}: {}", self.id, error);
                    return
                }
                | Some(Err(error)) => {
                    idle.as_mut().reset(Instant::now() + self.idle);
                    warn!("participant {}: {}", self.id, error);
                }
                },
                message = self.outbound.recv() => match message {
                | Some(message) => {
                    if let Err(error) = self.tx.send(&message).await {
                        warn!("failed to send to participant {}: {}", self.id, error);
                        return
                    }
                }
                | None => return,
                },
                _ = &mut idle => {
                    warn!("participant {} silent for {:?}, dropping", self.id, self.idle);
                    return
                }
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.disconnect(self.id);
    }
}
