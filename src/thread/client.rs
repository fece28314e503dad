use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};

use crate::external::{self, Reply, Request};
use crate::thread::node::Handle;

/// Serves client requests by submitting them to the local node.
pub struct Client {
    listener: TcpListener,
    handle: Handle,
}

impl Client {
    pub fn new(listener: TcpListener, handle: Handle) -> Self {
        Client { listener, handle }
    }

    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
            | Ok((stream, addr)) => {
                debug!("client connected from {}", addr);
                tokio::spawn(serve(stream, self.handle.clone()));
            }
            | Err(error) => {
                warn!("failed to accept client: {}", error);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            }
        }
    }
}

/// Answers requests on one client connection, in order.
async fn serve(stream: TcpStream, handle: Handle) {
    let mut channel: external::Channel<Request, Reply> = external::new(stream);
    while let Some(request) = channel.next().await {
        let operation = match request {
        | Ok(operation) => operation,
        | Err(error) => {
            warn!("unreadable client request: {}", error);
            return
        }
        };
        let reply = handle.execute(operation).await;
        if let Err(error) = channel.send(reply).await {
            warn!("failed to answer client: {}", error);
            return
        }
    }
}
