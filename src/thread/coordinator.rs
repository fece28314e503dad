use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::shared::Shared;
use crate::thread::connection::Connection;

/// Listens for participants and spawns one session per connection.
pub struct Coordinator {
    listener: TcpListener,
    shared: Shared,
    idle: Duration,
}

impl Coordinator {
    pub(crate) fn new(listener: TcpListener, timeout: Duration, idle: Duration) -> Self {
        Coordinator {
            listener,
            shared: Shared::new(timeout),
            idle,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to the hub, for inspecting participants and round progress.
    pub fn shared(&self) -> Shared {
        self.shared.clone()
    }

    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
            | Ok((stream, addr)) => {
                let connection = Connection::new(stream, self.shared.clone(), self.idle);
                info!("accepted participant {} from {}", connection.id(), addr);
                tokio::spawn(connection.run());
            }
            | Err(error) => {
                warn!("failed to accept participant: {}", error);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            }
        }
    }
}
