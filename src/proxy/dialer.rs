use std::net::{SocketAddr, SocketAddrV6};
use std::time::Duration;

use slog_scope::info;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpSocket, TcpStream};

use crate::rotator::Rotator;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEPALIVE_TIME: Duration = Duration::from_secs(30);

/// Dial the destination from a freshly rotated source address. The socket is
/// bound to `(source, 0)` before connecting; the local-route installer has
/// already made any in-prefix source acceptable to the kernel. Dropping the
/// returned future aborts an in-progress connect.
pub async fn dial(rotator: &Rotator, dest: SocketAddrV6) -> std::io::Result<TcpStream> {
    let source = rotator.random_address();
    let socket = TcpSocket::new_v6()?;
    socket.bind(SocketAddr::V6(SocketAddrV6::new(source, 0, 0, 0)))?;
    SockRef::from(&socket).set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_TIME))?;
    info!("outbound_connect"; "destination" => dest.to_string(), "source" => source.to_string());
    match tokio::time::timeout(CONNECT_TIMEOUT, socket.connect(SocketAddr::V6(dest))).await {
        Ok(connected) => connected,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("connect to {} timed out", dest),
        )),
    }
}
