pub mod dialer;
pub mod dns;
pub mod socks5;

use std::net::SocketAddr;
use std::sync::Arc;

use slog_scope::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;

use crate::credentials::CredentialStore;
use crate::rotator::Rotator;

pub use socks5::Hooks;

/// Bind the ingress listener with SO_REUSEADDR and SO_REUSEPORT set before
/// listen, so several processes can share the port and let the kernel spread
/// incoming sessions between them.
pub fn bind_reuseport(addr: SocketAddr) -> std::io::Result<std::net::TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    Ok(socket.into())
}

/// Wire the credential store, resolver, and rotating dialer into the
/// capability record the SOCKS5 engine consumes. Hooks hold their stores by
/// `Arc` handle only.
pub fn build_hooks(
    credentials: Arc<CredentialStore>,
    rotator: Arc<Rotator>,
    resolver: Option<dns::DnsResolver>,
) -> Hooks {
    Hooks {
        authenticate: Box::new(move |user, password| credentials.validate(user, password)),
        resolve: Box::new(move |host| {
            let resolver = resolver.clone();
            Box::pin(async move { dns::resolve_ipv6(&host, resolver.as_ref()).await })
        }),
        dial: Box::new(move |dest| {
            let rotator = rotator.clone();
            Box::pin(async move { dialer::dial(&rotator, dest).await })
        }),
    }
}

/// Accept loop: one task per client until SIGINT or SIGTERM, then stop
/// accepting, drop the listener, and drain the outstanding sessions.
pub async fn serve(listener: std::net::TcpListener, hooks: Arc<Hooks>) -> anyhow::Result<()> {
    let listener = TcpListener::from_std(listener)?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sessions = JoinSet::new();

    let local_addr = listener.local_addr()?;
    info!("proxy_listening"; "addr" => local_addr.to_string());
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("client_accepted"; "peer" => peer.to_string());
                    let hooks = hooks.clone();
                    sessions.spawn(async move {
                        if let Err(e) = socks5::handle_connection(stream, hooks).await {
                            debug!("client_session_ended"; "peer" => peer.to_string(), "error" => e.to_string());
                        }
                    });
                }
                Err(e) => warn!("accept_failed"; "error" => e.to_string()),
            },
            _ = sigint.recv() => {
                info!("shutdown_signal"; "signal" => "SIGINT");
                break;
            }
            _ = sigterm.recv() => {
                info!("shutdown_signal"; "signal" => "SIGTERM");
                break;
            }
        }
    }

    drop(listener);
    info!("draining_sessions"; "outstanding" => sessions.len());
    while sessions.join_next().await.is_some() {}
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_reuseport_allows_shared_port() {
        let first = bind_reuseport("[::]:0".parse().unwrap()).unwrap();
        let port = first.local_addr().unwrap().port();
        let second = bind_reuseport(format!("[::]:{}", port).parse().unwrap()).unwrap();
        assert_eq!(second.local_addr().unwrap().port(), port);
    }
}
