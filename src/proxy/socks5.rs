use std::future::Future;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::pin::Pin;
use std::sync::Arc;

use slog_scope::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

// SOCKS5 constants (RFC 1928 / RFC 1929)
const SOCKS_VERSION: u8 = 0x05;
const AUTH_VERSION: u8 = 0x01;
const AUTH_USER_PASS: u8 = 0x02;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;
const AUTH_SUCCESS: u8 = 0x00;
const AUTH_FAILURE: u8 = 0x01;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REP_SUCCESS: u8 = 0x00;
const REP_GENERAL_FAILURE: u8 = 0x01;
const REP_HOST_UNREACHABLE: u8 = 0x04;
const REP_CONNECTION_REFUSED: u8 = 0x05;
const REP_TTL_EXPIRED: u8 = 0x06;
const REP_CMD_NOT_SUPPORTED: u8 = 0x07;
const REP_ATYP_NOT_SUPPORTED: u8 = 0x08;

pub type AuthFn = Box<dyn Fn(&str, &str) -> bool + Send + Sync>;
pub type ResolveFn =
    Box<dyn Fn(String) -> Pin<Box<dyn Future<Output = anyhow::Result<Ipv6Addr>> + Send>> + Send + Sync>;
pub type DialFn = Box<
    dyn Fn(SocketAddrV6) -> Pin<Box<dyn Future<Output = std::io::Result<TcpStream>> + Send>>
        + Send
        + Sync,
>;

/// Capability record the protocol engine invokes per connection: credential
/// check, hostname-to-IPv6 resolution, and the rotating-source dialer. The
/// members hold their backing stores by handle only.
pub struct Hooks {
    pub authenticate: AuthFn,
    pub resolve: ResolveFn,
    pub dial: DialFn,
}

enum Target {
    Ip(Ipv6Addr),
    Domain(String),
    UnsupportedV4,
}

/// Serve one SOCKS5 client: username/password negotiation, CONNECT request,
/// outbound dial through the hooks, then bidirectional relay until either
/// side closes.
pub async fn handle_connection<S>(mut client: S, hooks: Arc<Hooks>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    // Greeting: version + offered auth methods. Username/password is the
    // only acceptable method.
    let version = client.read_u8().await?;
    if version != SOCKS_VERSION {
        anyhow::bail!("unsupported SOCKS version: {}", version);
    }
    let nmethods = client.read_u8().await? as usize;
    let mut methods = vec![0u8; nmethods];
    client.read_exact(&mut methods).await?;
    if !methods.contains(&AUTH_USER_PASS) {
        client
            .write_all(&[SOCKS_VERSION, AUTH_NO_ACCEPTABLE])
            .await?;
        anyhow::bail!("client offers no username/password method");
    }
    client.write_all(&[SOCKS_VERSION, AUTH_USER_PASS]).await?;

    // RFC 1929 subnegotiation.
    let auth_version = client.read_u8().await?;
    if auth_version != AUTH_VERSION {
        anyhow::bail!("unsupported auth subnegotiation version: {}", auth_version);
    }
    let ulen = client.read_u8().await? as usize;
    let mut user = vec![0u8; ulen];
    client.read_exact(&mut user).await?;
    let plen = client.read_u8().await? as usize;
    let mut password = vec![0u8; plen];
    client.read_exact(&mut password).await?;
    let user = String::from_utf8(user)?;
    let password = String::from_utf8(password)?;

    if !(hooks.authenticate)(&user, &password) {
        client.write_all(&[AUTH_VERSION, AUTH_FAILURE]).await?;
        anyhow::bail!("authentication failed for user {:?}", user);
    }
    client.write_all(&[AUTH_VERSION, AUTH_SUCCESS]).await?;

    // Request: VER CMD RSV ATYP DST.ADDR DST.PORT
    let version = client.read_u8().await?;
    if version != SOCKS_VERSION {
        anyhow::bail!("unexpected version in request: {}", version);
    }
    let cmd = client.read_u8().await?;
    let _rsv = client.read_u8().await?;
    let atyp = client.read_u8().await?;

    let target = match atyp {
        ATYP_IPV6 => {
            let mut buf = [0u8; 16];
            client.read_exact(&mut buf).await?;
            Target::Ip(Ipv6Addr::from(buf))
        }
        ATYP_DOMAIN => {
            let len = client.read_u8().await? as usize;
            let mut buf = vec![0u8; len];
            client.read_exact(&mut buf).await?;
            Target::Domain(String::from_utf8(buf)?)
        }
        ATYP_IPV4 => {
            // consume the address so the port parses, then refuse
            let mut buf = [0u8; 4];
            client.read_exact(&mut buf).await?;
            Target::UnsupportedV4
        }
        other => {
            send_reply(&mut client, REP_ATYP_NOT_SUPPORTED).await?;
            anyhow::bail!("unsupported address type: {}", other);
        }
    };
    let port = client.read_u16().await?;

    if cmd != CMD_CONNECT {
        send_reply(&mut client, REP_CMD_NOT_SUPPORTED).await?;
        anyhow::bail!("unsupported SOCKS command: {}", cmd);
    }
    if matches!(target, Target::UnsupportedV4) {
        send_reply(&mut client, REP_ATYP_NOT_SUPPORTED).await?;
        anyhow::bail!("IPv4 destinations are not supported");
    }

    let dest_ip = match target {
        Target::Ip(ip) => ip,
        Target::Domain(host) => match (hooks.resolve)(host.clone()).await {
            Ok(ip) => ip,
            Err(e) => {
                send_reply(&mut client, REP_HOST_UNREACHABLE).await?;
                anyhow::bail!("resolving {} failed: {}", host, e);
            }
        },
        Target::UnsupportedV4 => unreachable!("refused above"),
    };
    let dest = SocketAddrV6::new(dest_ip, port, 0, 0);
    debug!("socks5_connect"; "destination" => dest.to_string());

    let mut remote = match (hooks.dial)(dest).await {
        Ok(stream) => stream,
        Err(e) => {
            send_reply(&mut client, reply_for_dial_error(&e)).await?;
            anyhow::bail!("connect to {} failed: {}", dest, e);
        }
    };

    send_reply(&mut client, REP_SUCCESS).await?;
    if let Err(e) = tokio::io::copy_bidirectional(&mut client, &mut remote).await {
        debug!("socks5_relay_closed"; "destination" => dest.to_string(), "error" => e.to_string());
    }
    Ok(())
}

fn reply_for_dial_error(e: &std::io::Error) -> u8 {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => REP_CONNECTION_REFUSED,
        std::io::ErrorKind::TimedOut => REP_TTL_EXPIRED,
        _ => REP_GENERAL_FAILURE,
    }
}

/// Reply with an unspecified IPv6 bind address:
/// VER REP RSV ATYP BND.ADDR(16) BND.PORT(2)
async fn send_reply<S: AsyncWrite + Unpin>(client: &mut S, rep: u8) -> std::io::Result<()> {
    let mut reply = [0u8; 22];
    reply[0] = SOCKS_VERSION;
    reply[1] = rep;
    reply[3] = ATYP_IPV6;
    client.write_all(&reply).await
}
