//! TCP peer stages: dial and listen
//!
//! A TCP peer speaks raw wire frames; the adapter default (JSON) is
//! overridden accordingly. With `--md5` the signature option is applied to
//! the socket before connect/listen so the kernel signs the handshake too.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Arg, Command};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tracing::{debug, info};

use bgpipe_core::{CoreError, Result, Stage, StageOptions, StageRef, StageSpec};
use bgpipe_extio::{extio_flags, Extio, ExtioMode, Repr};

const MD5_KEY_MAX: usize = 80;

pub(crate) fn tcp_spec() -> StageSpec {
    StageSpec {
        options: StageOptions {
            descr: "dial a BGP peer over TCP",
            args: &["addr"],
            is_producer: true,
            is_consumer: true,
            ..Default::default()
        },
        command: tcp_command,
        ctor: Box::new(|| Box::new(TcpStage::default())),
    }
}

pub(crate) fn listen_spec() -> StageSpec {
    StageSpec {
        options: StageOptions {
            descr: "wait for a BGP peer over TCP",
            args: &["addr"],
            is_producer: true,
            is_consumer: true,
            ..Default::default()
        },
        command: tcp_command,
        ctor: Box::new(|| Box::new(ListenStage::default())),
    }
}

fn tcp_command() -> Command {
    extio_flags(Command::new("tcp"), ExtioMode::Bidir)
        .arg(
            Arg::new("md5")
                .long("md5")
                .value_name("PASS")
                .help("TCP-MD5 signature password"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECONDS")
                .default_value("10")
                .help("connect timeout"),
        )
}

/// Shared configuration of the dial/listen stages
#[derive(Default)]
struct TcpCommon {
    addr: String,
    md5: Option<String>,
    timeout: u64,
    eio: Option<Arc<Extio>>,
}

impl TcpCommon {
    fn attach(&mut self, base: &StageRef) -> Result<()> {
        let cfg = base.cfg();
        self.addr = cfg
            .arg("addr")
            .ok_or_else(|| CoreError::MissingArgument("addr".to_string()))?
            .to_string();
        self.md5 = cfg.str_opt("md5");
        self.timeout = cfg
            .str_opt("timeout")
            .and_then(|t| t.parse().ok())
            .unwrap_or(10);

        // unless told otherwise, a TCP peer speaks wire frames
        self.eio = Some(Extio::attach_with(base, ExtioMode::Bidir, Repr::Raw)?);
        Ok(())
    }

    async fn resolve(&self) -> Result<SocketAddr> {
        lookup_host(&self.addr)
            .await?
            .next()
            .ok_or_else(|| CoreError::custom(format!("cannot resolve: {}", self.addr)))
    }

    fn socket_for(&self, addr: &SocketAddr) -> Result<TcpSocket> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if let Some(pass) = &self.md5 {
            set_md5sig(&socket, addr, pass)?;
        }
        Ok(socket)
    }
}

/// Dials `ADDR` and speaks raw BGP with the peer
#[derive(Default)]
pub struct TcpStage {
    common: TcpCommon,
}

#[async_trait]
impl Stage for TcpStage {
    fn attach(&mut self, base: &StageRef) -> Result<()> {
        self.common.attach(base)
    }

    async fn run(&mut self, base: StageRef) -> Result<()> {
        let addr = self.common.resolve().await?;
        let socket = self.common.socket_for(&addr)?;

        let connect = tokio::time::timeout(
            Duration::from_secs(self.common.timeout),
            socket.connect(addr),
        );
        let stop_token = base.stop_token();
        let stream = tokio::select! {
            result = connect => match result {
                Ok(stream) => stream?,
                Err(_) => return Err(CoreError::custom(format!("connect timeout: {addr}"))),
            },
            _ = stop_token.cancelled() => return Err(CoreError::Stopped),
        };

        let eio = self
            .common
            .eio
            .clone()
            .ok_or_else(|| CoreError::custom("tcp: not attached"))?;
        handle_conn(&base, &eio, stream).await
    }
}

/// Accepts one connection on `ADDR` and speaks raw BGP with the peer
#[derive(Default)]
pub struct ListenStage {
    common: TcpCommon,
}

#[async_trait]
impl Stage for ListenStage {
    fn attach(&mut self, base: &StageRef) -> Result<()> {
        self.common.attach(base)
    }

    async fn run(&mut self, base: StageRef) -> Result<()> {
        let addr = self.common.resolve().await?;
        let socket = self.common.socket_for(&addr)?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(1)?;
        info!(%addr, "listening");

        let stop_token = base.stop_token();
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = stop_token.cancelled() => return Err(CoreError::Stopped),
        };
        debug!(%peer, "accepted");

        let eio = self
            .common
            .eio
            .clone()
            .ok_or_else(|| CoreError::custom("listen: not attached"))?;
        handle_conn(&base, &eio, stream).await
    }
}

/// Pump one established connection until both halves are finished.
///
/// The reader half injects peer frames into the pipe; the writer half
/// drains the adapter egress. EOF on either half is not an error and
/// leaves the other half to finish on its own.
async fn handle_conn(base: &StageRef, eio: &Arc<Extio>, stream: TcpStream) -> Result<()> {
    let local = stream.local_addr()?;
    let peer = stream.peer_addr()?;
    info!(%local, %peer, "connected");
    base.event(
        "CONNECTED",
        Some(serde_json::json!({ "local": local.to_string(), "peer": peer.to_string() })),
    )
    .await;

    // discard undelivered data on forced close
    stream.set_linger(Some(Duration::ZERO))?;
    stream.set_nodelay(true)?;
    socket2::SockRef::from(&stream)
        .set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(Duration::from_secs(60)))?;

    eio.close_on_done();
    let (rd, wr) = stream.into_split();

    let reader = tokio::spawn(conn_reader(eio.clone(), rd));
    let writer = tokio::spawn(conn_writer(eio.clone(), wr));

    let stop_token = base.stop_token();
    let result = tokio::select! {
        pair = async { tokio::join!(reader, writer) } => {
            match pair {
                (Ok(read), Ok(wrote)) => read.and(wrote),
                _ => Err(CoreError::custom("connection task failed")),
            }
        }
        _ = stop_token.cancelled() => {
            eio.output_close();
            eio.input_close();
            Err(CoreError::Stopped)
        }
    };

    info!(%peer, "connection closed");
    result
}

async fn conn_reader(eio: Arc<Extio>, rd: OwnedReadHalf) -> Result<()> {
    let result = eio.read_stream(rd, None).await;
    debug!(ok = result.is_ok(), "connection reader returned");
    result
}

async fn conn_writer(eio: Arc<Extio>, mut wr: OwnedWriteHalf) -> Result<()> {
    let result = eio.write_stream(&mut wr).await;
    debug!(ok = result.is_ok(), "connection writer returned");
    // half-close so the peer can drain
    let _ = wr.shutdown().await;
    result
}

// ============================================================================
// TCP-MD5
// ============================================================================

/// `struct tcp_md5sig` from `linux/tcp.h`, not exposed by the `libc` crate.
#[cfg(target_os = "linux")]
#[repr(C)]
#[allow(non_camel_case_types)]
struct tcp_md5sig {
    tcpm_addr: libc::sockaddr_storage,
    tcpm_flags: u8,
    tcpm_prefixlen: u8,
    tcpm_keylen: u16,
    tcpm_ifindex: libc::c_int,
    tcpm_key: [u8; MD5_KEY_MAX],
}

/// Password zero-padded to the kernel's fixed key buffer
fn md5_key(password: &str) -> ([u8; MD5_KEY_MAX], u16) {
    let mut key = [0u8; MD5_KEY_MAX];
    let len = password.len().min(MD5_KEY_MAX);
    key[..len].copy_from_slice(&password.as_bytes()[..len]);
    (key, len as u16)
}

/// Apply `TCP_MD5SIG_EXT` before connect/listen, with the address family
/// matching the peer and prefix matching enabled for the whole family.
#[cfg(target_os = "linux")]
fn set_md5sig(socket: &TcpSocket, addr: &SocketAddr, password: &str) -> Result<()> {
    use std::os::fd::AsRawFd;

    const TCP_MD5SIG_FLAG_PREFIX: u8 = 1;

    let (key, keylen) = md5_key(password);
    // zeroed address + prefixlen 0: sign every peer of this family
    let mut sig: tcp_md5sig = unsafe { std::mem::zeroed() };
    sig.tcpm_addr.ss_family = if addr.is_ipv4() {
        libc::AF_INET as libc::sa_family_t
    } else {
        libc::AF_INET6 as libc::sa_family_t
    };
    sig.tcpm_flags = TCP_MD5SIG_FLAG_PREFIX;
    sig.tcpm_prefixlen = 0;
    sig.tcpm_keylen = keylen;
    sig.tcpm_key = key;

    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_MD5SIG_EXT,
            &sig as *const tcp_md5sig as *const libc::c_void,
            std::mem::size_of::<tcp_md5sig>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_md5sig(_socket: &TcpSocket, _addr: &SocketAddr, _password: &str) -> Result<()> {
    Err(CoreError::custom(
        "--md5 is only supported on Linux (TCP_MD5SIG_EXT)",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_key_zero_padded() {
        let (key, len) = md5_key("secret");
        assert_eq!(len, 6);
        assert_eq!(&key[..6], b"secret");
        assert!(key[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_md5_key_truncates_long_passwords() {
        let long = "x".repeat(100);
        let (key, len) = md5_key(&long);
        assert_eq!(len, MD5_KEY_MAX as u16);
        assert!(key.iter().all(|&b| b == b'x'));
    }
}
