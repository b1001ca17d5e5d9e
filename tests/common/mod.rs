//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use mdcmux::config::{Config, Target};
use mdcmux::dummy;
use mdcmux::message::wire::LineScanner;
use mdcmux::policy::{Policy, Prefix};
use mdcmux::Proxy;

/// A line-mode MDC test client that strips prompt framing from replies.
pub struct MdcClient {
    scanner: LineScanner<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl MdcClient {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            scanner: LineScanner::prompt_lines(read_half),
            writer: write_half,
        })
    }

    pub async fn send(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await
    }

    /// Read the next non-empty reply token, or `None` at EOF.
    pub async fn read_reply(&mut self) -> io::Result<Option<String>> {
        loop {
            match self.scanner.scan().await? {
                None => return Ok(None),
                Some(token) if token.is_empty() => continue,
                Some(token) => return Ok(Some(String::from_utf8_lossy(&token).into_owned())),
            }
        }
    }

    /// Send a command and wait for its reply.
    pub async fn round_trip(&mut self, line: &str) -> io::Result<String> {
        self.send(line).await?;
        self.read_reply()
            .await?
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))
    }
}

/// A running dummy server plus a proxy routed at it.
pub struct Rig {
    pub cancel: CancellationToken,
    pub dummy: dummy::Server,
    pub proxy: Arc<Proxy>,
    pub cfg: watch::Sender<Arc<Config>>,
    /// The proxy listener's local address.
    pub addr: SocketAddr,
}

impl Rig {
    /// Start a dummy server and a proxy with the given global policy map.
    pub async fn start(policy: HashMap<Prefix, Policy>) -> Rig {
        let cancel = CancellationToken::new();
        let dummy = dummy::Server::spawn(cancel.clone(), "127.0.0.1:0")
            .await
            .expect("dummy server failed to start");

        let config = config_for(dummy.addr(), policy);
        let (cfg, rx) = watch::channel(Arc::new(config));
        let proxy = Proxy::new(rx);

        let mut reconfigured = proxy.reconfigured();
        tokio::spawn(Arc::clone(&proxy).run(cancel.clone()));
        tokio::time::timeout(Duration::from_secs(5), reconfigured.changed())
            .await
            .expect("never saw configuration update")
            .expect("proxy exited");

        let addrs = proxy.listener_addrs().await;
        assert_eq!(addrs.len(), 1, "expected exactly one listener");

        Rig {
            cancel,
            dummy,
            proxy,
            cfg,
            addr: addrs[0],
        }
    }

    /// Push a new configuration and wait for the proxy to apply it.
    pub async fn reconfigure(&self, config: Config) {
        let mut reconfigured = self.proxy.reconfigured();
        reconfigured.mark_unchanged();
        self.cfg
            .send(Arc::new(config))
            .expect("proxy no longer listening for config");
        tokio::time::timeout(Duration::from_secs(5), reconfigured.changed())
            .await
            .expect("never saw configuration update")
            .expect("proxy exited");
    }

    pub async fn client(&self) -> MdcClient {
        MdcClient::connect(self.addr)
            .await
            .expect("could not connect to proxy")
    }
}

/// A config with one target routed at the given backend address.
pub fn config_for(backend: SocketAddr, policy: HashMap<Prefix, Policy>) -> Config {
    Config {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        max_idle: Duration::ZERO,
        policy,
        targets: HashMap::from([(
            backend.to_string(),
            Target {
                proxy_port: 0,
                policy: HashMap::new(),
                ordered: Vec::new(),
            },
        )]),
    }
}

/// A policy map for `127.0.0.1/32` only.
pub fn localhost_policy(policy: Policy) -> HashMap<Prefix, Policy> {
    HashMap::from([("127.0.0.1/32".parse().unwrap(), policy)])
}
