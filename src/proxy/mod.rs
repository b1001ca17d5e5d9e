//! The proxy core: listener lifecycle, routing, and reconciliation.
//!
//! # Responsibilities
//! - Reconcile listeners, backend connections, and routes against each
//!   configuration revision
//! - Accept client connections and run the per-client loop
//! - Conserve sockets across reconfiguration: a backend still referenced by
//!   the new config keeps its connection, and a listener at the same
//!   address keeps its socket so in-flight clients survive
//!
//! Rebinding a listening socket would break live client connections and
//! race with port reuse, so listeners are keyed by `(bind, proxy_port)` and
//! reused; only the route contents behind them are swapped.

pub mod client;
pub mod route;

pub use client::ClientError;
pub use route::Route;

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::backend::BackendConnection;
use crate::config::Config;
use crate::policy::OrderedPolicy;

/// Error type for proxy lifecycle operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("could not bind listener at {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Identifies one bound listener across the proxy's maps for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct ListenerEntry {
    id: ListenerId,
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

#[derive(Default)]
struct State {
    // Network connections to the MDC servers are conserved across
    // reconfiguration.
    backends: HashMap<String, BackendConnection>,

    // Listeners are conserved too, keyed by their requested bind address.
    listeners: HashMap<SocketAddr, Arc<ListenerEntry>>,

    routes: HashMap<ListenerId, Arc<Route>>,
}

/// The MDC proxy.
///
/// Subscribe to the configuration stream with [`Proxy::new`], then drive it
/// with [`Proxy::run`].
pub struct Proxy {
    cfg: watch::Receiver<Arc<Config>>,
    // Bumped after every applied reconfiguration; tests await it.
    reconfigured: watch::Sender<u64>,
    next_listener_id: AtomicU64,
    state: RwLock<State>,
}

impl Proxy {
    pub fn new(cfg: watch::Receiver<Arc<Config>>) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            reconfigured: watch::channel(0).0,
            next_listener_id: AtomicU64::new(0),
            state: RwLock::default(),
        })
    }

    /// A receiver that observes each applied reconfiguration.
    pub fn reconfigured(&self) -> watch::Receiver<u64> {
        self.reconfigured.subscribe()
    }

    /// The local addresses of all currently bound listeners.
    pub async fn listener_addrs(&self) -> Vec<SocketAddr> {
        self.state
            .read()
            .await
            .listeners
            .values()
            .map(|entry| entry.local_addr)
            .collect()
    }

    pub(crate) fn current_config(&self) -> Arc<Config> {
        self.cfg.borrow().clone()
    }

    pub(crate) async fn route_snapshot(
        &self,
        listener: ListenerId,
    ) -> Option<(BackendConnection, Arc<[OrderedPolicy]>)> {
        let route = Arc::clone(self.state.read().await.routes.get(&listener)?);
        Some(route.snapshot().await)
    }

    /// Apply the initial configuration and keep reconciling against new
    /// revisions until cancelled. A bind failure on the initial
    /// configuration is fatal; later failures keep the previous state.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<(), ProxyError> {
        let mut cfg = self.cfg.clone();

        let initial = cfg.borrow_and_update().clone();
        Proxy::reconcile(&self, &cancel, &initial).await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = cfg.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = cfg.borrow_and_update().clone();
                    // A failed pass has already logged and left the
                    // previous state in place.
                    let _ = Proxy::reconcile(&self, &cancel, &next).await;
                }
            }
        }

        // Shutting down: close all listeners and drop the routing state so
        // in-flight client loops drain out.
        let mut state = self.state.write().await;
        for entry in state.listeners.values() {
            entry.cancel.cancel();
        }
        *state = State::default();
        Ok(())
    }

    async fn reconcile(
        this: &Arc<Self>,
        cancel: &CancellationToken,
        config: &Arc<Config>,
    ) -> Result<(), ProxyError> {
        tracing::debug!("updating configuration");
        let mut config = (**config).clone();
        config.expand_policy();

        let mut state = this.state.write().await;

        let mut next_backends = HashMap::new();
        let mut next_listeners: HashMap<SocketAddr, Arc<ListenerEntry>> = HashMap::new();
        let mut next_routes = HashMap::new();

        for (hostname, target) in &config.targets {
            // Find the backend connection from the previous generation.
            let backend = state
                .backends
                .get(hostname)
                .cloned()
                .unwrap_or_else(|| BackendConnection::new(hostname.clone()));
            next_backends.insert(hostname.clone(), backend.clone());

            // Find the existing listener, or bind one.
            let addr = SocketAddr::new(config.bind, target.proxy_port);
            let entry = match state
                .listeners
                .get(&addr)
                .or_else(|| next_listeners.get(&addr))
            {
                Some(existing) => Arc::clone(existing),
                None => {
                    let bound = match TcpListener::bind(addr).await {
                        Ok(listener) => listener
                            .local_addr()
                            .map(|local_addr| (local_addr, listener)),
                        Err(source) => Err(source),
                    };
                    let (local_addr, listener) = match bound {
                        Ok(bound) => bound,
                        Err(source) => {
                            tracing::error!(
                                hostname = %hostname,
                                address = %addr,
                                error = %source,
                                "could not create listener, not reconfiguring"
                            );
                            // Unwind listeners opened earlier in this pass
                            // that the previous state does not own.
                            for opened in next_listeners.values() {
                                if !state.listeners.values().any(|e| e.id == opened.id) {
                                    opened.cancel.cancel();
                                }
                            }
                            return Err(ProxyError::Bind { addr, source });
                        }
                    };
                    let entry = Arc::new(ListenerEntry {
                        id: ListenerId(this.next_listener_id.fetch_add(1, Ordering::SeqCst)),
                        local_addr,
                        cancel: cancel.child_token(),
                    });
                    tracing::debug!(target = %hostname, proxy = %local_addr, "proxy listening");
                    Proxy::spawn_accept(this, listener, entry.id, entry.cancel.clone(), cancel.clone());
                    entry
                }
            };
            next_listeners.insert(addr, Arc::clone(&entry));

            // Reuse the route object so live clients observe the swap.
            let policies: Arc<[OrderedPolicy]> = target.ordered.clone().into();
            let route = match state.routes.get(&entry.id) {
                Some(existing) => {
                    existing.update(backend, policies).await;
                    Arc::clone(existing)
                }
                None => Arc::new(Route::new(backend, policies)),
            };
            next_routes.insert(entry.id, route);
        }

        // Close listeners that are no longer referenced.
        for (addr, entry) in &state.listeners {
            if !next_listeners.contains_key(addr) {
                tracing::debug!(address = %addr, "closing listener due to reconfiguration");
                entry.cancel.cancel();
            }
        }

        state.backends = next_backends;
        state.listeners = next_listeners;
        state.routes = next_routes;

        this.reconfigured.send_modify(|generation| *generation += 1);
        Ok(())
    }

    fn spawn_accept(
        this: &Arc<Self>,
        listener: TcpListener,
        id: ListenerId,
        listener_cancel: CancellationToken,
        cancel: CancellationToken,
    ) {
        let proxy = Arc::clone(this);
        tokio::spawn(async move {
            let local_addr = listener.local_addr().ok();
            loop {
                let accepted = tokio::select! {
                    _ = listener_cancel.cancelled() => {
                        tracing::debug!(listener = ?local_addr, "no longer accepting connections");
                        return;
                    }
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, remote)) => {
                        let proxy = Arc::clone(&proxy);
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            if let Err(error) =
                                client::serve(proxy, id, stream, remote, cancel).await
                            {
                                tracing::error!(client = %remote, %error, "could not proxy connection");
                            }
                        });
                    }
                    Err(error) => {
                        tracing::debug!(listener = ?local_addr, %error, "no longer accepting connections");
                        return;
                    }
                }
            }
        });
    }
}
