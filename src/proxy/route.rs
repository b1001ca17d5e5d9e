//! The runtime binding of a listener to a backend and its policies.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::backend::BackendConnection;
use crate::policy::OrderedPolicy;

/// A listener's current backend connection and ordered policy list.
///
/// Contents are swapped in place across reconfigurations, so client loops
/// that snapshot the route on every message observe new policy without
/// restarting.
pub struct Route {
    state: RwLock<RouteState>,
}

struct RouteState {
    backend: BackendConnection,
    policies: Arc<[OrderedPolicy]>,
}

impl Route {
    pub fn new(backend: BackendConnection, policies: Arc<[OrderedPolicy]>) -> Self {
        Self {
            state: RwLock::new(RouteState { backend, policies }),
        }
    }

    /// Copy the current binding out; locks are held only for the copy.
    pub async fn snapshot(&self) -> (BackendConnection, Arc<[OrderedPolicy]>) {
        let state = self.state.read().await;
        (state.backend.clone(), Arc::clone(&state.policies))
    }

    /// Swap in a new binding.
    pub async fn update(&self, backend: BackendConnection, policies: Arc<[OrderedPolicy]>) {
        let mut state = self.state.write().await;
        state.backend = backend;
        state.policies = policies;
    }
}
