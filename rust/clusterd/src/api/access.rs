//! Connection trust classes.
//!
//! Every request is tagged with an [`Access`] before routing. The control
//! socket tags its own connections; TCP connections are classified by
//! remote address. Endpoint groups then admit a fixed set of classes.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

use super::error_response;

/// Where a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Local control socket.
    Socket,
    /// TCP from this host.
    Loopback,
    /// TCP from a cluster member.
    Peer,
    Untrusted,
}

/// Remote state, locks and unlocks. The infra client cannot present peer
/// credentials but always runs on a cluster node.
pub const STATE_CLASSES: &[Access] = &[Access::Socket, Access::Loopback, Access::Peer];

/// Feature gates and cluster config.
pub const PEER_CLASSES: &[Access] = &[Access::Socket, Access::Peer];

/// Addresses of the other cluster members.
#[derive(Debug, Clone, Default)]
pub struct TrustedPeers {
    addrs: HashSet<IpAddr>,
}

impl TrustedPeers {
    pub fn new(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            addrs: addrs.into_iter().map(|ip| canonical(&ip)).collect(),
        }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.addrs.contains(&canonical(ip))
    }

    pub fn classify(&self, remote: &SocketAddr) -> Access {
        let ip = canonical(&remote.ip());
        if ip.is_loopback() {
            Access::Loopback
        } else if self.addrs.contains(&ip) {
            Access::Peer
        } else {
            Access::Untrusted
        }
    }
}

impl FromIterator<IpAddr> for TrustedPeers {
    fn from_iter<T: IntoIterator<Item = IpAddr>>(iter: T) -> Self {
        Self::new(iter)
    }
}

// IPv4-mapped IPv6 addresses compare as their IPv4 form.
fn canonical(ip: &IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(*v6)),
        v4 => *v4,
    }
}

/// Tag TCP requests by remote address. Requests already tagged (control
/// socket) pass through unchanged.
pub async fn classify_connection(
    State(peers): State<Arc<TrustedPeers>>,
    mut req: Request,
    next: Next,
) -> Response {
    if req.extensions().get::<Access>().is_none() {
        let access = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(remote)| peers.classify(remote));
        if let Some(access) = access {
            req.extensions_mut().insert(access);
        }
    }
    next.run(req).await
}

/// Admit only requests tagged with one of `allowed`; untagged requests are
/// untrusted.
pub async fn require(allowed: &'static [Access], req: Request, next: Next) -> Response {
    let access = req
        .extensions()
        .get::<Access>()
        .copied()
        .unwrap_or(Access::Untrusted);

    if !allowed.contains(&access) {
        tracing::warn!(
            "Rejected {:?} request to {} {}",
            access,
            req.method(),
            req.uri().path()
        );
        return error_response(StatusCode::FORBIDDEN, "not authorized");
    }
    next.run(req).await
}

pub async fn require_state_access(req: Request, next: Next) -> Response {
    require(STATE_CLASSES, req, next).await
}

pub async fn require_peer_access(req: Request, next: Next) -> Response {
    require(PEER_CLASSES, req, next).await
}
