use crate::utils::error::{PoolError, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use url::{Host, Url};

/// Per-target configuration consumed by the load balancer.
#[derive(Debug, Clone)]
pub struct TargetConf {
    /// Relative share of traffic this target should receive.
    pub weight: u16,
}

impl Default for TargetConf {
    fn default() -> Self {
        Self { weight: 1 }
    }
}

/// How the pool reaches a target: a fully resolved inet address, a
/// Unix-domain socket path, or a name resolved per connect attempt.
#[derive(Debug, Clone)]
pub enum TargetKind {
    Sockaddr(SocketAddr),
    Unix(PathBuf),
    Named { host: String, port: u16 },
}

/// One upstream endpoint the pool may connect to.
///
/// Targets are immutable after construction apart from `request_count`,
/// which tracks sockets checked out or mid-connect against this target.
/// The pool's target vector is append-only so indices stay valid for the
/// lifetime of checked-out sockets.
#[derive(Debug)]
pub struct Target {
    url: Url,
    kind: TargetKind,
    conf: TargetConf,
    request_count: AtomicI64,
}

impl Target {
    pub(crate) fn from_url(url: &Url, conf: TargetConf) -> Result<Self> {
        let kind = detect_kind(url)?;
        Ok(Self {
            url: url.clone(),
            kind,
            conf,
            request_count: AtomicI64::new(0),
        })
    }

    /// The origin URL. Domain hosts are lower-cased by the URL parser;
    /// Unix-socket paths keep their case.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn kind(&self) -> &TargetKind {
        &self.kind
    }

    pub fn conf(&self) -> &TargetConf {
        &self.conf
    }

    /// Number of sockets currently checked out or mid-connect against this
    /// target. Advisory; may drift negative on pools that never engage the
    /// balancer (see DESIGN.md).
    pub fn request_count(&self) -> i64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub(crate) fn incr_requests(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decr_requests(&self) {
        self.request_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Whether `url` names this target. Match key: scheme, effective port,
    /// and host (socket path for Unix-domain targets).
    pub(crate) fn matches(&self, url: &Url) -> bool {
        if self.url.scheme() != url.scheme() {
            return false;
        }
        if let TargetKind::Unix(path) = &self.kind {
            return Some(path.as_path()) == unix_path_of(url).as_deref();
        }
        if self.url.port_or_known_default() != url.port_or_known_default() {
            return false;
        }
        self.url.host_str() == url.host_str()
    }
}

fn unix_path_of(url: &Url) -> Option<PathBuf> {
    if url.scheme() != "unix" || url.path().is_empty() || url.path() == "/" {
        return None;
    }
    Some(PathBuf::from(url.path()))
}

fn detect_kind(url: &Url) -> Result<TargetKind> {
    if url.scheme() == "unix" {
        let path = unix_path_of(url).ok_or_else(|| {
            PoolError::InvalidTarget(format!("unix target without a socket path: {}", url))
        })?;
        return Ok(TargetKind::Unix(path));
    }

    let port = url
        .port_or_known_default()
        .ok_or_else(|| PoolError::InvalidTarget(format!("no port for target: {}", url)))?;

    match url.host() {
        Some(Host::Ipv4(ip)) => Ok(TargetKind::Sockaddr(SocketAddr::new(ip.into(), port))),
        Some(Host::Ipv6(ip)) => Ok(TargetKind::Sockaddr(SocketAddr::new(ip.into(), port))),
        Some(Host::Domain(host)) => Ok(TargetKind::Named {
            host: host.to_string(),
            port,
        }),
        None => Err(PoolError::InvalidTarget(format!(
            "target URL has no host: {}",
            url
        ))),
    }
}
