use std::io;
use std::net::{IpAddr, SocketAddr};
use tracing::instrument;

/// Resolve a named target into a list of socket addresses, preferring IPv6
/// entries first. The first entry is the one a connect attempt should use;
/// the rest are kept for callers that want their own fallback policy.
#[instrument(level = "debug", fields(host = host, port = port))]
pub async fn resolve(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    let lookup = tokio::net::lookup_host((host, port)).await?;
    let mut candidates: Vec<SocketAddr> = lookup.collect();

    // Prefer IPv6, then IPv4, while preserving order inside each category.
    candidates.sort_by_key(|addr| match addr.ip() {
        IpAddr::V6(_) => 0,
        IpAddr::V4(_) => 1,
    });

    if candidates.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no addresses found for host",
        ));
    }

    Ok(candidates)
}
