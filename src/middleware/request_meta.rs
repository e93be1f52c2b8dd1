use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use ipnet::IpNet;

use crate::state::SharedState;

const MAX_USER_AGENT_LEN: usize = 512;

/// Client details recorded alongside change history entries.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl FromRequestParts<SharedState> for RequestMeta {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(extract(&parts.headers, peer, &state.config.trusted_proxies))
    }
}

pub fn extract(headers: &HeaderMap, peer_addr: Option<IpAddr>, trusted_proxies: &[IpNet]) -> RequestMeta {
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .filter(|ua| !ua.is_empty())
        .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect());

    RequestMeta {
        ip_address: client_ip(headers, peer_addr, trusted_proxies).map(|ip| ip.to_string()),
        user_agent,
    }
}

fn client_ip(headers: &HeaderMap, peer_addr: Option<IpAddr>, trusted_proxies: &[IpNet]) -> Option<IpAddr> {
    let peer = peer_addr?;

    // Only trust X-Forwarded-For if the direct connection is from a trusted proxy
    if trusted_proxies.iter().any(|net| net.contains(&peer)) {
        if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            // Walk right to left: the first hop not owned by us is the client
            for ip in xff.rsplit(',').filter_map(|s| s.trim().parse::<IpAddr>().ok()) {
                if !trusted_proxies.iter().any(|net| net.contains(&ip)) {
                    return Some(ip);
                }
            }
        }
    }

    Some(peer)
}
