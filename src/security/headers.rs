//! Client address resolution from forwarding headers.
//!
//! # Responsibilities
//! - Decide whether the socket peer is a trusted proxy
//! - Pick the client address out of `X-Forwarded-For` for trusted peers
//! - Warn once when proxy trust is configured but the header never arrives
//!
//! # Design Decisions
//! - Never trust existing X-Forwarded-For from untrusted sources
//! - `depth` counts from the right: the rightmost entry was added by the
//!   nearest proxy, so `depth = 1` trusts exactly one hop
//! - Unparseable or too-short headers fall back to the socket peer

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::HeaderMap;
use ipnetwork::IpNetwork;

use crate::config::ProxyTrustConfig;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Parse `"10.0.0.1"` or `"10.0.0.0/8"` (either family) into a network.
pub fn parse_ip_or_cidr(input: &str) -> Option<IpNetwork> {
    let input = input.trim();
    if let Ok(network) = IpNetwork::from_str(input) {
        return Some(network);
    }
    IpAddr::from_str(input).ok().map(IpNetwork::from)
}

pub fn ip_in_networks(ip: IpAddr, networks: &[IpNetwork]) -> bool {
    networks.iter().any(|network| network.contains(ip))
}

/// Resolves the effective client address of a request.
#[derive(Debug, Clone)]
pub struct ClientAddrResolver {
    trusted: Vec<IpNetwork>,
    depth: usize,
    trust_all: bool,
    warned_missing: Arc<AtomicBool>,
}

impl ClientAddrResolver {
    pub fn from_config(config: &ProxyTrustConfig) -> Self {
        let trusted = config
            .trusted_proxies
            .iter()
            .filter_map(|entry| {
                let parsed = parse_ip_or_cidr(entry);
                if parsed.is_none() {
                    tracing::warn!(entry = %entry, "Ignoring invalid trusted proxy entry");
                }
                parsed
            })
            .collect();

        Self {
            trusted,
            depth: config.depth.max(1),
            trust_all: config.trust_all,
            warned_missing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Trusts nothing; always returns the socket peer.
    pub fn direct() -> Self {
        Self::from_config(&ProxyTrustConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.trust_all || !self.trusted.is_empty()
    }

    fn trusts(&self, peer: IpAddr) -> bool {
        self.trust_all || ip_in_networks(peer, &self.trusted)
    }

    pub fn resolve(&self, peer: IpAddr, headers: &HeaderMap) -> IpAddr {
        let peer = peer.to_canonical();
        if !self.trusts(peer) {
            return peer;
        }

        let forwarded: Vec<&str> = headers
            .get_all(X_FORWARDED_FOR)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .collect();

        if forwarded.is_empty() {
            if !self.warned_missing.swap(true, Ordering::Relaxed) {
                tracing::error!(
                    peer = %peer,
                    "Proxy trust is enabled but no X-Forwarded-For header was received; \
                     logged client addresses will be proxy addresses"
                );
            }
            return peer;
        }

        let Some(candidate) = forwarded.len().checked_sub(self.depth).map(|i| forwarded[i]) else {
            return peer;
        };
        match IpAddr::from_str(candidate) {
            Ok(ip) => ip.to_canonical(),
            Err(_) => {
                tracing::debug!(value = %candidate, "Unparseable X-Forwarded-For entry");
                peer
            }
        }
    }
}
