//! Client identification from request metadata.

use axum::http::HeaderMap;
use std::net::SocketAddr;

use super::key::ClientKey;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Derives a [`ClientKey`] from request headers and the transport peer.
///
/// Precedence is the first `X-Forwarded-For` entry, then `X-Real-IP`, then
/// the peer IP, then `"unknown"`.
///
/// # Security
///
/// Proxy headers are taken at face value. This is only correct when the
/// service sits behind a reverse proxy that overwrites them; when clients can
/// reach the service directly they can forge any key they like. Deployments
/// without such a proxy should set `trust_proxy_headers: false`.
#[derive(Debug, Clone, Copy)]
pub struct ClientIdentifier {
    trust_proxy_headers: bool,
}

impl ClientIdentifier {
    pub fn new(trust_proxy_headers: bool) -> Self {
        Self {
            trust_proxy_headers,
        }
    }

    /// Identify the caller. Never fails.
    pub fn identify(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientKey {
        if self.trust_proxy_headers {
            if let Some(ip) = header_str(headers, X_FORWARDED_FOR)
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
            {
                return ClientKey::new(ip);
            }

            if let Some(ip) = header_str(headers, X_REAL_IP)
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
            {
                return ClientKey::new(ip);
            }
        }

        match peer {
            Some(addr) => ClientKey::new(addr.ip().to_string()),
            None => ClientKey::unknown(),
        }
    }
}

impl Default for ClientIdentifier {
    fn default() -> Self {
        Self::new(true)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
