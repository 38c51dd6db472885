//! Client IP extraction from proxy headers.
//!
//! Header precedence: `x-forwarded-for` (first public hop), `x-real-ip`,
//! `cf-connecting-ip`, `x-vercel-forwarded-for` (only when the request also
//! carries `x-vercel-proxy-signature`), then the socket address. Private,
//! loopback and link-local addresses are never returned; behind a proxy
//! they identify infrastructure, not the visitor.

use std::net::IpAddr;

use axum::http::HeaderMap;

pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // fe80::/10
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

fn parse_candidate(raw: &str) -> Option<IpAddr> {
    let trimmed = raw.trim().trim_start_matches('[').trim_end_matches(']');
    trimmed.parse::<IpAddr>().ok()
}

fn public_from_chain(chain: &str) -> Option<String> {
    chain
        .split(',')
        .filter_map(parse_candidate)
        .find(|ip| !is_private_ip(*ip))
        .map(|ip| ip.to_string())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Best-effort public client IP, or `None` when every candidate is private
/// or absent.
pub fn client_ip(headers: &HeaderMap, socket: Option<IpAddr>) -> Option<String> {
    if let Some(chain) = header_value(headers, "x-forwarded-for") {
        if let Some(ip) = public_from_chain(chain) {
            return Some(ip);
        }
    }
    for name in ["x-real-ip", "cf-connecting-ip"] {
        if let Some(ip) = header_value(headers, name)
            .and_then(parse_candidate)
            .filter(|ip| !is_private_ip(*ip))
        {
            return Some(ip.to_string());
        }
    }
    if headers.contains_key("x-vercel-proxy-signature") {
        if let Some(chain) = header_value(headers, "x-vercel-forwarded-for") {
            if let Some(ip) = public_from_chain(chain) {
                return Some(ip);
            }
        }
    }
    socket
        .filter(|ip| !is_private_ip(*ip))
        .map(|ip| ip.to_string())
}
