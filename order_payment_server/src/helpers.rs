use std::{net::IpAddr, str::FromStr};

use actix_web::HttpRequest;
use hmac::{Hmac, Mac};
use log::{debug, trace};
use regex::Regex;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Calculates the base64-encoded HMAC-SHA256 of `data`, keyed with `secret`. This is the value the payment gateway
/// puts in its signature header.
pub fn calculate_hmac(secret: &str, data: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::default(),
    };
    mac.update(data);
    base64::encode(mac.finalize().into_bytes())
}

/// Get the remote IP address from the request. It uses 3 sources to determine the IP address, in decreasing order
/// of preference:
/// 1. The `X-Forwarded-For` header, iif `use_x_forwarded_for` is set to true in the configuration.
/// 2. The `Forwarded` header, iif `use_forwarded` is set to true in the configuration.
/// 3. The peer address from the connection info.
pub fn get_remote_ip(req: &HttpRequest, use_x_forwarded_for: bool, use_forwarded: bool) -> Option<IpAddr> {
    let mut result = None;
    if use_x_forwarded_for {
        trace!("Checking X-Forwarded-For header");
        result = req
            .headers()
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| IpAddr::from_str(s.trim()).ok());
        if let Some(ip) = result {
            debug!("Using X-Forwarded-For header for remote address: {ip}");
        }
    }
    if use_forwarded && result.is_none() {
        trace!("Checking Forwarded header");
        let re = Regex::new(r#"for=(?P<ip>[^;,]+)"#).ok();
        result = req
            .headers()
            .get("Forwarded")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| re.as_ref().and_then(|re| re.captures(v)))
            .and_then(|caps| caps.name("ip"))
            .map(|m| m.as_str().trim_matches('"'))
            .and_then(|s| IpAddr::from_str(s).ok());
        if let Some(ip) = result {
            debug!("Using Forwarded header for remote address: {ip}");
        }
    }
    result.or_else(|| {
        let peer_addr = req.peer_addr().map(|a| a.ip());
        trace!("Using Peer address for remote address: {:?}", peer_addr);
        peer_addr
    })
}

#[cfg(test)]
mod test {
    use actix_web::test::TestRequest;

    use super::*;

    #[test]
    fn hmac_is_keyed_and_deterministic() {
        let hmac = calculate_hmac("secret", br#"{"reference":"txn_18f2a4c3b2e0001_aB3dE5gH7jK9mN1p","amount":5000}"#);
        assert_eq!(hmac.len(), 44);
        assert_ne!(hmac, calculate_hmac("other secret", br#"{"reference":"txn_18f2a4c3b2e0001_aB3dE5gH7jK9mN1p","amount":5000}"#));
        assert_eq!(hmac, calculate_hmac("secret", br#"{"reference":"txn_18f2a4c3b2e0001_aB3dE5gH7jK9mN1p","amount":5000}"#));
    }

    #[test]
    fn remote_ip_sources() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "10.0.0.1, 192.168.1.1"))
            .insert_header(("Forwarded", "for=10.0.0.2;proto=https"))
            .peer_addr("127.0.0.1:5000".parse().unwrap())
            .to_http_request();
        assert_eq!(get_remote_ip(&req, true, true), Some("10.0.0.1".parse().unwrap()));
        assert_eq!(get_remote_ip(&req, false, true), Some("10.0.0.2".parse().unwrap()));
        assert_eq!(get_remote_ip(&req, false, false), Some("127.0.0.1".parse().unwrap()));
    }
}
