//! WebSocket URL derivation from a host origin.
//!
//! The session connects to the same host the application talks HTTP to,
//! upgrading the scheme: `http → ws`, `https → wss`. Any path, query or
//! fragment on the origin is discarded in favour of the configured path.

use crate::errors::{Result, SettingsError};

/// Build the WebSocket URL for `origin` and `path`.
pub fn derive_ws_url(origin: &str, path: &str) -> Result<String> {
    let origin = origin.trim();
    let (scheme, rest) = origin
        .split_once("://")
        .ok_or_else(|| invalid(origin, "missing scheme"))?;

    let ws_scheme = match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(invalid(origin, "scheme must be http, https, ws or wss")),
    };

    let authority = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    if authority.is_empty() {
        return Err(invalid(origin, "missing host"));
    }

    let path = path.trim();
    if path.is_empty() {
        Ok(format!("{ws_scheme}://{authority}"))
    } else if path.starts_with('/') {
        Ok(format!("{ws_scheme}://{authority}{path}"))
    } else {
        Ok(format!("{ws_scheme}://{authority}/{path}"))
    }
}

fn invalid(origin: &str, why: &str) -> SettingsError {
    SettingsError::InvalidValue(format!("endpoint origin {origin:?}: {why}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_becomes_ws() {
        assert_eq!(
            derive_ws_url("http://localhost:3000", "/ws").unwrap(),
            "ws://localhost:3000/ws"
        );
    }

    #[test]
    fn https_becomes_wss() {
        assert_eq!(
            derive_ws_url("https://chat.example.com", "/ws").unwrap(),
            "wss://chat.example.com/ws"
        );
    }

    #[test]
    fn ws_schemes_kept() {
        assert_eq!(derive_ws_url("ws://h", "/x").unwrap(), "ws://h/x");
        assert_eq!(derive_ws_url("WSS://h", "/x").unwrap(), "wss://h/x");
    }

    #[test]
    fn origin_path_and_query_dropped() {
        assert_eq!(
            derive_ws_url("https://app.example.com/inbox?tab=1", "/ws").unwrap(),
            "wss://app.example.com/ws"
        );
    }

    #[test]
    fn path_without_slash_gets_one() {
        assert_eq!(derive_ws_url("http://h:1", "socket").unwrap(), "ws://h:1/socket");
        assert_eq!(derive_ws_url("http://h:1", "").unwrap(), "ws://h:1");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(derive_ws_url("ftp://h", "/ws").is_err());
    }

    #[test]
    fn rejects_missing_scheme_or_host() {
        assert!(derive_ws_url("localhost:3000", "/ws").is_err());
        assert!(derive_ws_url("https://", "/ws").is_err());
    }
}
