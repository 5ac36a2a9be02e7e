//! Error classification — maps a failed `reqwest` send, or a completed
//! response's status code, onto the timeout/dns/connection/ssl/http_4xx/
//! http_5xx/unknown split the Executor's retry decision needs.

use sched_domain::ErrorClass;

/// Classify a transport-level failure (the request never got a response).
///
/// `reqwest` doesn't expose a dedicated "is_dns" / "is_tls" probe — DNS and
/// TLS failures both surface as `is_connect() == true` with the specifics
/// buried in the source chain's `Display` text. We walk the chain looking
/// for the usual substrings (`"dns error"`, `"failed to lookup"` for DNS;
/// `"certificate"`, `"tls"`, `"ssl"` for TLS) before falling back to the
/// generic `connection` class.
pub fn classify_transport_error(err: &reqwest::Error) -> (ErrorClass, String) {
    let message = describe_error(err);

    if err.is_timeout() {
        return (ErrorClass::Timeout, message);
    }

    if err.is_connect() || err.is_request() {
        let lower = message.to_ascii_lowercase();
        if lower.contains("dns") || lower.contains("lookup") || lower.contains("resolve") || lower.contains("no such host") {
            return (ErrorClass::Dns, message);
        }
        if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") || lower.contains("handshake") {
            return (ErrorClass::Ssl, message);
        }
        return (ErrorClass::Connection, message);
    }

    (ErrorClass::Unknown, message)
}

/// Classify a completed HTTP response by status code.
pub fn classify_status(status: reqwest::StatusCode) -> ErrorClass {
    if status.is_success() || status.is_redirection() {
        ErrorClass::None
    } else if status.is_client_error() {
        ErrorClass::Http4xx
    } else if status.is_server_error() {
        ErrorClass::Http5xx
    } else {
        ErrorClass::Unknown
    }
}

/// Flatten a `reqwest::Error`'s source chain into one readable message —
/// the top-level `Display` is often just "error sending request for url
/// (...)", with the actual cause one or two `source()` hops down.
fn describe_error(err: &reqwest::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut cause = std::error::Error::source(err);
    while let Some(e) = cause {
        parts.push(e.to_string());
        cause = e.source();
    }
    parts.join(": ")
}
