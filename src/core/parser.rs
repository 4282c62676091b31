use crate::domain::model::{ProxyDescriptor, TargetSpec, DEFAULT_SCHEME};
use crate::utils::error::{ProxyError, Result};
use std::str::FromStr;

/// A descriptor together with the typed target it asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub descriptor: ProxyDescriptor,
    pub target: TargetSpec,
}

impl ParsedRequest {
    pub fn local_port(&self) -> u16 {
        self.descriptor.local_port
    }
}

/// Parses `scheme://host:port[:target[:targetPort]]`.
///
/// The scheme is optional and defaults to `socks5`. Only the host and the
/// local port are mandatory; a non-numeric target port is ignored.
pub fn parse_descriptor(raw: &str) -> Result<ParsedRequest> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProxyError::invalid_descriptor(raw, "descriptor is empty"));
    }

    let (scheme, rest) = match trimmed.split_once("://") {
        Some((scheme, rest)) if !scheme.is_empty() => (scheme, rest),
        Some((_, rest)) => (DEFAULT_SCHEME, rest),
        None => (DEFAULT_SCHEME, trimmed),
    };

    let parts: Vec<&str> = rest.split(':').collect();
    if parts.len() < 2 {
        return Err(ProxyError::invalid_descriptor(
            raw,
            "expected at least host and port",
        ));
    }

    let client_host = parts[0].trim();
    if client_host.is_empty() {
        return Err(ProxyError::invalid_descriptor(raw, "host is empty"));
    }

    let local_port = match parts[1].trim().parse::<u16>() {
        Ok(port) if port > 0 => port,
        _ => {
            return Err(ProxyError::invalid_descriptor(
                raw,
                format!("port '{}' is not a valid number", parts[1]),
            ))
        }
    };

    let target = parts.get(2).map(|t| t.trim()).unwrap_or("");
    let target_port = parts
        .get(3)
        .and_then(|p| p.trim().parse::<u16>().ok())
        .filter(|p| *p > 0);

    Ok(ParsedRequest {
        descriptor: ProxyDescriptor::new(scheme, client_host, local_port, target, target_port),
        target: TargetSpec::classify(target, target_port),
    })
}

impl FromStr for ProxyDescriptor {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        parse_descriptor(s).map(|parsed| parsed.descriptor)
    }
}
