use std::fmt;

const CONNECT_TOKEN: &str = "CONNECT";
const CONNECT_PREFIX_LEN: usize = "CONNECT ".len();
const HTTP_VERSION_TOKEN: &str = "HTTP/";
const ABSOLUTE_URI_TOKEN: &str = " http://";

/// Destination port for plain absolute-URI requests
pub const PLAIN_HTTP_PORT: u16 = 80;

const MAX_HOSTNAME_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;

/// Error type for request classification
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("request is neither a CONNECT tunnel nor an absolute-URI HTTP request")]
    UnknownRequest,

    #[error("missing '{0}' delimiter in request")]
    MissingDelimiter(&'static str),

    #[error("request names an empty host")]
    EmptyHost,

    #[error("invalid port: {0:?}")]
    InvalidPort(String),
}

/// How the client wants its bytes carried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// `CONNECT host:port HTTP/x` opaque tunnel
    Tunnel,
    /// `GET http://host/path HTTP/x` style request, always port 80
    PlainHttp,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Tunnel => f.write_str("tunnel"),
            RequestKind::PlainHttp => f.write_str("plain-http"),
        }
    }
}

/// Destination extracted from the first bytes of a client connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub host: String,
    pub port: u16,
    pub kind: RequestKind,
}

/// Classify the first read of a new client connection.
///
/// Only the literal markers are inspected; headers are not parsed and the
/// hostname is returned exactly as written by the client.
pub fn parse_request(initial: &[u8]) -> Result<ParsedRequest, ParseError> {
    let text = String::from_utf8_lossy(initial);

    if let Some(start) = text.find(CONNECT_TOKEN) {
        parse_connect(&text, start)
    } else if let Some(start) = text.find(ABSOLUTE_URI_TOKEN) {
        parse_absolute_uri(&text, start)
    } else {
        Err(ParseError::UnknownRequest)
    }
}

fn parse_connect(text: &str, start: usize) -> Result<ParsedRequest, ParseError> {
    let host_start = start + CONNECT_PREFIX_LEN;
    let colon = text[start..]
        .find(':')
        .map(|idx| start + idx)
        .filter(|&idx| idx >= host_start)
        .ok_or(ParseError::MissingDelimiter(":"))?;
    let version = text[colon..]
        .find(HTTP_VERSION_TOKEN)
        .map(|idx| colon + idx)
        .ok_or(ParseError::MissingDelimiter(HTTP_VERSION_TOKEN))?;

    let host = text.get(host_start..colon).unwrap_or_default();
    if host.is_empty() {
        return Err(ParseError::EmptyHost);
    }

    // The port ends one character (the separating space) before "HTTP/"
    let port_text = text
        .get(colon + 1..version.saturating_sub(1))
        .unwrap_or_default();
    let port = port_text
        .trim()
        .parse::<u16>()
        .map_err(|_| ParseError::InvalidPort(port_text.to_string()))?;

    Ok(ParsedRequest {
        host: host.to_string(),
        port,
        kind: RequestKind::Tunnel,
    })
}

fn parse_absolute_uri(text: &str, start: usize) -> Result<ParsedRequest, ParseError> {
    let rest = &text[start + ABSOLUTE_URI_TOKEN.len()..];
    let slash = rest.find('/').ok_or(ParseError::MissingDelimiter("/"))?;
    let host = &rest[..slash];
    if host.is_empty() {
        return Err(ParseError::EmptyHost);
    }

    Ok(ParsedRequest {
        host: host.to_string(),
        port: PLAIN_HTTP_PORT,
        kind: RequestKind::PlainHttp,
    })
}

/// Check whether a hostname is RFC 1123 compliant.
///
/// One trailing dot is ignored. The remaining name must be at most 255
/// characters and every label 1-63 alphanumerics or hyphens, not starting or
/// ending with a hyphen.
pub fn is_valid_hostname(hostname: &str) -> bool {
    let name = hostname.strip_suffix('.').unwrap_or(hostname);
    if name.len() > MAX_HOSTNAME_LEN {
        return false;
    }
    name.split('.').all(is_valid_label)
}

fn is_valid_label(label: &str) -> bool {
    if label.is_empty() || label.len() > MAX_LABEL_LEN {
        return false;
    }
    if label.starts_with('-') || label.ends_with('-') {
        return false;
    }
    label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}
