//! Stream endpoint resolution
//!
//! Discovery against the device happens once; the resulting [`ResolvedEndpoint`]
//! is cached by the engine and reused on every reconnect.

use std::fmt;

use tracing::{debug, instrument};
use url::Url;

use crate::error::ResolveError;

/// Default capture size requested from the stream source
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;

/// Everything needed to reach a camera. Immutable once the engine is built.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub width: u32,
    pub height: u32,
}

impl ConnectionParameters {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Playable stream address, credentials included.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    uri: Url,
}

impl ResolvedEndpoint {
    pub fn new(uri: Url) -> Self {
        Self { uri }
    }

    pub fn parse(uri: &str) -> Result<Self, ResolveError> {
        let uri = Url::parse(uri).map_err(|e| ResolveError::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { uri })
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn as_str(&self) -> &str {
        self.uri.as_str()
    }

    /// The address with its password masked, for logs.
    pub fn redacted(&self) -> String {
        let mut masked = self.uri.clone();
        if masked.password().is_some() {
            let _ = masked.set_password(Some("***"));
        }
        masked.to_string()
    }
}

impl fmt::Debug for ResolvedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResolvedEndpoint").field(&self.redacted()).finish()
    }
}

impl fmt::Display for ResolvedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Turns connection parameters into a stream address.
///
/// Implementations may talk to the device (ONVIF media service and the like);
/// the engine calls `resolve` once and caches the result.
pub trait EndpointResolver: Send + Sync {
    fn resolve(&self, params: &ConnectionParameters) -> Result<ResolvedEndpoint, ResolveError>;
}

/// Resolver for cameras with a known RTSP path (no discovery round-trip).
#[derive(Debug, Clone)]
pub struct RtspPathResolver {
    rtsp_port: u16,
    path: String,
}

impl RtspPathResolver {
    pub fn new(rtsp_port: u16, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self { rtsp_port, path }
    }
}

impl Default for RtspPathResolver {
    fn default() -> Self {
        Self::new(554, "/")
    }
}

impl EndpointResolver for RtspPathResolver {
    #[instrument(skip(self, params), fields(host = %params.host))]
    fn resolve(&self, params: &ConnectionParameters) -> Result<ResolvedEndpoint, ResolveError> {
        if params.host.trim().is_empty() {
            return Err(ResolveError::EmptyHost);
        }

        let raw = format!("rtsp://{}:{}{}", params.host, self.rtsp_port, self.path);
        let endpoint = embed_credentials(&raw, &params.username, &params.password)?;
        debug!(uri = %endpoint, "Resolved stream endpoint");
        Ok(endpoint)
    }
}

/// Insert `user:password@` into an RTSP address.
///
/// Credentials are percent-encoded. An address that already carries a user
/// is returned unchanged, as is any address when `username` is empty.
pub fn embed_credentials(
    uri: &str,
    username: &str,
    password: &str,
) -> Result<ResolvedEndpoint, ResolveError> {
    let mut parsed = ResolvedEndpoint::parse(uri)?.uri;

    if !matches!(parsed.scheme(), "rtsp" | "rtsps") {
        return Err(ResolveError::UnsupportedScheme(parsed.scheme().to_string()));
    }

    if username.is_empty() || !parsed.username().is_empty() {
        return Ok(ResolvedEndpoint::new(parsed));
    }

    let invalid = |reason: &str| ResolveError::InvalidUri {
        uri: uri.to_string(),
        reason: reason.to_string(),
    };
    parsed
        .set_username(username)
        .map_err(|_| invalid("address cannot carry credentials"))?;
    if !password.is_empty() {
        parsed
            .set_password(Some(password))
            .map_err(|_| invalid("address cannot carry credentials"))?;
    }

    Ok(ResolvedEndpoint::new(parsed))
}
