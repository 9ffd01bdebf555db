//! Engine prelude
//!
//! The types nearly every caller touches: the connection, request and
//! reply handles, body sources, and the error taxonomy.

pub use crate::body::{ByteSource, BytesSource};
pub use crate::config::{
    ConnectionConfig, EngineConfig, LimitsConfig, NetworkConfig, PipelineConfig,
};
pub use crate::connection::Connection;
pub use crate::error::{Error, Kind, ParseCause, Result, TransportCause};
pub use crate::http::reply::{CredentialSlot, Credentials};
pub use crate::http::{ParseState, Priority, Reply, Request};
pub use crate::proxy::ProxySettings;
pub use crate::stats::{ConnectionStats, StatsSnapshot};

// HTTP standard types from the http crate
pub use ::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};

// URL handling
pub use url::Url;
