//! Engine configuration
//!
//! Configuration is grouped by concern: channel pool sizing, pipelining
//! behavior, network-layer selection, and buffer limits. Every group has
//! conservative defaults matching the engine's historical behavior and a
//! `validate()` entry point used by the connection constructor.

use std::time::Duration;

use crate::dns::AddressFamily;

/// Channel pool and retry configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Number of parallel channels per connection.
    pub channel_count: usize,
    /// Reconnect budget per channel before a transport fault is surfaced.
    pub reconnect_attempts: u32,
    /// Deadline for a single transport connect attempt.
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            channel_count: 6,
            reconnect_attempts: 2,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionConfig {
    /// Single-channel configuration used when an ALPN-selected alternate
    /// protocol multiplexes on one transport.
    #[must_use]
    pub fn single_channel() -> Self {
        Self {
            channel_count: 1,
            ..Self::default()
        }
    }
}

/// Pipelining thresholds.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Requests written ahead of the current in-flight response.
    pub max_depth: usize,
    /// Minimum free slots before the pipeline is topped up again.
    pub refill_threshold: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            refill_threshold: 2,
        }
    }
}

/// Dual-stack racing and socket options.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Family attempted first when a host resolves to both.
    pub preferred_family: AddressFamily,
    /// Head start the preferred family gets before the other is raced.
    pub delayed_connect: Duration,
    /// TCP_NODELAY on new sockets.
    pub nodelay: bool,
    /// SO_KEEPALIVE interval, if any.
    pub keepalive: Option<Duration>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            preferred_family: AddressFamily::V6,
            delayed_connect: Duration::from_millis(300),
            nodelay: true,
            keepalive: Some(Duration::from_secs(60)),
        }
    }
}

/// Buffer sizing for the upload and download paths.
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Bytes pulled from a body source per write continuation.
    pub write_chunk_size: usize,
    /// Outstanding unwritten socket bytes before uploads yield.
    pub write_buffer_cap: usize,
    /// Bytes consumed from the transport per read pass.
    pub read_chunk_size: usize,
    /// Cap on buffered decoded body bytes per reply; `None` is unbounded.
    pub max_read_buffer: Option<usize>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            write_chunk_size: 16 * 1024,
            write_buffer_cap: 32 * 1024,
            read_chunk_size: 16 * 1024,
            max_read_buffer: None,
        }
    }
}

/// Aggregate engine configuration handed to `Connection::new`.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub connection: ConnectionConfig,
    pub pipeline: PipelineConfig,
    pub network: NetworkConfig,
    pub limits: LimitsConfig,
}

impl EngineConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.connection.channel_count == 0 {
            return Err("channel_count must be at least 1".to_string());
        }
        if self.pipeline.max_depth == 0 {
            return Err("pipeline max_depth must be at least 1".to_string());
        }
        if self.pipeline.refill_threshold > self.pipeline.max_depth {
            return Err("pipeline refill_threshold cannot exceed max_depth".to_string());
        }
        if self.limits.write_chunk_size == 0 || self.limits.read_chunk_size == 0 {
            return Err("buffer chunk sizes must be non-zero".to_string());
        }
        Ok(())
    }
}
