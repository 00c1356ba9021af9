use std::time::Duration;

/// Protocol version reported by the health endpoint.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Smallest chunk the sender will plan (64 KiB).
pub const MIN_CHUNK_SIZE: u64 = 64 * 1024;

/// Largest chunk the sender will plan (4 MiB).
pub const MAX_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Chunk size used for the first transfer of a process (256 KiB).
pub const INITIAL_CHUNK_SIZE: u64 = 256 * 1024;

/// Maximum accepted request body on the coordinator (100 MiB).
pub const MAX_BODY_SIZE: usize = 100 * 1024 * 1024;

/// Timeout for a single request to the coordinator.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub const ROUTE_INIT: &str = "/upload/init";
pub const ROUTE_CHUNK: &str = "/upload/chunk";
pub const ROUTE_MISSING: &str = "/upload/missing";
pub const ROUTE_CANCEL: &str = "/upload/cancel";
pub const ROUTE_ASSEMBLE: &str = "/assemble";
pub const ROUTE_FILES: &str = "/files";
pub const ROUTE_DOWNLOAD: &str = "/download";
pub const ROUTE_HEALTH: &str = "/health";
