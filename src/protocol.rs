//! Shared protocol constants for the depot framed transport

/// Default TCP port the daemon listens on.
pub const DEFAULT_PORT: u16 = 42069;

// Command verbs. One verb per connection; matched case-insensitively.
pub mod verb {
    pub const STORE: &str = "STORE";
    pub const FETCH: &str = "FETCH";
    pub const LIST: &str = "LIST";
    pub const PURGE: &str = "PURGE";
}

// Response strings (keep byte-stable: clients match on these verbatim)
pub const RESP_OK: &str = "OK";
pub const RESP_ALREADY_EXISTS: &str = "ERROR: File already exists on the server.";
pub const RESP_NOT_FOUND: &str = "ERROR: File not found";
pub const RESP_INVALID_NAME: &str = "ERROR: Invalid file name";
pub const RESP_UNKNOWN_COMMAND: &str = "ERROR: Unknown command";

/// Longest accepted file name in bytes (typical filesystem component limit).
pub const MAX_NAME_LEN: usize = 255;

/// Chunk size for streaming file payloads.
pub const COPY_CHUNK: usize = 64 * 1024;

// Centralized timeout constants for consistent behavior across server/client paths
pub mod timeouts {
    // Default per-frame I/O deadline (ms)
    pub const DEFAULT_IO_MS: u64 = 30_000;

    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 5_000;

    // Additional deadline per MB of bulk payload (ms); assumes the link
    // sustains at least ~10 MB/s
    pub const PER_MB_MS: u64 = 100;

    // Calculate the deadline for a bulk transfer (ms)
    // base frame deadline + per-MB allowance (ceil)
    pub fn transfer_deadline_ms(base_ms: u64, payload_len: u64) -> u64 {
        let mb = (payload_len + 1_048_575) / 1_048_576;
        base_ms + mb * PER_MB_MS
    }
}
