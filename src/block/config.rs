//! Configuration bounding block sizes and session lifetime.

use std::time::Duration;

use super::options::BlockSize;

/// Settings shared by every transfer the engine drives.
#[derive(Clone, Copy, Debug)]
pub struct BlockConfig {
    /// Largest payload carried by a single message. Payloads beyond this
    /// are fragmented, and it is the default block size for fresh slices.
    pub max_block_size: BlockSize,
    /// Idle timeout after which a transfer session is swept.
    pub session_timeout: Duration,
}

impl BlockConfig {
    /// Default idle timeout for transfer sessions.
    pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(180);

    /// Construct a configuration.
    #[must_use]
    pub const fn new(max_block_size: BlockSize, session_timeout: Duration) -> Self {
        Self {
            max_block_size,
            session_timeout,
        }
    }
}

impl Default for BlockConfig {
    fn default() -> Self { Self::new(BlockSize::MAX, Self::DEFAULT_SESSION_TIMEOUT) }
}
