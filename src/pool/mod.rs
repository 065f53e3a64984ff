//! Size-classed byte buffers shared by every session.
//!
//! Frames are read straight into pooled buffers and relayed without copying;
//! the buffer goes back to its class when the last holder drops it.

pub mod buffer_pool;

pub use buffer_pool::{BufferPool, PoolConfig, PooledBuf};
