//! Reactor and socket tuning knobs.

use crate::error::Error;

/// Configuration for a [`crate::Reactor`] and the sockets it drives.
///
/// A value of `0` means "unset": OS default for the socket buffer sizes,
/// unbounded for the write high-watermark.
#[derive(Clone, Debug)]
pub struct Config {
    /// Size of the scratch buffer used for each OS read.
    pub read_buffer_size: usize,
    /// High-watermark, in bytes, of queued-but-unflushed writes per
    /// connection. Buffers submitted past the watermark are dropped with a
    /// warning. `0` disables the limit.
    pub write_buffer_limit: u64,
    /// `SO_RCVBUF` applied to created sockets, `0` to leave the OS default.
    pub socket_read_buffer: usize,
    /// `SO_SNDBUF` applied to created sockets, `0` to leave the OS default.
    pub socket_write_buffer: usize,
    /// Capacity of the readiness event batch polled per loop turn.
    pub events_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            read_buffer_size: 64 * 1024,
            write_buffer_limit: 8 * 1024 * 1024,
            socket_read_buffer: 0,
            socket_write_buffer: 0,
            events_capacity: 1024,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        if self.read_buffer_size == 0 {
            return Err(Error::Config("read_buffer_size must be non-zero"));
        }
        if self.events_capacity == 0 {
            return Err(Error::Config("events_capacity must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_read_buffer_rejected() {
        let cfg = Config {
            read_buffer_size: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }
}
