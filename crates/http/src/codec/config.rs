use crate::ensure;
use crate::protocol::ConfigError;

pub const DEFAULT_MAX_INITIAL_LINE_LENGTH: usize = 4096;
pub const DEFAULT_MAX_HEADER_SIZE: usize = 8192;
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 8192;
pub const DEFAULT_VALIDATE_HEADERS: bool = true;
pub const DEFAULT_INITIAL_BUFFER_SIZE: usize = 128;

/// Maximum number of headers in one message head.
pub const MAX_HEADER_NUM: usize = 64;

/// Limits applied by the HTTP/1.1 codecs of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    /// Longest request or status line, without its CRLF.
    pub max_initial_line_length: usize,
    /// Largest header section, initial line excluded.
    pub max_header_size: usize,
    /// Payload is handed out in chunks of at most this many bytes.
    pub max_chunk_size: usize,
    /// Whether header values are checked for forbidden bytes.
    pub validate_headers: bool,
    /// Initial capacity of the connection's read buffer.
    pub initial_buffer_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_initial_line_length: DEFAULT_MAX_INITIAL_LINE_LENGTH,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            validate_headers: DEFAULT_VALIDATE_HEADERS,
            initial_buffer_size: DEFAULT_INITIAL_BUFFER_SIZE,
        }
    }
}

impl CodecConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(self.max_initial_line_length > 0, ConfigError::invalid_threshold("max_initial_line_length", "must be positive"));
        ensure!(self.max_header_size > 0, ConfigError::invalid_threshold("max_header_size", "must be positive"));
        ensure!(self.max_chunk_size > 0, ConfigError::invalid_threshold("max_chunk_size", "must be positive"));
        ensure!(self.initial_buffer_size > 0, ConfigError::invalid_threshold("initial_buffer_size", "must be positive"));
        ensure!(
            self.initial_buffer_size <= self.max_header_size,
            ConfigError::invalid_threshold(
                "initial_buffer_size",
                format!("{} exceeds max_header_size {}", self.initial_buffer_size, self.max_header_size)
            )
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        CodecConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_limits() {
        let config = CodecConfig { max_chunk_size: 0, ..CodecConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidThreshold { name: "max_chunk_size", .. })));
    }

    #[test]
    fn rejects_buffer_larger_than_header_limit() {
        let config = CodecConfig { initial_buffer_size: 16 * 1024, ..CodecConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidThreshold { name: "initial_buffer_size", .. })));
    }
}
