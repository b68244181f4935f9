use serde::{Deserialize, Serialize};

/// Default transfer chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 128;

/// File transfer settings.
///
/// Larger chunks mean fewer round trips but a bigger command for the device to
/// buffer and compile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes moved per round trip.
    pub chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chunk_size() {
        assert_eq!(TransferConfig::default().chunk_size, 128);
    }
}
