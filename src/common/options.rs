//! Codec configuration.

/// Maximum payload of a single BIFF8 physical record.
pub const MAX_RECORD_PAYLOAD: usize = 8224;

/// Options shared by the drawing tree codec and the continuation framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecOptions {
    /// Largest payload a physical record may carry before a CONTINUE
    /// record is required.
    pub max_record_payload: usize,
    /// Reject containers with unknown type codes instead of preserving them
    /// as opaque records.
    pub strict_containers: bool,
    /// Re-walk encoded drawing bytes and check every container length.
    pub verify_on_encode: bool,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            max_record_payload: MAX_RECORD_PAYLOAD,
            strict_containers: false,
            verify_on_encode: cfg!(debug_assertions),
        }
    }
}

impl CodecOptions {
    pub fn strict() -> Self {
        Self {
            strict_containers: true,
            ..Self::default()
        }
    }

    pub fn with_max_record_payload(mut self, max: usize) -> Self {
        self.max_record_payload = max;
        self
    }

    pub fn with_strict_containers(mut self, strict: bool) -> Self {
        self.strict_containers = strict;
        self
    }

    pub fn with_verify_on_encode(mut self, verify: bool) -> Self {
        self.verify_on_encode = verify;
        self
    }
}
