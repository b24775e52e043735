use bytes::Bytes;
use std::fmt;

/// One reassembled message, as raw bytes and as decoded text.
///
/// Containers are produced by a [`FramingProtocol`](crate::FramingProtocol)
/// and own their bytes: they never alias a read buffer that will be reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataContainer {
    bytes: Bytes,
    text: String,
}

impl DataContainer {
    pub(crate) fn new(bytes: Bytes, text: String) -> Self {
        Self { bytes, text }
    }

    /// Raw message bytes, without any framing envelope
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Message decoded with the protocol's text codec
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of payload bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Splits the container into its bytes and text
    pub fn into_parts(self) -> (Bytes, String) {
        (self.bytes, self.text)
    }
}

impl fmt::Display for DataContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes: \"{}\"", self.bytes.len(), self.text)
    }
}
