use crate::NetError;
use crate::common::{DataContainer, TextCodec};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

/// Pass-through codec: no envelope on write, whatever is buffered on read
///
/// Every read becomes exactly one message, so the consumer must tolerate the
/// transport splitting or merging writes.
#[derive(Debug, Clone, Default)]
pub struct StreamingCodec {
    text: TextCodec,
}

impl StreamingCodec {
    pub fn new(text: TextCodec) -> Self {
        Self { text }
    }

    pub fn text_codec(&self) -> TextCodec {
        self.text
    }

    pub(crate) fn write_frame(&self, payload: &[u8], dst: &mut BytesMut) {
        dst.extend_from_slice(payload);
    }
}

impl Decoder for StreamingCodec {
    type Item = DataContainer;
    type Error = NetError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<DataContainer>, NetError> {
        if src.is_empty() {
            return Ok(None);
        }
        let payload = src.split().freeze();
        let text = self.text.decode(&payload);
        Ok(Some(DataContainer::new(payload, text)))
    }
}

impl Encoder<&[u8]> for StreamingCodec {
    type Error = NetError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), NetError> {
        self.write_frame(item, dst);
        Ok(())
    }
}
