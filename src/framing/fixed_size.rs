use crate::common::{DataContainer, TextCodec};
use crate::{NetError, Result};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

/// Codec for frames of a constant byte width
///
/// No header is written: the width is agreed on out of band. Writes are
/// passed through unchanged but must be a non-zero multiple of the frame
/// width, so the peer always decodes whole frames.
#[derive(Debug, Clone)]
pub struct FixedSizeCodec {
    frame_size: usize,
    text: TextCodec,
}

impl FixedSizeCodec {
    pub fn new(text: TextCodec, frame_size: usize) -> Result<Self> {
        if frame_size == 0 {
            return Err(NetError::Config("frame size must be greater than zero".into()));
        }
        Ok(Self { frame_size, text })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn text_codec(&self) -> TextCodec {
        self.text
    }

    pub(crate) fn write_frame(&self, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
        if payload.is_empty() || payload.len() % self.frame_size != 0 {
            return Err(NetError::InvalidFrame(format!(
                "payload of {} bytes is not a multiple of the {}-byte frame size",
                payload.len(),
                self.frame_size
            )));
        }
        dst.extend_from_slice(payload);
        Ok(())
    }
}

impl Decoder for FixedSizeCodec {
    type Item = DataContainer;
    type Error = NetError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<DataContainer>> {
        if src.len() < self.frame_size {
            src.reserve(self.frame_size - src.len());
            return Ok(None);
        }
        let payload = src.split_to(self.frame_size).freeze();
        let text = self.text.decode(&payload);
        Ok(Some(DataContainer::new(payload, text)))
    }
}

impl Encoder<&[u8]> for FixedSizeCodec {
    type Error = NetError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<()> {
        self.write_frame(item, dst)
    }
}
