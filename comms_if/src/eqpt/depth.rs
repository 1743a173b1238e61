//! Depth map payloads

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::{ByteOrder, LittleEndian};

use super::{cam::INTRINSICS_LEN, Intrinsics, PayloadError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A depth map, as a flat row-major array of distances in metres.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DepthFrame {
    pub intrinsics: Option<Intrinsics>,
    pub depth: Vec<f32>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DepthFrame {
    pub fn to_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(INTRINSICS_LEN + 4 * self.depth.len());
        Intrinsics::write_prefix(self.intrinsics.as_ref(), &mut buf);

        let start = buf.len();
        buf.resize(start + 4 * self.depth.len(), 0);
        LittleEndian::write_f32_into(&self.depth, &mut buf[start..]);

        buf
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        let (intrinsics, body) = Intrinsics::read_prefix(payload)?;

        if body.len() % 4 != 0 {
            return Err(PayloadError::PartialSample(body.len()));
        }

        let mut depth = vec![0f32; body.len() / 4];
        LittleEndian::read_f32_into(body, &mut depth);

        Ok(Self { intrinsics, depth })
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
