//! Camera frame payloads

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageOutputFormat};

use super::PayloadError;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Encoded length of the intrinsics prefix.
pub const INTRINSICS_LEN: usize = 16;

/// Value written for each field when no intrinsics are known.
const UNKNOWN_INTRINSIC: f32 = -1.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Pinhole camera intrinsics, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

/// Encoded camera frame as carried on the camera channel.
#[derive(Debug, Clone, PartialEq)]
pub struct CamFrame {
    pub intrinsics: Option<Intrinsics>,

    /// JPEG compressed image
    pub jpeg: Vec<u8>,
}

/// Decoded camera image.
#[derive(Debug, Clone)]
pub struct CamImage {
    /// The timestamp of the image
    pub timestamp: DateTime<Utc>,

    /// The image itself
    pub image: DynamicImage,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Intrinsics {
    /// Append the intrinsics prefix to `buf`, writing -1 for every field when `intrinsics` is
    /// `None`.
    pub fn write_prefix(intrinsics: Option<&Self>, buf: &mut Vec<u8>) {
        let fields = match intrinsics {
            Some(i) => [i.fx, i.fy, i.cx, i.cy],
            None => [UNKNOWN_INTRINSIC; 4],
        };

        let mut bytes = [0u8; INTRINSICS_LEN];
        LittleEndian::write_f32_into(&fields, &mut bytes);
        buf.extend_from_slice(&bytes);
    }

    /// Read the intrinsics prefix, returning it along with the rest of the payload.
    pub fn read_prefix(payload: &[u8]) -> Result<(Option<Self>, &[u8]), PayloadError> {
        if payload.len() < INTRINSICS_LEN {
            return Err(PayloadError::TooShort {
                min: INTRINSICS_LEN,
                found: payload.len(),
            });
        }

        let mut fields = [0f32; 4];
        LittleEndian::read_f32_into(&payload[..INTRINSICS_LEN], &mut fields);

        let intrinsics = if fields.iter().all(|f| *f == UNKNOWN_INTRINSIC) {
            None
        } else {
            Some(Self {
                fx: fields[0],
                fy: fields[1],
                cx: fields[2],
                cy: fields[3],
            })
        };

        Ok((intrinsics, &payload[INTRINSICS_LEN..]))
    }
}

impl CamFrame {
    pub fn to_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(INTRINSICS_LEN + self.jpeg.len());
        Intrinsics::write_prefix(self.intrinsics.as_ref(), &mut buf);
        buf.extend_from_slice(&self.jpeg);
        buf
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        let (intrinsics, jpeg) = Intrinsics::read_prefix(payload)?;

        Ok(Self {
            intrinsics,
            jpeg: jpeg.to_vec(),
        })
    }

    /// Decode the JPEG into an image stamped with the current time.
    pub fn decode(&self) -> Result<CamImage, PayloadError> {
        let image = image::load_from_memory_with_format(&self.jpeg, image::ImageFormat::Jpeg)?;

        Ok(CamImage {
            timestamp: Utc::now(),
            image,
        })
    }
}

impl CamImage {
    /// Compress the image to a JPEG of the given quality (1-100).
    pub fn to_cam_frame(
        &self,
        quality: u8,
        intrinsics: Option<Intrinsics>,
    ) -> Result<CamFrame, PayloadError> {
        let mut jpeg = Vec::new();
        self.image
            .write_to(&mut jpeg, ImageOutputFormat::Jpeg(quality))?;

        Ok(CamFrame { intrinsics, jpeg })
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    #[test]
    fn test_intrinsics_prefix() {
        let intrinsics = Intrinsics {
            fx: 500.0,
            fy: 501.5,
            cx: 320.0,
            cy: 240.0,
        };

        let frame = CamFrame {
            intrinsics: Some(intrinsics),
            jpeg: vec![0xff, 0xd8],
        };
        let payload = frame.to_payload();

        assert_eq!(payload.len(), 18);
        assert_eq!(&payload[0..4], &500f32.to_le_bytes());
        assert_eq!(CamFrame::from_payload(&payload).unwrap(), frame);

        let missing = CamFrame {
            intrinsics: None,
            jpeg: vec![1, 2, 3],
        };
        let payload = missing.to_payload();
        assert_eq!(&payload[12..16], &(-1f32).to_le_bytes());
        assert_eq!(CamFrame::from_payload(&payload).unwrap().intrinsics, None);

        assert!(matches!(
            CamFrame::from_payload(&[0u8; 10]),
            Err(PayloadError::TooShort { min: 16, found: 10 })
        ));
    }

    #[test]
    fn test_jpeg_encode() {
        let img = RgbImage::from_pixel(32, 24, Rgb([200, 200, 50]));
        let cam_image = CamImage {
            timestamp: Utc::now(),
            image: DynamicImage::ImageRgb8(img),
        };

        let frame = cam_image.to_cam_frame(80, None).unwrap();
        assert_eq!(&frame.jpeg[0..2], &[0xff, 0xd8]);

        let decoded = frame.decode().unwrap();
        assert_eq!(decoded.image.width(), 32);
        assert_eq!(decoded.image.height(), 24);
    }
}
