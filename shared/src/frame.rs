//! Fixed-shape frames and their wire encoding.
//!
//! A channel's frame layout is declared once with a compact format string such
//! as `UINT8_YX_512_512` and every payload on that channel must match it.
//! Timestamped channels prefix the pixel bytes with an 8-byte native-endian
//! `f64` capture time.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const TIMESTAMP_BYTES: usize = std::mem::size_of::<f64>();

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("invalid frame format '{0}'")]
    InvalidFormat(String),
    #[error("only 2-D frames are supported, got {0} dimensions")]
    Unsupported(usize),
    #[error("payload is {actual} bytes, format expects {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("frame is {actual:?}, format expects {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelType {
    U8,
    U16,
}

impl PixelType {
    pub fn bytes(self) -> usize {
        match self {
            PixelType::U8 => 1,
            PixelType::U16 => 2,
        }
    }

    fn label(self) -> &'static str {
        match self {
            PixelType::U8 => "UINT8",
            PixelType::U16 => "UINT16",
        }
    }
}

/// Declared layout of every frame on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFormat {
    pub pixel: PixelType,
    /// Axis label, e.g. `YX`. Informational only.
    pub layout: String,
    pub height: usize,
    pub width: usize,
}

impl FrameFormat {
    pub fn new(pixel: PixelType, height: usize, width: usize) -> Self {
        Self {
            pixel,
            layout: "YX".to_string(),
            height,
            width,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn payload_len(&self) -> usize {
        self.height * self.width * self.pixel.bytes()
    }

    /// Center of the frame in `(y, x)` pixel coordinates.
    pub fn center(&self) -> (f64, f64) {
        (self.height as f64 / 2.0, self.width as f64 / 2.0)
    }
}

impl FromStr for FrameFormat {
    type Err = FrameError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = || FrameError::InvalidFormat(spec.to_string());
        let mut parts = spec.split('_');

        let pixel = match parts.next().map(str::to_ascii_uppercase).as_deref() {
            Some("UINT8") => PixelType::U8,
            Some("UINT16") => PixelType::U16,
            _ => return Err(invalid()),
        };
        let layout = parts.next().filter(|l| !l.is_empty()).ok_or_else(invalid)?;
        let dims = parts
            .map(|d| d.parse::<usize>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        match dims.as_slice() {
            [height, width] if *height > 0 && *width > 0 => Ok(Self {
                pixel,
                layout: layout.to_string(),
                height: *height,
                width: *width,
            }),
            [_, _] | [] => Err(invalid()),
            other => Err(FrameError::Unsupported(other.len())),
        }
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.pixel.label(),
            self.layout,
            self.height,
            self.width
        )
    }
}

/// A single image in one of the supported pixel types.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    U8(Array2<u8>),
    U16(Array2<u16>),
}

impl Frame {
    pub fn dim(&self) -> (usize, usize) {
        match self {
            Frame::U8(a) => a.dim(),
            Frame::U16(a) => a.dim(),
        }
    }

    pub fn pixel(&self) -> PixelType {
        match self {
            Frame::U8(_) => PixelType::U8,
            Frame::U16(_) => PixelType::U16,
        }
    }

    /// 8-bit view used by detection and display. 16-bit data keeps its top byte.
    pub fn to_u8(&self) -> Array2<u8> {
        match self {
            Frame::U8(a) => a.clone(),
            Frame::U16(a) => a.mapv(|v| (v >> 8) as u8),
        }
    }

    /// Mirror left to right.
    pub fn flip_horizontal(&self) -> Frame {
        match self {
            Frame::U8(a) => Frame::U8(a.slice(ndarray::s![.., ..;-1]).to_owned()),
            Frame::U16(a) => Frame::U16(a.slice(ndarray::s![.., ..;-1]).to_owned()),
        }
    }

    /// Row-major native-endian pixel bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Frame::U8(a) => a.iter().copied().collect(),
            Frame::U16(a) => a.iter().flat_map(|v| v.to_ne_bytes()).collect(),
        }
    }

    pub fn from_bytes(format: &FrameFormat, bytes: &[u8]) -> Result<Frame, FrameError> {
        let expected = format.payload_len();
        if bytes.len() != expected {
            return Err(FrameError::SizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        let shape = format.shape();
        let frame = match format.pixel {
            PixelType::U8 => Frame::U8(Array2::from_shape_vec(shape, bytes.to_vec()).map_err(
                |_| FrameError::InvalidFormat(format.to_string()),
            )?),
            PixelType::U16 => {
                let pixels = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_ne_bytes([c[0], c[1]]))
                    .collect();
                Frame::U16(
                    Array2::from_shape_vec(shape, pixels)
                        .map_err(|_| FrameError::InvalidFormat(format.to_string()))?,
                )
            }
        };
        Ok(frame)
    }

    /// Check that this frame can travel on a channel declared with `format`.
    pub fn check(&self, format: &FrameFormat) -> Result<(), FrameError> {
        if self.pixel() != format.pixel || self.dim() != format.shape() {
            return Err(FrameError::ShapeMismatch {
                expected: format.shape(),
                actual: self.dim(),
            });
        }
        Ok(())
    }
}

/// Prefix `payload` with a native-endian timestamp.
pub fn encode_timestamped(timestamp: f64, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(TIMESTAMP_BYTES + payload.len());
    buf.extend_from_slice(&timestamp.to_ne_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Split a timestamped message into `(timestamp, payload)`.
pub fn decode_timestamped(msg: &[u8]) -> Result<(f64, &[u8]), FrameError> {
    if msg.len() < TIMESTAMP_BYTES {
        return Err(FrameError::SizeMismatch {
            expected: TIMESTAMP_BYTES,
            actual: msg.len(),
        });
    }
    let (head, payload) = msg.split_at(TIMESTAMP_BYTES);
    let mut raw = [0u8; TIMESTAMP_BYTES];
    raw.copy_from_slice(head);
    Ok((f64::from_ne_bytes(raw), payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_parse_format() {
        let format: FrameFormat = "UINT8_YX_512_512".parse().unwrap();
        assert_eq!(format.pixel, PixelType::U8);
        assert_eq!(format.shape(), (512, 512));
        assert_eq!(format.payload_len(), 512 * 512);
        assert_eq!(format.center(), (256.0, 256.0));
        assert_eq!(format.to_string(), "UINT8_YX_512_512");

        let format: FrameFormat = "UINT16_YX_100_200".parse().unwrap();
        assert_eq!(format.payload_len(), 100 * 200 * 2);
    }

    #[test]
    fn test_parse_format_errors() {
        assert!(matches!(
            "FLOAT_YX_4_4".parse::<FrameFormat>(),
            Err(FrameError::InvalidFormat(_))
        ));
        assert!(matches!(
            "UINT8_YX_4".parse::<FrameFormat>(),
            Err(FrameError::Unsupported(1))
        ));
        assert!(matches!(
            "UINT8_YXC_4_4_3".parse::<FrameFormat>(),
            Err(FrameError::Unsupported(3))
        ));
        assert!(matches!(
            "UINT8_YX_0_4".parse::<FrameFormat>(),
            Err(FrameError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        let format = FrameFormat::new(PixelType::U8, 2, 2);
        assert_eq!(
            Frame::from_bytes(&format, &[1, 2, 3]),
            Err(FrameError::SizeMismatch {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_u16_bytes_and_downscale() {
        let frame = Frame::U16(array![[0x0100, 0xff00], [0x1234, 0x0000]]);
        let format = FrameFormat::new(PixelType::U16, 2, 2);
        let decoded = Frame::from_bytes(&format, &frame.to_bytes()).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.to_u8(), array![[1, 255], [0x12, 0]]);
    }

    #[test]
    fn test_timestamp_prefix() {
        let msg = encode_timestamped(12.5, &[7, 8, 9]);
        assert_eq!(msg.len(), TIMESTAMP_BYTES + 3);
        let (ts, payload) = decode_timestamped(&msg).unwrap();
        assert_eq!(ts, 12.5);
        assert_eq!(payload, &[7, 8, 9]);

        assert!(decode_timestamped(&[1, 2]).is_err());
    }

    #[test]
    fn test_flip_horizontal() {
        let frame = Frame::U8(array![[1, 2, 3], [4, 5, 6]]);
        assert_eq!(frame.flip_horizontal(), Frame::U8(array![[3, 2, 1], [6, 5, 4]]));
    }

    #[test]
    fn test_check_shape() {
        let format = FrameFormat::new(PixelType::U8, 2, 3);
        assert!(Frame::U8(Array2::zeros((2, 3))).check(&format).is_ok());
        assert!(Frame::U8(Array2::zeros((3, 2))).check(&format).is_err());
        assert!(Frame::U16(Array2::zeros((2, 3))).check(&format).is_err());
    }
}
