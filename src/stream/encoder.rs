use anyhow::{Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

/// Multipart boundary used by the stream endpoint.
pub const BOUNDARY: &str = "frame";

/// One frame as it leaves the loop.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub seq: u64,
    pub jpeg: Bytes,
    pub captured_at: DateTime<Utc>,
}

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity((frame.width() * frame.height() / 8) as usize);
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(frame)
        .context("Failed to encode frame as JPEG")?;
    Ok(buf)
}

/// Wraps a frame as one part of a `multipart/x-mixed-replace` body.
pub fn multipart_part(frame: &EncodedFrame) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.jpeg.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + frame.jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(&frame.jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_a_decodable_jpeg() {
        let frame = RgbImage::from_pixel(32, 16, image::Rgb([120, 40, 200]));
        let jpeg = encode_jpeg(&frame, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
    }

    #[test]
    fn part_carries_boundary_and_length() {
        let frame = EncodedFrame {
            seq: 1,
            jpeg: Bytes::from_static(b"abc"),
            captured_at: Utc::now(),
        };
        let part = multipart_part(&frame);
        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\nabc\r\n"
        );
    }
}
