use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{ImageFormat, RgbImage};

use crate::error::ServiceError;

/// Decodes an uploaded byte stream into a 3-channel RGB image.
///
/// Any source layout the `image` crate recognizes (grayscale, RGBA,
/// palette) is normalized to RGB. Unrecognizable or corrupt bytes are a
/// user error, not a server fault.
pub fn decode(bytes: &[u8]) -> Result<RgbImage, ServiceError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| ServiceError::InvalidInput(format!("could not decode image: {}", e)))?;
    Ok(image.to_rgb8())
}

/// Re-encodes an in-memory image as a lossless PNG byte stream.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, ServiceError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| ServiceError::Encoding(format!("png encoding failed: {}", e)))?;
    Ok(buffer.into_inner())
}

/// Renders raw bytes as an inline `data:` URI with standard, unwrapped
/// base64 payload.
pub fn to_data_uri(bytes: &[u8], mime_type: &str) -> String {
    format!("data:{};base64,{}", mime_type, BASE64.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, Luma, Rgb};

    fn sample_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn decode_encode_decode_preserves_dimensions() {
        let original = sample_image(37, 23);
        let png = encode_png(&original).unwrap();
        let decoded = decode(&png).unwrap();
        assert_eq!(decoded.dimensions(), (37, 23));

        let png_again = encode_png(&decoded).unwrap();
        let decoded_again = decode(&png_again).unwrap();
        assert_eq!(decoded_again.dimensions(), (37, 23));
    }

    #[test]
    fn png_round_trip_preserves_pixels() {
        let original = sample_image(16, 16);
        let png = encode_png(&original).unwrap();
        let decoded = decode(&png).unwrap();
        assert_eq!(decoded.as_raw(), original.as_raw());
    }

    #[test]
    fn grayscale_input_normalizes_to_rgb() {
        let gray = GrayImage::from_fn(8, 8, |x, _| Luma([(x * 31) as u8]));
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(gray)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();

        let decoded = decode(buffer.get_ref()).unwrap();
        assert_eq!(decoded.dimensions(), (8, 8));
        let px = decoded.get_pixel(3, 0);
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
    }

    #[test]
    fn jpeg_input_decodes_with_original_dimensions() {
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(sample_image(640, 480))
            .write_to(&mut buffer, ImageFormat::Jpeg)
            .unwrap();

        let decoded = decode(buffer.get_ref()).unwrap();
        assert_eq!(decoded.dimensions(), (640, 480));
    }

    #[test]
    fn garbage_bytes_are_invalid_input() {
        let err = decode(b"not an image").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[test]
    fn empty_bytes_are_invalid_input() {
        assert!(matches!(
            decode(&[]).unwrap_err(),
            ServiceError::InvalidInput(_)
        ));
    }

    #[test]
    fn data_uri_has_mime_prefix_and_base64_payload() {
        let uri = to_data_uri(&[0xde, 0xad, 0xbe, 0xef], "image/png");
        assert_eq!(uri, "data:image/png;base64,3q2+7w==");
        assert!(!uri.contains('\n'));
    }
}
