//! ABOUTME: JPEG downsampling for outbound clip frames (4.8)
//! ABOUTME: Lanczos3 resize to a longest-side cap, re-encoded at a configurable JPEG quality

use ev_protocol::ErrorCode;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

/// Resize `jpeg` so its longest side is at most `max_dim`, re-encoding at `quality` (1-100).
/// Images already within `max_dim` are re-encoded but not enlarged.
pub fn downsample_jpeg(jpeg: &[u8], max_dim: u32, quality: u8) -> Result<Vec<u8>, ErrorCode> {
    let img = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
        .map_err(|_| ErrorCode::InsightDownsampleDecodeFailed)?;

    let (width, height) = (img.width(), img.height());
    let longest = width.max(height);

    let resized = if longest > max_dim {
        let (target_w, target_h) = if width >= height {
            (max_dim, (height * max_dim) / width.max(1))
        } else {
            ((width * max_dim) / height.max(1), max_dim)
        };
        img.resize(target_w.max(1), target_h.max(1), FilterType::Lanczos3)
    } else {
        img
    };

    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    resized
        .write_with_encoder(encoder)
        .map_err(|_| ErrorCode::InsightDownsampleEncodeFailed)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([120, 130, 140]));
        let mut buffer = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Jpeg)
            .unwrap();
        buffer
    }

    #[test]
    fn downsamples_image_larger_than_max_dim() {
        let jpeg = sample_jpeg(400, 200);
        let out = downsample_jpeg(&jpeg, 100, 80).unwrap();
        let decoded = image::load_from_memory_with_format(&out, image::ImageFormat::Jpeg).unwrap();
        assert_eq!(decoded.width(), 100);
        assert_eq!(decoded.height(), 50);
    }

    #[test]
    fn leaves_small_image_dimensions_unchanged() {
        let jpeg = sample_jpeg(20, 10);
        let out = downsample_jpeg(&jpeg, 100, 80).unwrap();
        let decoded = image::load_from_memory_with_format(&out, image::ImageFormat::Jpeg).unwrap();
        assert_eq!(decoded.width(), 20);
        assert_eq!(decoded.height(), 10);
    }

    #[test]
    fn rejects_malformed_jpeg() {
        let err = downsample_jpeg(b"not a jpeg", 100, 80).unwrap_err();
        assert_eq!(err, ErrorCode::InsightDownsampleDecodeFailed);
    }
}
