use std::io::Cursor;

use anyhow::Context;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use log::debug;

pub const UPLOAD_JPEG_QUALITY: u8 = 85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Avatar,
    Banner,
}

impl ImageKind {
    /// Longest edge after compression, in pixels.
    pub fn max_dimension(self) -> u32 {
        match self {
            ImageKind::Avatar => 512,
            ImageKind::Banner => 1920,
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            ImageKind::Avatar => "avatar.jpg",
            ImageKind::Banner => "banner.jpg",
        }
    }

    pub fn object_path(self, uid: &str) -> String {
        format!("users/{}/{}", uid, self.file_name())
    }
}

/// Dimensions that fit inside `max` on the longest edge, keeping the aspect ratio.
/// Images already small enough are left as they are.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    if width >= height {
        let scaled = (u64::from(height) * u64::from(max) / u64::from(width)).max(1);
        (max, scaled as u32)
    } else {
        let scaled = (u64::from(width) * u64::from(max) / u64::from(height)).max(1);
        (scaled as u32, max)
    }
}

/// Decode, downscale and re-encode an image as JPEG.
pub fn compress_image(bytes: &[u8], max_dimension: u32, quality: u8) -> anyhow::Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes).context("unsupported or corrupt image")?;
    let (width, height) = fit_within(decoded.width(), decoded.height(), max_dimension);
    let resized = if (width, height) == (decoded.width(), decoded.height()) {
        decoded
    } else {
        decoded.resize_exact(width, height, FilterType::Triangle)
    };
    let rgb = resized.to_rgb8();

    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(&rgb)
        .context("jpeg encoding failed")?;
    let out = out.into_inner();
    debug!("[IMAGES] Compressed {} bytes to {} bytes ({}x{})", bytes.len(), out.len(), width, height);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageOutputFormat, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageOutputFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn fit_keeps_aspect_ratio() {
        assert_eq!(fit_within(1024, 512, 512), (512, 256));
        assert_eq!(fit_within(300, 900, 512), (170, 512));
        assert_eq!(fit_within(100, 80, 512), (100, 80));
    }

    #[test]
    fn avatar_is_downscaled_to_jpeg() {
        let out = compress_image(&png(1024, 768), ImageKind::Avatar.max_dimension(), UPLOAD_JPEG_QUALITY).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.dimensions(), (512, 384));
        assert_eq!(image::guess_format(&out).unwrap(), image::ImageFormat::Jpeg);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(compress_image(b"not an image", 512, 85).is_err());
    }

    #[test]
    fn object_paths() {
        assert_eq!(ImageKind::Avatar.object_path("u1"), "users/u1/avatar.jpg");
        assert_eq!(ImageKind::Banner.object_path("u1"), "users/u1/banner.jpg");
    }
}
