//! RGBA drawable surface

use std::io::Cursor;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, RgbaImage};
use log::debug;

/// Encoded surface contents
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportedBlob {
    /// Media type actually produced; PNG when the requested one has no encoder
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl ExportedBlob {
    pub fn extension(&self) -> &str {
        ImageFormat::from_mime_type(&self.media_type)
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("png")
    }
}

/// 2D raster target: resize, clear, draw, export
#[derive(Clone, Debug, Default)]
pub struct Surface {
    pixels: RgbaImage,
}

impl Surface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Resizing discards existing content
    pub fn resize(&mut self, width: u32, height: u32) {
        self.pixels = RgbaImage::new(width, height);
    }

    pub fn clear(&mut self) {
        self.pixels.pixels_mut().for_each(|px| px.0 = [0, 0, 0, 0]);
    }

    /// True when every pixel is fully transparent (or the surface is empty)
    pub fn is_blank(&self) -> bool {
        self.pixels.pixels().all(|px| px.0[3] == 0)
    }

    /// Draw `image` at the origin, scaled to `width` x `height`
    pub fn draw_image(&mut self, image: &RgbaImage, width: u32, height: u32) {
        if image.dimensions() == (width, height) {
            self.blit(image);
        } else {
            let scaled = imageops::resize(image, width, height, FilterType::Triangle);
            self.blit(&scaled);
        }
    }

    /// Copy `image` onto the surface at the origin, clipping to the surface bounds
    pub fn blit(&mut self, image: &RgbaImage) {
        imageops::replace(&mut self.pixels, image, 0, 0);
    }

    /// Encode the surface as `media_type`, falling back to PNG
    pub fn export(&self, media_type: &str) -> Result<ExportedBlob, image::ImageError> {
        if let Some(format) = ImageFormat::from_mime_type(media_type) {
            match self.encode(format) {
                Ok(bytes) => {
                    return Ok(ExportedBlob {
                        media_type: media_type.to_string(),
                        bytes,
                    });
                }
                Err(e) => debug!("No usable encoder for {media_type} ({e}), exporting PNG"),
            }
        }

        Ok(ExportedBlob {
            media_type: "image/png".to_string(),
            bytes: self.encode(ImageFormat::Png)?,
        })
    }

    fn encode(&self, format: ImageFormat) -> Result<Vec<u8>, image::ImageError> {
        let image = DynamicImage::ImageRgba8(self.pixels.clone());
        // JPEG has no alpha channel
        let image = if format == ImageFormat::Jpeg {
            DynamicImage::ImageRgb8(image.to_rgb8())
        } else {
            image
        };

        let mut cursor = Cursor::new(Vec::new());
        image.write_to(&mut cursor, format)?;
        Ok(cursor.into_inner())
    }

    pub fn save_png(&self, path: &Path) -> Result<(), image::ImageError> {
        self.pixels.save_with_format(path, ImageFormat::Png)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn checker(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        })
    }

    #[test]
    fn resize_and_clear() {
        let mut surface = Surface::new();
        assert!(surface.is_blank());
        surface.resize(4, 3);
        assert_eq!((surface.width(), surface.height()), (4, 3));
        surface.blit(&checker(4, 3));
        assert!(!surface.is_blank());
        surface.clear();
        assert!(surface.is_blank());
    }

    #[test]
    fn draw_image_scales_to_target() {
        let mut surface = Surface::new();
        surface.resize(8, 6);
        surface.draw_image(&checker(4, 3), 8, 6);
        assert!(surface.pixels().pixels().all(|px| px.0[3] == 255));
    }

    #[test]
    fn blit_clips_to_bounds() {
        let mut surface = Surface::new();
        surface.resize(2, 2);
        surface.blit(&checker(5, 5));
        assert_eq!(surface.pixels().get_pixel(1, 1), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn export_matches_requested_type() {
        let mut surface = Surface::new();
        surface.resize(3, 3);
        surface.blit(&checker(3, 3));

        let jpeg = surface.export("image/jpeg").unwrap();
        assert_eq!(jpeg.media_type, "image/jpeg");
        assert_eq!(image::guess_format(&jpeg.bytes).unwrap(), ImageFormat::Jpeg);
        assert_eq!(jpeg.extension(), "jpg");

        let png = surface.export("image/png").unwrap();
        assert_eq!(image::guess_format(&png.bytes).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn unknown_type_falls_back_to_png() {
        let mut surface = Surface::new();
        surface.resize(1, 1);
        let blob = surface.export("image/x-unknown").unwrap();
        assert_eq!(blob.media_type, "image/png");
        assert_eq!(blob.extension(), "png");
    }
}
