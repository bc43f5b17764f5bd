//! Single-image loading

use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;
use log::{debug, warn};

use super::classify::extract_title;
use super::error::LoadError;
use super::fetch::{FetchRequest, Fetcher};
use super::types::LoadedDocument;

/// Image-decode capability: reference in, RGBA pixels at natural size out
#[async_trait]
pub trait ImageDecoder: Send + Sync {
    async fn decode(&self, reference: &str) -> Result<RgbaImage, LoadError>;
}

/// Fetches without credentials and decodes with the `image` crate
pub struct FetchImageDecoder {
    fetcher: Arc<dyn Fetcher>,
}

impl FetchImageDecoder {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ImageDecoder for FetchImageDecoder {
    async fn decode(&self, reference: &str) -> Result<RgbaImage, LoadError> {
        let request = FetchRequest::get(reference)
            .header("Accept", "image/*")
            .without_credentials();
        let response = self
            .fetcher
            .fetch(request)
            .await
            .and_then(|response| response.error_for_status(reference))
            .map_err(|e| {
                warn!("Image fetch failed: {e}");
                LoadError::ImageLoad
            })?;

        tokio::task::spawn_blocking(move || image::load_from_memory(&response.body))
            .await
            .map_err(|e| {
                warn!("Image decode task for {reference} failed: {e}");
                LoadError::ImageLoad
            })?
            .map(|decoded| decoded.to_rgba8())
            .map_err(|e| {
                warn!("Image decode failed for {reference}: {e}");
                LoadError::ImageLoad
            })
    }
}

pub struct ImageLoader {
    decoder: Arc<dyn ImageDecoder>,
}

impl ImageLoader {
    pub fn new(decoder: Arc<dyn ImageDecoder>) -> Self {
        Self { decoder }
    }

    /// Resolve `reference` into an image document and its display title
    pub async fn load(&self, reference: &str) -> Result<(LoadedDocument, Option<String>), LoadError> {
        let resource = self.decoder.decode(reference).await?;
        debug!(
            "Decoded {reference} at {}x{}",
            resource.width(),
            resource.height()
        );
        Ok((LoadedDocument::image(resource), extract_title(reference)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::fetch::ReqwestFetcher;
    use base64::Engine as _;
    use image::{ImageFormat, Rgba};
    use std::io::Cursor;

    fn png_data_url(width: u32, height: u32) -> String {
        let image = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut cursor = Cursor::new(Vec::new());
        image.write_to(&mut cursor, ImageFormat::Png).unwrap();
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(cursor.into_inner())
        )
    }

    fn loader() -> ImageLoader {
        let fetcher = Arc::new(ReqwestFetcher::new().unwrap());
        ImageLoader::new(Arc::new(FetchImageDecoder::new(fetcher)))
    }

    #[tokio::test]
    async fn decodes_natural_dimensions() {
        let (document, title) = loader().load(&png_data_url(5, 4)).await.unwrap();
        assert!(matches!(
            document,
            LoadedDocument::Image {
                width: 5,
                height: 4,
                ..
            }
        ));
        assert_eq!(document.page_count(), 1);
        assert_eq!(title, None);
    }

    #[tokio::test]
    async fn undecodable_payload_is_image_load_error() {
        let err = loader()
            .load("data:image/png;base64,bm90IGFuIGltYWdl")
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::ImageLoad));
        assert_eq!(
            err.to_string(),
            "Failed to load image: Could not load image from URL"
        );
    }

    #[tokio::test]
    async fn every_failure_collapses_to_image_load() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.png");
        for reference in [
            missing.to_string_lossy().into_owned(),
            "data:image/png;base64,@@@".to_string(),
            "data:image/png;base64,bm90IGFuIGltYWdl".to_string(),
        ] {
            let err = loader().load(&reference).await.unwrap_err();
            assert!(matches!(err, LoadError::ImageLoad), "{reference}: {err:?}");
            assert_eq!(err.user_message(), format!("Error: Failed to load document: {err}"));
        }
    }
}
