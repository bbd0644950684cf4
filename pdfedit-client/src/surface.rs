use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat};
use pdfedit_core::{
    ClientError, ClientResult, ImageSize, PageSurface, PreviewPage, RenderedPage, RevisionId,
};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
enum DecodeError {
    #[error("page has no image")]
    Missing,
    #[error("unsupported image reference; expected a base64 data URL")]
    NotDataUrl,
    #[error("invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("failed to decode page image: {0}")]
    Image(#[from] image::ImageError),
}

/// Decodes preview images off the async runtime. `present` returns once every
/// page has either decoded or failed, which is when page sizes are known.
pub struct DecodedSurface {
    display_scale: f64,
    output_dir: Option<PathBuf>,
}

impl DecodedSurface {
    pub fn new(display_scale: f64) -> Self {
        Self {
            display_scale,
            output_dir: None,
        }
    }

    /// Also write each decoded page as a PNG under `dir`.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl PageSurface for DecodedSurface {
    #[instrument(skip(self, pages), fields(pages = pages.len()))]
    async fn present(
        &self,
        revision: &RevisionId,
        pages: &[PreviewPage],
    ) -> ClientResult<Vec<RenderedPage>> {
        let revision = revision.clone();
        let pages = pages.to_vec();
        let scale = self.display_scale;
        let output_dir = self.output_dir.clone();

        tokio::task::spawn_blocking(move || -> ClientResult<Vec<RenderedPage>> {
            if let Some(dir) = &output_dir {
                fs::create_dir_all(dir)?;
            }
            Ok(pages
                .par_iter()
                .map(|page| render_page(&revision, page, scale, output_dir.as_deref()))
                .collect())
        })
        .await
        .map_err(|err| ClientError::Transport(format!("page decoding task failed: {err}")))?
    }
}

/// Where the PNG for `page_num` of `revision` lands under `dir`.
pub fn page_image_path(dir: &Path, revision: &RevisionId, page_num: u32) -> PathBuf {
    let stem = Path::new(revision.as_str())
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| revision.to_string());
    dir.join(format!("{stem}-page-{page_num}.png"))
}

fn render_page(
    revision: &RevisionId,
    page: &PreviewPage,
    scale: f64,
    output_dir: Option<&Path>,
) -> RenderedPage {
    let mut rendered = RenderedPage {
        page_num: page.page_num,
        size: None,
        is_image_based: page.is_image_based,
        error: page.error.clone(),
    };
    if rendered.error.is_some() {
        return rendered;
    }

    let image = match decode_page(page) {
        Ok(image) => image,
        Err(err) => {
            warn!(page = page.page_num, %err, "page image failed to load");
            rendered.error = Some(err.to_string());
            return rendered;
        }
    };
    rendered.size = Some(ImageSize::new(
        f64::from(image.width()) * scale,
        f64::from(image.height()) * scale,
    ));

    if let Some(dir) = output_dir {
        let path = page_image_path(dir, revision, page.page_num);
        match image.save_with_format(&path, ImageFormat::Png) {
            Ok(()) => debug!(path = %path.display(), "page image written"),
            Err(err) => warn!(?err, path = %path.display(), "failed to write page image"),
        }
    }
    rendered
}

fn decode_page(page: &PreviewPage) -> Result<DynamicImage, DecodeError> {
    let reference = page.image.as_deref().ok_or(DecodeError::Missing)?;
    let bytes = decode_data_url(reference)?;
    Ok(image::load_from_memory(&bytes)?)
}

fn decode_data_url(reference: &str) -> Result<Vec<u8>, DecodeError> {
    let rest = reference
        .strip_prefix("data:")
        .ok_or(DecodeError::NotDataUrl)?;
    let (meta, payload) = rest.split_once(',').ok_or(DecodeError::NotDataUrl)?;
    if !meta.ends_with(";base64") {
        return Err(DecodeError::NotDataUrl);
    }
    Ok(STANDARD.decode(payload.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    fn png_data_url(width: u32, height: u32) -> String {
        let image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png).unwrap();
        format!("data:image/png;base64,{}", STANDARD.encode(buf.into_inner()))
    }

    fn preview(page_num: u32, image: Option<String>, error: Option<&str>) -> PreviewPage {
        PreviewPage {
            page_num,
            image,
            error: error.map(str::to_owned),
            is_image_based: false,
            width: None,
            height: None,
        }
    }

    #[tokio::test]
    async fn sizes_come_from_decoded_pixels_times_scale() {
        let surface = DecodedSurface::new(2.0);
        let pages = vec![preview(1, Some(png_data_url(30, 40)), None)];

        let rendered = surface
            .present(&RevisionId::new("doc.pdf"), &pages)
            .await
            .unwrap();

        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].size, Some(ImageSize::new(60.0, 80.0)));
        assert!(rendered[0].error.is_none());
    }

    #[tokio::test]
    async fn failed_pages_have_no_size_but_keep_their_slot() {
        let surface = DecodedSurface::new(1.0);
        let pages = vec![
            preview(1, None, Some("Error rendering page 1: broken stream")),
            preview(2, Some("data:image/png;base64,!!!".into()), None),
            preview(3, Some("https://cdn.example.test/p3.png".into()), None),
            preview(4, Some(png_data_url(8, 8)), None),
        ];

        let rendered = surface
            .present(&RevisionId::new("doc.pdf"), &pages)
            .await
            .unwrap();

        let page_nums: Vec<u32> = rendered.iter().map(|page| page.page_num).collect();
        assert_eq!(page_nums, vec![1, 2, 3, 4]);
        assert_eq!(
            rendered[0].error.as_deref(),
            Some("Error rendering page 1: broken stream")
        );
        assert!(rendered[..3].iter().all(|page| page.size.is_none()));
        assert!(rendered[1].error.as_deref().unwrap().contains("base64"));
        assert!(rendered[2].error.as_deref().unwrap().contains("data URL"));
        assert_eq!(rendered[3].size, Some(ImageSize::new(8.0, 8.0)));
    }

    #[tokio::test]
    async fn writes_pngs_to_output_dir() {
        let dir = tempdir().unwrap();
        let surface = DecodedSurface::new(1.0).with_output_dir(dir.path().join("previews"));
        let revision = RevisionId::new("modified_doc.pdf");
        let pages = vec![preview(1, Some(png_data_url(5, 7)), None)];

        surface.present(&revision, &pages).await.unwrap();

        let path = page_image_path(&dir.path().join("previews"), &revision, 1);
        assert!(path.ends_with("modified_doc-page-1.png"));
        let written = image::open(&path).unwrap();
        assert_eq!((written.width(), written.height()), (5, 7));
    }
}
