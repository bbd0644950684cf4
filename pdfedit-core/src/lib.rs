//! Client-side core for a remote PDF editing service: the wire model, the
//! overlay geometry that places text blocks over rendered pages, and the edit
//! session that keeps both in step with the server's document revisions.

use async_trait::async_trait;
use bytes::Bytes;

pub mod config;
pub mod error;
pub mod model;
pub mod overlay;
pub mod session;
pub mod store;

pub use config::ClientConfig;
pub use error::{ClientError, ClientResult, ErrorKind};
pub use model::{
    AddTextRequest, BBox, EditTextRequest, FontDescription, FontFlags, FontInfo, ImageSize,
    PageBlocks, PageText, PreviewPage, RenderedPage, RevisionId, SplitRequest, TextBlock,
    TextExtraction, WordConversion,
};
pub use overlay::{OverlayRegion, PageOverlay, PixelRect};
pub use session::{
    EditForm, EditOutcome, EditSession, EditState, NewText, Notice, NoticeLevel, SessionEvent,
    Selection, WordDocument,
};
pub use store::{
    workspace_id_for_server, FileStateStore, MemoryStateStore, SessionSnapshot, StateStore,
    WorkspaceId,
};

/// The remote service that owns every document revision.
#[async_trait]
pub trait EditService: Send + Sync {
    async fn upload(&self, file_name: &str, contents: Bytes) -> ClientResult<RevisionId>;
    async fn preview(&self, revision: &RevisionId) -> ClientResult<Vec<PreviewPage>>;
    async fn text_blocks(&self, revision: &RevisionId) -> ClientResult<Vec<PageBlocks>>;
    /// Replaces (or, with empty `new_text`, deletes) a block; returns the new revision.
    async fn edit_text(&self, request: &EditTextRequest) -> ClientResult<RevisionId>;
    async fn add_text(&self, request: &AddTextRequest) -> ClientResult<RevisionId>;
    async fn extract_text(&self, revision: &RevisionId) -> ClientResult<Vec<PageText>>;
    async fn ocr_text(&self, revision: &RevisionId) -> ClientResult<TextExtraction>;
    async fn split(&self, request: &SplitRequest) -> ClientResult<RevisionId>;
    async fn merge(&self, revisions: &[RevisionId]) -> ClientResult<RevisionId>;
    async fn download(&self, revision: &RevisionId) -> ClientResult<Bytes>;
    async fn convert_to_word(&self, revision: &RevisionId) -> ClientResult<WordConversion>;
    async fn download_word(&self, file_name: &str) -> ClientResult<Bytes>;
}

/// Displays preview pages.
#[async_trait]
pub trait PageSurface: Send + Sync {
    /// Shows `pages` for `revision`. The returned future resolves only after
    /// every page image has finished loading, with the display size of each.
    async fn present(
        &self,
        revision: &RevisionId,
        pages: &[PreviewPage],
    ) -> ClientResult<Vec<RenderedPage>>;
}
