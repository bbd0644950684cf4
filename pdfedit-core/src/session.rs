use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{ClientError, ClientResult, ErrorKind};
use crate::model::{
    AddTextRequest, EditTextRequest, FontDescription, FontInfo, PageBlocks, RenderedPage,
    RevisionId, SplitRequest, TextBlock, TextExtraction, WordConversion,
};
use crate::overlay::{layout_overlays, PageOverlay};
use crate::store::SessionSnapshot;
use crate::{EditService, PageSurface};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    Viewing,
    AwaitingBlocks,
    Editing,
    Submitting,
}

impl EditState {
    pub fn is_edit_mode(self) -> bool {
        !matches!(self, EditState::Viewing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Transient user-visible message; front-ends dismiss it after `ttl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub ttl: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub page_num: u32,
    pub block_index: usize,
    pub block: TextBlock,
    /// Taken at selection time so later edits to the block text don't lose it.
    pub original_font: FontInfo,
}

impl Selection {
    fn new(page_num: u32, block_index: usize, block: TextBlock) -> Self {
        let original_font = block.font_info();
        Self {
            page_num,
            block_index,
            block,
            original_font,
        }
    }
}

/// Contents of the edit form opened for a selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditForm {
    pub page_num: u32,
    pub original_text: String,
    pub font: FontDescription,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// New text matched the original; nothing was sent.
    Unchanged,
    Revised(RevisionId),
}

/// Text to place at explicit coordinates on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct NewText {
    pub page_num: u32,
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub font_size: f64,
    pub color: Option<[f64; 3]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WordDocument {
    pub conversion: WordConversion,
    pub contents: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RevisionChanged(RevisionId),
    PreviewLoaded { revision: RevisionId, pages: usize },
    StateChanged(EditState),
    OverlaysAttached { revision: RevisionId, regions: usize },
    OverlaysCleared,
    SelectionChanged(Option<(u32, usize)>),
    EditFormOpened(EditForm),
    EditFormClosed,
    /// A page's content changed in the revision that was just loaded.
    PageUpdated(u32),
    Notice(Notice),
}

pub const DEFAULT_NOTICE_TTL: Duration = Duration::from_millis(3000);

/// Owns the current revision, the edit-mode state machine, overlays and
/// selection. Every operation takes `&mut self`, so two mutating actions can
/// never be in flight on one session at the same time.
pub struct EditSession {
    service: Arc<dyn EditService>,
    surface: Arc<dyn PageSurface>,
    revision: Option<RevisionId>,
    history: Vec<RevisionId>,
    pages: Vec<RenderedPage>,
    state: EditState,
    blocks: Vec<PageBlocks>,
    overlays: Vec<PageOverlay>,
    selection: Option<Selection>,
    form: Option<EditForm>,
    notice_ttl: Duration,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl EditSession {
    pub fn new(service: Arc<dyn EditService>, surface: Arc<dyn PageSurface>) -> Self {
        Self {
            service,
            surface,
            revision: None,
            history: Vec::new(),
            pages: Vec::new(),
            state: EditState::Viewing,
            blocks: Vec::new(),
            overlays: Vec::new(),
            selection: None,
            form: None,
            notice_ttl: DEFAULT_NOTICE_TTL,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_notice_ttl(mut self, ttl: Duration) -> Self {
        self.notice_ttl = ttl;
        self
    }

    pub fn events(&self) -> Arc<Mutex<Vec<SessionEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn take_events(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn revision(&self) -> Option<&RevisionId> {
        self.revision.as_ref()
    }

    pub fn history(&self) -> &[RevisionId] {
        &self.history
    }

    pub fn state(&self) -> EditState {
        self.state
    }

    pub fn is_edit_mode(&self) -> bool {
        self.state.is_edit_mode()
    }

    pub fn pages(&self) -> &[RenderedPage] {
        &self.pages
    }

    pub fn blocks(&self) -> &[PageBlocks] {
        &self.blocks
    }

    pub fn overlays(&self) -> &[PageOverlay] {
        &self.overlays
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn form(&self) -> Option<&EditForm> {
        self.form.as_ref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            revision: self.revision.clone(),
            history: self.history.clone(),
            page_count: self.pages.len(),
            edit_mode: self.is_edit_mode(),
        }
    }

    /// Picks up a revision saved by an earlier run, history included.
    pub async fn restore(&mut self, snapshot: SessionSnapshot) -> ClientResult<()> {
        let Some(revision) = snapshot.revision else {
            return Ok(());
        };
        self.history = snapshot.history;
        self.adopt_revision(revision, None).await?;
        if snapshot.edit_mode {
            self.enable_edit_mode().await?;
        }
        Ok(())
    }

    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn upload(&mut self, path: &Path) -> ClientResult<RevisionId> {
        let is_pdf = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        if !is_pdf {
            return self.reject(ClientError::InvalidInput(
                "Please select a PDF file".to_owned(),
            ));
        }
        let contents = match std::fs::read(path) {
            Ok(contents) => contents,
            Err(err) => return self.fail(err.into(), "Upload failed"),
        };
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_owned());

        match self.service.upload(&file_name, Bytes::from(contents)).await {
            Ok(revision) => {
                self.notify(NoticeLevel::Success, "PDF uploaded successfully!");
                self.adopt_revision(revision.clone(), None).await?;
                Ok(revision)
            }
            Err(err) => self.fail(err, "Upload failed"),
        }
    }

    /// Makes `revision` current and loads its preview.
    pub async fn open_revision(&mut self, revision: RevisionId) -> ClientResult<()> {
        self.adopt_revision(revision, None).await
    }

    /// Reloads the current revision's preview, re-attaching overlays if edit
    /// mode was on.
    pub async fn reload(&mut self) -> ClientResult<()> {
        let revision = self.require_revision()?;
        self.adopt_revision(revision, None).await
    }

    pub async fn toggle_edit_mode(&mut self) -> ClientResult<()> {
        if self.state.is_edit_mode() {
            self.disable_edit_mode();
            Ok(())
        } else {
            self.enable_edit_mode().await
        }
    }

    /// Fetches block geometry for the current revision and attaches overlays.
    /// Does nothing when no document is loaded or edit mode is already on.
    #[instrument(skip(self))]
    pub async fn enable_edit_mode(&mut self) -> ClientResult<()> {
        let Some(revision) = self.revision.clone() else {
            debug!("no document loaded; edit mode unchanged");
            return Ok(());
        };
        if self.state != EditState::Viewing {
            return Ok(());
        }

        self.set_state(EditState::AwaitingBlocks);
        let blocks = match self.service.text_blocks(&revision).await {
            Ok(blocks) => blocks,
            Err(err) => {
                self.set_state(EditState::Viewing);
                return self.fail(err, "Failed to load text blocks");
            }
        };

        self.attach_overlays(revision, blocks);
        self.set_state(EditState::Editing);
        self.notify(NoticeLevel::Info, "Click on any text to edit it");
        Ok(())
    }

    /// Tears down every overlay and the selection, whatever the current state.
    pub fn disable_edit_mode(&mut self) {
        self.teardown();
    }

    #[instrument(skip(self))]
    pub fn select_block(&mut self, page_num: u32, block_index: usize) -> ClientResult<EditForm> {
        if self.state != EditState::Editing {
            return self.reject(ClientError::NotEditing);
        }
        let block = page_num
            .checked_sub(1)
            .and_then(|index| self.blocks.get(index as usize))
            .and_then(|page| page.blocks.get(block_index))
            .filter(|block| !block.is_blank())
            .cloned();
        let Some(block) = block else {
            return self.reject(ClientError::NoSuchBlock {
                page: page_num,
                index: block_index,
            });
        };

        let selection = Selection::new(page_num, block_index, block);
        let form = EditForm {
            page_num,
            original_text: selection.block.text.clone(),
            font: selection.original_font.describe(),
        };
        debug!(page_num, block_index, text = %selection.block.text, "text block selected");

        self.selection = Some(selection);
        self.form = Some(form.clone());
        self.emit(SessionEvent::SelectionChanged(Some((page_num, block_index))));
        self.emit(SessionEvent::EditFormOpened(form.clone()));
        Ok(form)
    }

    /// Routes a click at pixel `(x, y)` on `page_num` to the overlay beneath it.
    /// Returns `true` when an overlay took the click, so it must not reach the
    /// page image underneath.
    pub fn click(&mut self, page_num: u32, x: f64, y: f64) -> bool {
        let hit = self
            .overlays
            .iter()
            .find(|overlay| overlay.page_num == page_num)
            .and_then(|overlay| overlay.hit_test(x, y));
        match hit {
            Some(block_index) => self.select_block(page_num, block_index).is_ok(),
            None => false,
        }
    }

    /// Closes the edit form; edit mode and the selection stay as they are.
    pub fn cancel_edit(&mut self) {
        self.close_form();
    }

    #[instrument(skip(self, new_text))]
    pub async fn confirm_edit(
        &mut self,
        new_text: &str,
        preserve_formatting: bool,
    ) -> ClientResult<EditOutcome> {
        let Some(selection) = self.selection.clone() else {
            return self.reject(ClientError::NothingSelected);
        };
        if new_text == selection.block.text {
            self.close_form();
            return Ok(EditOutcome::Unchanged);
        }
        let filename = self.require_revision()?;

        let request = EditTextRequest {
            filename,
            page_num: selection.page_num,
            old_text: selection.block.text.clone(),
            new_text: new_text.to_owned(),
            bbox: selection.block.bbox,
            preserve_formatting,
            font_info: preserve_formatting.then(|| selection.original_font.clone()),
        };
        let message = if preserve_formatting {
            "Text updated with original formatting preserved!"
        } else {
            "Text updated successfully!"
        };
        self.submit(request, message, "Failed to update text").await
    }

    #[instrument(skip(self))]
    pub async fn confirm_delete(&mut self) -> ClientResult<EditOutcome> {
        let Some(selection) = self.selection.clone() else {
            return self.reject(ClientError::NothingSelected);
        };
        let filename = self.require_revision()?;

        let request = EditTextRequest {
            filename,
            page_num: selection.page_num,
            old_text: selection.block.text.clone(),
            new_text: String::new(),
            bbox: selection.block.bbox,
            preserve_formatting: false,
            font_info: None,
        };
        self.submit(request, "Text deleted successfully!", "Failed to delete text")
            .await
    }

    async fn submit(
        &mut self,
        request: EditTextRequest,
        success: &str,
        failure: &str,
    ) -> ClientResult<EditOutcome> {
        if self.state != EditState::Editing {
            return self.reject(ClientError::NotEditing);
        }
        self.close_form();
        self.set_state(EditState::Submitting);

        match self.service.edit_text(&request).await {
            Ok(revision) => {
                info!(%revision, page = request.page_num, "text edit accepted");
                self.notify(NoticeLevel::Success, success);
                if let Err(err) = self
                    .adopt_revision(revision.clone(), Some(request.page_num))
                    .await
                {
                    warn!(?err, %revision, "edit applied but the new revision failed to load");
                }
                Ok(EditOutcome::Revised(revision))
            }
            Err(err) => {
                self.set_state(EditState::Editing);
                self.fail(err, failure)
            }
        }
    }

    #[instrument(skip(self, new_text), fields(page = new_text.page_num))]
    pub async fn add_text(&mut self, new_text: NewText) -> ClientResult<RevisionId> {
        if new_text.text.trim().is_empty() {
            return self.reject(ClientError::InvalidInput(
                "Please enter text to add".to_owned(),
            ));
        }
        let filename = self.require_revision()?;
        let page_count = self.pages.len() as u32;
        if new_text.page_num < 1 || (page_count > 0 && new_text.page_num > page_count) {
            return self.reject(ClientError::InvalidInput(format!(
                "Invalid page number: {}",
                new_text.page_num
            )));
        }

        let request = AddTextRequest {
            filename,
            page_num: new_text.page_num,
            text: new_text.text,
            x: new_text.x,
            y: new_text.y,
            font_size: new_text.font_size,
            color: new_text.color,
        };
        match self.service.add_text(&request).await {
            Ok(revision) => {
                self.notify(NoticeLevel::Success, "Text added successfully!");
                self.adopt_revision(revision.clone(), Some(request.page_num))
                    .await?;
                Ok(revision)
            }
            Err(err) => self.fail(err, "Failed to add text"),
        }
    }

    /// Extracts the text layer, falling back to the OCR endpoint when no page
    /// has meaningful text.
    #[instrument(skip(self))]
    pub async fn extract_text(&mut self) -> ClientResult<TextExtraction> {
        let revision = self.require_revision()?;
        let pages = match self.service.extract_text(&revision).await {
            Ok(pages) => pages,
            Err(err) => return self.fail(err, "Failed to extract text"),
        };
        if TextExtraction::has_meaningful_text(&pages) {
            return Ok(TextExtraction {
                pages,
                ocr_used: false,
                message: None,
            });
        }

        self.notify(
            NoticeLevel::Info,
            "No text found. Checking for image-based content...",
        );
        match self.service.ocr_text(&revision).await {
            Ok(extraction) => {
                if let Some(message) = &extraction.message {
                    self.notify(NoticeLevel::Info, message.clone());
                }
                Ok(extraction)
            }
            Err(err) => self.fail(err, "Text extraction failed"),
        }
    }

    #[instrument(skip(self))]
    pub async fn ocr_text(&mut self) -> ClientResult<TextExtraction> {
        let revision = self.require_revision()?;
        self.notify(NoticeLevel::Info, "Checking document for text content...");
        match self.service.ocr_text(&revision).await {
            Ok(extraction) => {
                match &extraction.message {
                    Some(message) => self.notify(NoticeLevel::Info, message.clone()),
                    None => self.notify(NoticeLevel::Success, "Text extraction completed!"),
                }
                Ok(extraction)
            }
            Err(err) => self.fail(err, "Text extraction failed"),
        }
    }

    /// Splits out pages `start_page..=end_page` (to the last page when `end_page`
    /// is `None`) and makes the result current.
    #[instrument(skip(self))]
    pub async fn split(
        &mut self,
        start_page: u32,
        end_page: Option<u32>,
    ) -> ClientResult<RevisionId> {
        let filename = self.require_revision()?;
        let page_count = self.pages.len() as u32;
        if start_page < 1 || start_page > page_count {
            return self.reject(ClientError::InvalidInput("Invalid start page".to_owned()));
        }
        if let Some(end) = end_page {
            if end < start_page || end > page_count {
                return self.reject(ClientError::InvalidInput("Invalid end page".to_owned()));
            }
        }

        let request = SplitRequest {
            filename,
            start_page,
            end_page,
        };
        match self.service.split(&request).await {
            Ok(revision) => {
                self.notify(NoticeLevel::Success, "PDF split successfully!");
                self.adopt_revision(revision.clone(), None).await?;
                Ok(revision)
            }
            Err(err) => self.fail(err, "Failed to split PDF"),
        }
    }

    /// Merges the current revision (if any) followed by `others`, and makes the
    /// merged document current.
    #[instrument(skip(self))]
    pub async fn merge(&mut self, others: &[RevisionId]) -> ClientResult<RevisionId> {
        let filenames: Vec<RevisionId> = self
            .revision
            .iter()
            .chain(others.iter())
            .cloned()
            .collect();
        if filenames.len() < 2 {
            return self.reject(ClientError::InvalidInput(
                "At least 2 files required for merging".to_owned(),
            ));
        }
        match self.service.merge(&filenames).await {
            Ok(revision) => {
                self.notify(NoticeLevel::Success, "PDFs merged successfully!");
                self.adopt_revision(revision.clone(), None).await?;
                Ok(revision)
            }
            Err(err) => self.fail(err, "Failed to merge PDFs"),
        }
    }

    #[instrument(skip(self))]
    pub async fn download(&mut self) -> ClientResult<Bytes> {
        let revision = self.require_revision()?;
        match self.service.download(&revision).await {
            Ok(contents) => {
                self.notify(NoticeLevel::Success, "Download complete!");
                Ok(contents)
            }
            Err(err) => self.fail(err, "Download failed"),
        }
    }

    #[instrument(skip(self))]
    pub async fn convert_to_word(&mut self) -> ClientResult<WordDocument> {
        let revision = self.require_revision()?;
        self.notify(
            NoticeLevel::Info,
            "Converting PDF to Word... This may take a moment.",
        );
        let conversion = match self.service.convert_to_word(&revision).await {
            Ok(conversion) => conversion,
            Err(err) => return self.fail(err, "PDF to Word conversion failed"),
        };
        self.notify(
            NoticeLevel::Success,
            format!(
                "PDF converted successfully! Processed {} pages.",
                conversion.pages_processed
            ),
        );
        match self.service.download_word(&conversion.word_filename).await {
            Ok(contents) => Ok(WordDocument {
                conversion,
                contents,
            }),
            Err(err) => self.fail(err, "Word document download failed"),
        }
    }

    /// Swaps in `revision`: stale overlays and selection go first, then the new
    /// preview loads, and edit mode comes back once every page image is ready.
    async fn adopt_revision(
        &mut self,
        revision: RevisionId,
        edited_page: Option<u32>,
    ) -> ClientResult<()> {
        let resume_editing = self.state.is_edit_mode();
        self.teardown();

        if self.revision.as_ref() != Some(&revision) {
            if let Some(previous) = self.revision.replace(revision.clone()) {
                self.history.push(previous);
            }
            self.emit(SessionEvent::RevisionChanged(revision.clone()));
        }

        self.load_preview(&revision).await?;
        if let Some(page) = edited_page {
            self.emit(SessionEvent::PageUpdated(page));
        }
        if resume_editing {
            self.enable_edit_mode().await?;
        }
        Ok(())
    }

    async fn load_preview(&mut self, revision: &RevisionId) -> ClientResult<()> {
        let preview = match self.service.preview(revision).await {
            Ok(preview) => preview,
            Err(err) => return self.fail(err, "Failed to load PDF"),
        };
        // Resolves only once every page image has loaded.
        let pages = match self.surface.present(revision, &preview).await {
            Ok(pages) => pages,
            Err(err) => return self.fail(err, "Failed to display PDF"),
        };
        info!(%revision, pages = pages.len(), "preview loaded");
        self.pages = pages;
        self.emit(SessionEvent::PreviewLoaded {
            revision: revision.clone(),
            pages: self.pages.len(),
        });
        Ok(())
    }

    fn attach_overlays(&mut self, revision: RevisionId, blocks: Vec<PageBlocks>) {
        self.clear_overlays();
        self.overlays = layout_overlays(&self.pages, &blocks);
        self.blocks = blocks;
        let regions: usize = self
            .overlays
            .iter()
            .map(|overlay| overlay.regions.len())
            .sum();
        debug!(%revision, pages = self.overlays.len(), regions, "overlays attached");
        self.emit(SessionEvent::OverlaysAttached { revision, regions });
    }

    fn clear_overlays(&mut self) {
        let had_overlays = !self.overlays.is_empty();
        self.overlays.clear();
        self.blocks.clear();
        if had_overlays {
            self.emit(SessionEvent::OverlaysCleared);
        }
    }

    fn teardown(&mut self) {
        self.clear_overlays();
        self.close_form();
        if self.selection.take().is_some() {
            self.emit(SessionEvent::SelectionChanged(None));
        }
        self.set_state(EditState::Viewing);
    }

    fn close_form(&mut self) {
        if self.form.take().is_some() {
            self.emit(SessionEvent::EditFormClosed);
        }
    }

    fn set_state(&mut self, next: EditState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "edit state transition");
            self.state = next;
            self.emit(SessionEvent::StateChanged(next));
        }
    }

    fn require_revision(&self) -> ClientResult<RevisionId> {
        match &self.revision {
            Some(revision) => Ok(revision.clone()),
            None => self.reject(ClientError::NoDocument),
        }
    }

    fn emit(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }

    fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        self.emit(SessionEvent::Notice(Notice {
            level,
            message: message.into(),
            ttl: self.notice_ttl,
        }));
    }

    /// Surfaces a local precondition failure.
    fn reject<T>(&self, err: ClientError) -> ClientResult<T> {
        debug!(%err, "action rejected");
        self.notify(NoticeLevel::Warning, err.to_string());
        Err(err)
    }

    /// Surfaces a failed request. Server messages are shown verbatim; anything
    /// else is prefixed with what was being attempted.
    fn fail<T>(&self, err: ClientError, action: &str) -> ClientResult<T> {
        warn!(%err, action, "request failed");
        let message = match (&err, err.kind()) {
            (ClientError::Server(message), _) => message.clone(),
            (_, ErrorKind::Precondition) => err.to_string(),
            _ => format!("{action}: {err}"),
        };
        self.notify(NoticeLevel::Error, message);
        Err(err)
    }
}
