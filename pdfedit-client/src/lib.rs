//! HTTP binding for the editing service, plus a page surface that decodes the
//! preview images it returns.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use pdfedit_core::{
    AddTextRequest, ClientConfig, ClientError, ClientResult, EditService, EditTextRequest,
    PageBlocks, PageText, PreviewPage, RevisionId, SplitRequest, TextExtraction, WordConversion,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

mod surface;

pub use surface::{page_image_path, DecodedSurface};

pub struct HttpEditService {
    client: Client,
    base: Url,
}

impl HttpEditService {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base = Url::parse(config.server_url.trim())
            .with_context(|| format!("invalid server URL {:?}", config.server_url))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("server URL {} cannot carry a path", base));
        }
        let client = Client::builder()
            .user_agent(concat!("pdfedit/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> ClientResult<T> {
        debug!(%url, "GET");
        let response = self.client.get(url).send().await.map_err(transport)?;
        read_envelope(response).await
    }

    async fn post_json<B, T>(&self, url: Url, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(%url, "POST");
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        read_envelope(response).await
    }

    async fn get_bytes(&self, url: Url) -> ClientResult<Bytes> {
        debug!(%url, "GET");
        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport)?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(parse_envelope::<Value>(status, &body)
                .err()
                .unwrap_or_else(|| ClientError::Server(format!("Request failed ({status})"))))
        }
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    filename: RevisionId,
}

#[derive(Deserialize)]
struct PreviewResponse {
    pages: Vec<PreviewPage>,
}

#[derive(Deserialize)]
struct BlocksResponse {
    pages_blocks: Vec<PageBlocks>,
}

#[derive(Deserialize)]
struct ModifiedResponse {
    modified_filename: RevisionId,
}

#[derive(Deserialize)]
struct TextResponse {
    pages_text: Vec<PageText>,
}

#[derive(Deserialize)]
struct OcrResponse {
    pages_text: Vec<PageText>,
    #[serde(default)]
    ocr_used: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct SplitResponse {
    split_filename: RevisionId,
}

#[derive(Serialize)]
struct MergeRequest<'a> {
    filenames: &'a [RevisionId],
}

#[derive(Deserialize)]
struct MergeResponse {
    merged_filename: RevisionId,
}

#[async_trait]
impl EditService for HttpEditService {
    #[instrument(skip(self, contents), fields(bytes = contents.len()))]
    async fn upload(&self, file_name: &str, contents: Bytes) -> ClientResult<RevisionId> {
        let part = Part::bytes(contents.to_vec())
            .file_name(file_name.to_owned())
            .mime_str("application/pdf")
            .map_err(transport)?;
        let form = Form::new().part("file", part);
        let response = self
            .client
            .post(self.endpoint(&["upload"]))
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        let body: UploadResponse = read_envelope(response).await?;
        Ok(body.filename)
    }

    #[instrument(skip(self))]
    async fn preview(&self, revision: &RevisionId) -> ClientResult<Vec<PreviewPage>> {
        let mut url = self.endpoint(&["preview", revision.as_str()]);
        // cache buster
        url.query_pairs_mut()
            .append_pair("t", &rand::random::<u64>().to_string());
        let body: PreviewResponse = self.get_json(url).await?;
        Ok(body.pages)
    }

    #[instrument(skip(self))]
    async fn text_blocks(&self, revision: &RevisionId) -> ClientResult<Vec<PageBlocks>> {
        let body: BlocksResponse = self
            .get_json(self.endpoint(&["get_text_blocks", revision.as_str()]))
            .await?;
        Ok(body.pages_blocks)
    }

    #[instrument(skip(self, request), fields(filename = %request.filename, page = request.page_num))]
    async fn edit_text(&self, request: &EditTextRequest) -> ClientResult<RevisionId> {
        let body: ModifiedResponse = self
            .post_json(self.endpoint(&["edit_text"]), request)
            .await?;
        Ok(body.modified_filename)
    }

    #[instrument(skip(self, request), fields(filename = %request.filename, page = request.page_num))]
    async fn add_text(&self, request: &AddTextRequest) -> ClientResult<RevisionId> {
        let body: ModifiedResponse = self
            .post_json(self.endpoint(&["add_text"]), request)
            .await?;
        Ok(body.modified_filename)
    }

    #[instrument(skip(self))]
    async fn extract_text(&self, revision: &RevisionId) -> ClientResult<Vec<PageText>> {
        let body: TextResponse = self
            .get_json(self.endpoint(&["extract_text", revision.as_str()]))
            .await?;
        Ok(body.pages_text)
    }

    #[instrument(skip(self))]
    async fn ocr_text(&self, revision: &RevisionId) -> ClientResult<TextExtraction> {
        let body: OcrResponse = self
            .get_json(self.endpoint(&["ocr_text", revision.as_str()]))
            .await?;
        Ok(TextExtraction {
            pages: body.pages_text,
            ocr_used: body.ocr_used,
            message: body.message,
        })
    }

    #[instrument(skip(self))]
    async fn split(&self, request: &SplitRequest) -> ClientResult<RevisionId> {
        let body: SplitResponse = self
            .post_json(self.endpoint(&["split_pdf"]), request)
            .await?;
        Ok(body.split_filename)
    }

    #[instrument(skip(self))]
    async fn merge(&self, revisions: &[RevisionId]) -> ClientResult<RevisionId> {
        let request = MergeRequest {
            filenames: revisions,
        };
        let body: MergeResponse = self
            .post_json(self.endpoint(&["merge_pdfs"]), &request)
            .await?;
        Ok(body.merged_filename)
    }

    #[instrument(skip(self))]
    async fn download(&self, revision: &RevisionId) -> ClientResult<Bytes> {
        self.get_bytes(self.endpoint(&["download", revision.as_str()]))
            .await
    }

    #[instrument(skip(self))]
    async fn convert_to_word(&self, revision: &RevisionId) -> ClientResult<WordConversion> {
        self.get_json(self.endpoint(&["convert_to_word", revision.as_str()]))
            .await
    }

    #[instrument(skip(self))]
    async fn download_word(&self, file_name: &str) -> ClientResult<Bytes> {
        self.get_bytes(self.endpoint(&["download_word", file_name]))
            .await
    }
}

fn transport(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Transport("request timed out".to_owned())
    } else {
        ClientError::Transport(err.to_string())
    }
}

async fn read_envelope<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();
    let body = response.bytes().await.map_err(transport)?;
    parse_envelope(status, &body)
}

/// Decodes a JSON response body. An `error` field or a non-2xx status is a
/// server-reported failure; its message is kept verbatim.
fn parse_envelope<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> ClientResult<T> {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(_) if !status.is_success() => {
            return Err(ClientError::Transport(format!(
                "server responded with {status}"
            )))
        }
        Err(err) => return Err(ClientError::Decode(err.to_string())),
    };

    if let Some(message) = value.get("error").and_then(Value::as_str) {
        return Err(ClientError::Server(message.to_owned()));
    }
    if !status.is_success() || value.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(ClientError::Server(format!("Request failed ({status})")));
    }
    serde_json::from_value(value).map_err(|err| ClientError::Decode(err.to_string()))
}
