use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use pdfedit_client::{DecodedSurface, HttpEditService};
use pdfedit_core::{
    BBox, ClientConfig, ClientError, EditOutcome, EditService, EditSession, EditState,
    EditTextRequest, ErrorKind, RevisionId,
};
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct Recorded {
    requests: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Recorded {
    fn push(&self, route: &str, value: Value) {
        self.requests.lock().push((route.to_owned(), value));
    }

    fn routes(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|(route, _)| route.clone())
            .collect()
    }

    fn body_of(&self, route: &str) -> Option<Value> {
        self.requests
            .lock()
            .iter()
            .find(|(seen, _)| seen == route)
            .map(|(_, body)| body.clone())
    }
}

async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn service_for(server_url: &str) -> HttpEditService {
    let config = ClientConfig {
        server_url: server_url.to_owned(),
        ..ClientConfig::default()
    };
    HttpEditService::new(&config).unwrap()
}

fn png_data_url(width: u32, height: u32) -> String {
    let image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png).unwrap();
    format!("data:image/png;base64,{}", STANDARD.encode(buf.into_inner()))
}

async fn preview(
    State(recorded): State<Recorded>,
    Path(filename): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    recorded.push(&format!("preview:{filename}"), json!(query));
    Json(json!({
        "success": true,
        "pages": [{
            "page_num": 1,
            "image": png_data_url(60, 80),
            "is_image_based": false,
            "width": 60,
            "height": 80
        }],
        "total_pages": 1,
        "filename": filename
    }))
}

async fn text_blocks(State(recorded): State<Recorded>, Path(filename): Path<String>) -> Json<Value> {
    recorded.push(&format!("blocks:{filename}"), Value::Null);
    let text = if filename == "doc.pdf" { "Hello" } else { "Goodbye" };
    Json(json!({
        "success": true,
        "pages_blocks": [{
            "page_num": 1,
            "blocks": [
                {
                    "text": text,
                    "bbox": [10.0, 10.0, 50.0, 20.0],
                    "font": "Helvetica-Bold",
                    "size": 12.0,
                    "flags": 16,
                    "color": 0
                },
                { "text": "  ", "bbox": [0.0, 0.0, 600.0, 800.0] }
            ]
        }]
    }))
}

async fn edit_text(
    State(recorded): State<Recorded>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    recorded.push("edit_text", body.clone());
    if body["old_text"] == "missing" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Text not found on page 1" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "modified_filename": "doc_v2.pdf",
            "message": "Text edited successfully"
        })),
    )
}

async fn upload(State(recorded): State<Recorded>, mut multipart: Multipart) -> Json<Value> {
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_owned();
        let file_name = field.file_name().unwrap_or_default().to_owned();
        let content_type = field.content_type().unwrap_or_default().to_owned();
        let data = field.bytes().await.unwrap();
        recorded.push(
            "upload",
            json!({
                "field": name,
                "file_name": file_name,
                "content_type": content_type,
                "len": data.len()
            }),
        );
        if name == "file" {
            return Json(json!({
                "success": true,
                "filename": format!("3b1f_{file_name}"),
                "message": "File uploaded successfully"
            }));
        }
    }
    Json(json!({ "error": "No file selected" }))
}

async fn download(Path(filename): Path<String>) -> Result<Vec<u8>, (StatusCode, Json<Value>)> {
    if filename == "doc.pdf" {
        Ok(b"%PDF-1.7 body".to_vec())
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "File not found" })),
        ))
    }
}

async fn merge(State(recorded): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
    recorded.push("merge_pdfs", body);
    Json(json!({ "success": true, "merged_filename": "merged_1.pdf" }))
}

fn app(recorded: Recorded) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/preview/:filename", get(preview))
        .route("/get_text_blocks/:filename", get(text_blocks))
        .route("/edit_text", post(edit_text))
        .route("/merge_pdfs", post(merge))
        .route("/download/:filename", get(download))
        .with_state(recorded)
}

#[tokio::test]
async fn edit_request_body_matches_wire_contract() {
    let recorded = Recorded::default();
    let base = spawn_server(app(recorded.clone())).await;
    let service = service_for(&base);

    let request = EditTextRequest {
        filename: RevisionId::new("doc.pdf"),
        page_num: 1,
        old_text: "Hello".into(),
        new_text: String::new(),
        bbox: BBox::new(10.0, 10.0, 50.0, 20.0),
        preserve_formatting: false,
        font_info: None,
    };
    let revision = service.edit_text(&request).await.unwrap();

    assert_eq!(revision, RevisionId::new("doc_v2.pdf"));
    let body = recorded.body_of("edit_text").unwrap();
    assert_eq!(
        body,
        json!({
            "filename": "doc.pdf",
            "page_num": 1,
            "old_text": "Hello",
            "new_text": "",
            "bbox": [10.0, 10.0, 50.0, 20.0],
            "preserve_formatting": false
        })
    );
}

#[tokio::test]
async fn server_errors_surface_their_message() {
    let recorded = Recorded::default();
    let base = spawn_server(app(recorded)).await;
    let service = service_for(&base);

    let request = EditTextRequest {
        filename: RevisionId::new("doc.pdf"),
        page_num: 1,
        old_text: "missing".into(),
        new_text: "x".into(),
        bbox: BBox::new(0.0, 0.0, 1.0, 1.0),
        preserve_formatting: true,
        font_info: None,
    };
    let err = service.edit_text(&request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Server);
    assert_eq!(err.to_string(), "Text not found on page 1");

    let err = service
        .download(&RevisionId::new("gone.pdf"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "File not found");
}

#[tokio::test]
async fn preview_encodes_revision_and_busts_caches() {
    let recorded = Recorded::default();
    let base = spawn_server(app(recorded.clone())).await;
    let service = service_for(&base);

    let pages = service
        .preview(&RevisionId::new("my doc.pdf"))
        .await
        .unwrap();

    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].width, Some(60));
    let query = recorded.body_of("preview:my doc.pdf").unwrap();
    assert!(query.get("t").is_some());
}

#[tokio::test]
async fn upload_sends_pdf_as_multipart_file_field() {
    let recorded = Recorded::default();
    let base = spawn_server(app(recorded.clone())).await;
    let service = service_for(&base);

    let revision = service
        .upload("report.pdf", bytes::Bytes::from_static(b"%PDF-1.4 test"))
        .await
        .unwrap();

    assert_eq!(revision, RevisionId::new("3b1f_report.pdf"));
    let part = recorded.body_of("upload").unwrap();
    assert_eq!(part["field"], "file");
    assert_eq!(part["file_name"], "report.pdf");
    assert_eq!(part["content_type"], "application/pdf");
    assert_eq!(part["len"], 13);
}

#[tokio::test]
async fn download_and_merge_round_trip() {
    let recorded = Recorded::default();
    let base = spawn_server(app(recorded.clone())).await;
    let service = service_for(&base);

    let contents = service.download(&RevisionId::new("doc.pdf")).await.unwrap();
    assert_eq!(&contents[..], b"%PDF-1.7 body");

    let merged = service
        .merge(&[RevisionId::new("a.pdf"), RevisionId::new("b.pdf")])
        .await
        .unwrap();
    assert_eq!(merged, RevisionId::new("merged_1.pdf"));
    assert_eq!(
        recorded.body_of("merge_pdfs").unwrap(),
        json!({ "filenames": ["a.pdf", "b.pdf"] })
    );
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let service = service_for(&format!("http://{addr}"));

    let err = service
        .text_blocks(&RevisionId::new("doc.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
}

#[tokio::test]
async fn session_edits_through_http_and_reloads_overlays() {
    let recorded = Recorded::default();
    let base = spawn_server(app(recorded.clone())).await;
    let service = Arc::new(service_for(&base));
    let surface = Arc::new(DecodedSurface::new(1.0));
    let mut session = EditSession::new(service, surface);

    session
        .open_revision(RevisionId::new("doc.pdf"))
        .await
        .unwrap();
    session.enable_edit_mode().await.unwrap();
    assert_eq!(session.state(), EditState::Editing);

    // Extent is 600x800 (from the blank block) over a 60x80 image.
    let region = session.overlays()[0].regions[0].rect;
    assert!((region.x - 1.0).abs() < 1e-9);
    assert!((region.width - 4.0).abs() < 1e-9);
    assert!(session.click(1, 2.0, 1.5));
    assert_eq!(session.form().unwrap().font.style, "Bold");

    let outcome = session.confirm_edit("Goodbye", true).await.unwrap();

    assert_eq!(outcome, EditOutcome::Revised(RevisionId::new("doc_v2.pdf")));
    let body = recorded.body_of("edit_text").unwrap();
    assert_eq!(body["new_text"], "Goodbye");
    assert_eq!(body["font_info"]["font"], "Helvetica-Bold");
    assert_eq!(body["font_info"]["flags"], 16);
    assert_eq!(session.revision(), Some(&RevisionId::new("doc_v2.pdf")));
    assert_eq!(session.state(), EditState::Editing);
    assert_eq!(session.blocks()[0].blocks[0].text, "Goodbye");

    let routes = recorded.routes();
    let preview_v2 = routes
        .iter()
        .position(|route| route == "preview:doc_v2.pdf")
        .unwrap();
    let blocks_v2 = routes
        .iter()
        .position(|route| route == "blocks:doc_v2.pdf")
        .unwrap();
    assert!(preview_v2 < blocks_v2);
}
