//! Browser-facing HTTP API over the upload root.
//!
//! Every route takes client paths as query parameters and confines them
//! through the same [`Root`] the SFTP sessions use. Error responses carry a
//! fixed message; details go to the log only.

use std::time::UNIX_EPOCH;

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use stowaway_vfs::{
    ConfinedPath, EntryMetadata, FileOps, ListCmd, MAX_READ_LEN, Root, VfsError,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::filetypes::{Category, extension_of, is_previewable};

/// HTTP API error, rendered as a status code and a generic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    BadRequest,
    Forbidden,
    NotFound,
    Internal,
}

impl From<VfsError> for ApiError {
    fn from(err: VfsError) -> Self {
        match &err {
            VfsError::PathTraversalRejected(_) => {
                tracing::warn!(error = %err, "http path rejected");
                ApiError::BadRequest
            }
            VfsError::NotFound(_) => ApiError::NotFound,
            VfsError::AccessDenied(_) => ApiError::Forbidden,
            VfsError::NotADirectory(_) | VfsError::UnsupportedOperation(_) => {
                ApiError::BadRequest
            }
            VfsError::Io(_) => {
                tracing::warn!(error = %err, "http request failed");
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest => (StatusCode::BAD_REQUEST, "Invalid request"),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "Access denied"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "File not found"),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };
        (status, message).into_response()
    }
}

#[derive(Clone)]
struct AppState {
    ops: FileOps,
}

impl AppState {
    fn root(&self) -> &Root {
        self.ops.root()
    }
}

/// Build the API router over `root`.
pub fn router(root: Root) -> Router {
    let state = AppState {
        ops: FileOps::new(root),
    };

    Router::new()
        .route("/heartbeat", get(heartbeat))
        .route("/api/files", get(list_files))
        .route("/uploads", get(download).delete(delete))
        .route("/preview", get(preview))
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` fires, then finish
/// in-flight requests.
pub async fn serve(
    listener: TcpListener,
    root: Root,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "HTTP API listening");
    axum::serve(listener, router(root))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("HTTP API stopped");
    Ok(())
}

async fn heartbeat() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    root: String,
}

#[derive(Debug, Serialize)]
struct FileRow {
    name: String,
    is_dir: bool,
    size: u64,
    modified: u64,
    extension: String,
    category: Category,
    previewable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    dir_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct DirListing {
    root: String,
    parent: Option<String>,
    files: Vec<FileRow>,
}

async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DirListing>, ApiError> {
    let dir = state.root().confine(&query.root)?;
    let virtual_dir = dir.virtual_path();
    tracing::debug!(path = %dir, "http list");

    let listing = state
        .ops
        .file_list(ListCmd::List {
            path: virtual_dir.clone(),
        })
        .await?;

    let files = listing
        .iter()
        .map(|entry| {
            let name = entry.name().to_string();
            let extension = if entry.is_dir() {
                String::new()
            } else {
                extension_of(&name).to_ascii_lowercase()
            };
            FileRow {
                is_dir: entry.is_dir(),
                size: entry.size(),
                modified: entry
                    .modified()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0),
                category: Category::from_extension(&extension),
                previewable: !entry.is_dir() && is_previewable(&extension),
                dir_path: entry.is_dir().then(|| child_path(&virtual_dir, &name)),
                extension,
                name,
            }
        })
        .collect();

    Ok(Json(DirListing {
        parent: parent_of(&virtual_dir),
        root: virtual_dir,
        files,
    }))
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    #[serde(default)]
    path: String,
}

async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
    request: Request,
) -> Result<Response, ApiError> {
    if query.path.is_empty() {
        return Err(ApiError::BadRequest);
    }
    let file = state.root().confine(&query.path)?;
    tracing::debug!(path = %file, "http download");
    serve_attachment(&file, request).await
}

#[derive(Debug, Deserialize)]
struct DeleteQuery {
    #[serde(default)]
    root: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    isdir: bool,
}

async fn delete(
    State(state): State<AppState>,
    Query(query): Query<DeleteQuery>,
) -> Result<&'static str, ApiError> {
    if query.name.is_empty() {
        return Err(ApiError::BadRequest);
    }
    let target = state
        .root()
        .confine(&child_path(&query.root, &query.name))?;
    if target.is_root() {
        return Err(VfsError::access_denied(target.virtual_path()).into());
    }
    tracing::debug!(path = %target, recursive = query.isdir, "http delete");

    let removed = if query.isdir {
        tokio::fs::remove_dir_all(&target).await
    } else {
        tokio::fs::remove_file(&target).await
    };
    removed.map_err(|e| VfsError::from_io(e, target.virtual_path()))?;

    tracing::info!(path = %target, "deleted");
    Ok("Successfully deleted")
}

#[derive(Debug, Deserialize)]
struct PreviewQuery {
    #[serde(default)]
    root: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    ext: String,
}

async fn preview(
    State(state): State<AppState>,
    Query(query): Query<PreviewQuery>,
    request: Request,
) -> Result<Response, ApiError> {
    if query.filename.is_empty() {
        return Err(ApiError::BadRequest);
    }
    let file = state
        .root()
        .confine(&child_path(&query.root, &query.filename))?;
    require_file(&file).await?;

    let ext = if query.ext.is_empty() {
        extension_of(&query.filename)
    } else {
        query.ext.trim_start_matches('.')
    };
    let name = html_escape(&query.filename);
    let src = download_url(&file);

    let fragment = match Category::from_extension(ext) {
        Category::Image => format!(r#"<img src="{src}" alt="{name}">"#),
        Category::Audio => format!(r#"<audio controls src="{src}"></audio>"#),
        Category::Text => {
            let mut handle = state.ops.file_read(&file.virtual_path()).await?;
            let bytes = handle.read_at(0, MAX_READ_LEN).await?;
            format!("<pre>{}</pre>", html_escape(&String::from_utf8_lossy(&bytes)))
        }
        Category::Document | Category::Other => return serve_attachment(&file, request).await,
    };

    Ok(Html(fragment).into_response())
}

async fn require_file(file: &ConfinedPath) -> Result<(), ApiError> {
    let meta = tokio::fs::metadata(file)
        .await
        .map_err(|e| VfsError::from_io(e, file.virtual_path()))?;
    if meta.is_dir() {
        return Err(ApiError::BadRequest);
    }
    Ok(())
}

/// Stream a file as a download, honoring range and conditional headers.
async fn serve_attachment(file: &ConfinedPath, request: Request) -> Result<Response, ApiError> {
    require_file(file).await?;

    let response = ServeFile::new(file.as_path())
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});
    let mut response = response.map(Body::new);

    if response.status().is_success() {
        let name = file.file_name().unwrap_or_default();
        let disposition = format!(r#"attachment; filename="{}""#, header_safe(&name));
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            response
                .headers_mut()
                .insert(header::CONTENT_DISPOSITION, value);
        }
    }
    Ok(response)
}

fn download_url(file: &ConfinedPath) -> String {
    let encoded: String =
        url::form_urlencoded::byte_serialize(file.virtual_path().as_bytes()).collect();
    format!("/uploads?path={encoded}")
}

fn child_path(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

fn parent_of(virtual_path: &str) -> Option<String> {
    if virtual_path == "/" {
        return None;
    }
    match virtual_path.rsplit_once('/') {
        Some(("", _)) | None => Some("/".to_string()),
        Some((parent, _)) => Some(parent.to_string()),
    }
}

fn header_safe(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect()
}

/// Escape text for literal rendering inside HTML.
pub fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use http_body_util::BodyExt;
    use tempfile::TempDir;

    fn app() -> (TempDir, Router) {
        let dir = TempDir::new().unwrap();
        let root = Root::new(dir.path()).unwrap();
        (dir, router(root))
    }

    async fn send(app: &Router, method: Method, uri: &str) -> Response {
        let request = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_heartbeat() {
        let (_dir, app) = app();
        let response = send(&app, Method::GET, "/heartbeat").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK");
    }

    #[tokio::test]
    async fn test_list_root_and_subdir() {
        let (dir, app) = app();
        std::fs::create_dir(dir.path().join("photos")).unwrap();
        std::fs::write(dir.path().join("photos/cat.PNG"), b"png").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hi").unwrap();

        let response = send(&app, Method::GET, "/api/files").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["root"], "/");
        assert!(json["parent"].is_null());
        let files = json["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["name"], "notes.txt");
        assert_eq!(files[0]["category"], "text");
        assert_eq!(files[0]["previewable"], true);
        assert_eq!(files[1]["name"], "photos");
        assert_eq!(files[1]["is_dir"], true);
        assert_eq!(files[1]["dir_path"], "/photos");

        let response = send(&app, Method::GET, "/api/files?root=%2Fphotos").await;
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["root"], "/photos");
        assert_eq!(json["parent"], "/");
        assert_eq!(json["files"][0]["extension"], "png");
        assert_eq!(json["files"][0]["category"], "image");
    }

    #[tokio::test]
    async fn test_list_rejects_traversal() {
        let (_dir, app) = app();
        let response = send(&app, Method::GET, "/api/files?root=..%2F..%2Fetc").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_string(response).await;
        assert!(!body.contains("etc"));
    }

    #[tokio::test]
    async fn test_download() {
        let (dir, app) = app();
        std::fs::write(dir.path().join("report.csv"), b"a,b\n1,2\n").unwrap();

        let response = send(&app, Method::GET, "/uploads?path=%2Freport.csv").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            r#"attachment; filename="report.csv""#
        );
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
        assert_eq!(body_string(response).await, "a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_download_range() {
        let (dir, app) = app();
        std::fs::write(dir.path().join("data.bin"), b"0123456789").unwrap();

        let request = axum::http::Request::builder()
            .uri("/uploads?path=data.bin")
            .header(header::RANGE, "bytes=2-4")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(body_string(response).await, "234");
    }

    #[tokio::test]
    async fn test_download_errors() {
        let (dir, app) = app();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let response = send(&app, Method::GET, "/uploads").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app, Method::GET, "/uploads?path=sub").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app, Method::GET, "/uploads?path=missing.txt").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&app, Method::GET, "/uploads?path=..%2Fsecret").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_file_and_tree() {
        let (dir, app) = app();
        std::fs::create_dir_all(dir.path().join("tree/inner")).unwrap();
        std::fs::write(dir.path().join("tree/inner/f"), b"x").unwrap();
        std::fs::write(dir.path().join("tree/g"), b"y").unwrap();

        let response = send(&app, Method::DELETE, "/uploads?root=%2Ftree&name=g").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "Successfully deleted");
        assert!(!dir.path().join("tree/g").exists());

        let response = send(&app, Method::DELETE, "/uploads?root=%2F&name=tree&isdir=true").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!dir.path().join("tree").exists());
        assert!(dir.path().exists());

        let response = send(&app, Method::DELETE, "/uploads?root=%2F&name=tree").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_refuses_root_and_escape() {
        let (dir, app) = app();
        std::fs::write(dir.path().join("keep"), b"k").unwrap();

        let response = send(&app, Method::DELETE, "/uploads?root=%2F&name=.&isdir=true").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = send(&app, Method::DELETE, "/uploads?root=%2F&name=..&isdir=true").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert!(dir.path().join("keep").exists());
    }

    #[tokio::test]
    async fn test_preview_text_is_escaped() {
        let (dir, app) = app();
        std::fs::write(dir.path().join("x.txt"), b"<script>alert(1)</script> & more").unwrap();

        let response = send(&app, Method::GET, "/preview?root=%2F&filename=x.txt&ext=txt").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert_eq!(
            body,
            "<pre>&lt;script&gt;alert(1)&lt;/script&gt; &amp; more</pre>"
        );
    }

    #[tokio::test]
    async fn test_preview_image_and_audio() {
        let (dir, app) = app();
        std::fs::create_dir(dir.path().join("media")).unwrap();
        std::fs::write(dir.path().join("media/a b.png"), b"png").unwrap();
        std::fs::write(dir.path().join("media/song.mp3"), b"mp3").unwrap();

        let response = send(
            &app,
            Method::GET,
            "/preview?root=%2Fmedia&filename=a%20b.png&ext=png",
        )
        .await;
        let body = body_string(response).await;
        assert!(body.starts_with("<img"));
        assert!(body.contains(r#"src="/uploads?path=%2Fmedia%2Fa+b.png""#));

        let response = send(&app, Method::GET, "/preview?root=%2Fmedia&filename=song.mp3").await;
        let body = body_string(response).await;
        assert!(body.starts_with("<audio controls"));
    }

    #[tokio::test]
    async fn test_preview_document_is_downloaded() {
        let (dir, app) = app();
        std::fs::write(dir.path().join("doc.pdf"), b"%PDF").unwrap();

        let response = send(&app, Method::GET, "/preview?root=%2F&filename=doc.pdf&ext=pdf").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::CONTENT_DISPOSITION));
        assert_eq!(body_string(response).await, "%PDF");
    }

    #[tokio::test]
    async fn test_preview_missing() {
        let (_dir, app) = app();
        let response = send(&app, Method::GET, "/preview?root=%2F&filename=nope.txt").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_parent_of() {
        assert_eq!(parent_of("/"), None);
        assert_eq!(parent_of("/a").as_deref(), Some("/"));
        assert_eq!(parent_of("/a/b").as_deref(), Some("/a"));
    }

    #[test]
    fn test_header_safe() {
        assert_eq!(header_safe(r#"a"b\c.txt"#), "a_b_c.txt");
        assert_eq!(header_safe("résumé.pdf"), "r_sum_.pdf");
    }
}
