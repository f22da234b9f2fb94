//! Mapping request paths onto the served directory.

use std::{
    cmp::Ordering,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{
    body::Body,
    response::{IntoResponse, Response},
};
use http::{header, HeaderValue, StatusCode};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// Name of the document served in place of a directory listing.
pub const INDEX_DOCUMENT: &str = "index.html";

/// Characters escaped in the path segments of listing links.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Reasons a request cannot be answered with content.
#[derive(Debug, thiserror::Error)]
pub enum ResponderError {
    /// The path resolves outside of the served root.
    #[error("Forbidden")]
    Forbidden,
    /// Nothing exists at the path.
    #[error("Not Found")]
    NotFound,
    /// Only `GET` and `HEAD` are served.
    #[error("Method Not Allowed")]
    MethodNotAllowed,
    /// The path exists but could not be read.
    #[error("Internal Server Error")]
    Io(#[from] io::Error),
}

impl ResponderError {
    /// Status code reported for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ResponderError::Forbidden => StatusCode::FORBIDDEN,
            ResponderError::NotFound => StatusCode::NOT_FOUND,
            ResponderError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ResponderError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ResponderError {
    fn into_response(self) -> Response {
        let status = self.status();
        let page = format!(
            include_str!("../assets/error.html"),
            code = status.as_u16(),
            message = self,
        );
        html_response(status, page.into_bytes())
    }
}

/// What a request path resolved to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolved {
    /// A regular file, possibly the index document of a directory.
    File(PathBuf),
    /// A directory without an index document.
    Directory(PathBuf),
}

/// Per-request view of a path below the served root.
#[derive(Clone, Debug)]
pub struct RequestContext {
    /// Decoded, normalized path segments relative to the root.
    pub segments: Vec<String>,
    /// Absolute, symlink-free location on disk.
    pub resolved: Resolved,
}

impl RequestContext {
    /// The request path as displayed to users, with a trailing slash for
    /// directories.
    pub fn display_path(&self) -> String {
        let mut path = String::from("/");
        path.push_str(&self.segments.join("/"));
        if matches!(self.resolved, Resolved::Directory(_)) && !self.segments.is_empty() {
            path.push('/');
        }
        path
    }
}

/// Serves files and directory listings from a root directory.
#[derive(Clone, Debug)]
pub struct Responder {
    root: Arc<Path>,
}

impl Responder {
    /// Create a responder for `root`, which must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = std::fs::canonicalize(root)?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }

        Ok(Self { root: root.into() })
    }

    /// The canonical served root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Answer a request for the (still percent-encoded) `path`.
    pub async fn respond(&self, path: &str) -> Response {
        match self.try_respond(path).await {
            Ok(response) => response,
            Err(err) => {
                match &err {
                    ResponderError::Io(source) => {
                        tracing::error!(path, error = %source, "failed to serve")
                    }
                    ResponderError::Forbidden => tracing::warn!(path, "refused path outside root"),
                    _ => tracing::info!(path, status = %err.status(), "request failed"),
                }
                err.into_response()
            }
        }
    }

    async fn try_respond(&self, path: &str) -> Result<Response, ResponderError> {
        let context = self.resolve(path).await?;

        match &context.resolved {
            Resolved::File(file) => {
                let data = tokio::fs::read(file).await?;
                tracing::info!(path = %context.display_path(), "served");
                Ok(file_response(file, data))
            }
            Resolved::Directory(dir) => {
                let entries = read_listing(dir).await?;
                tracing::info!(path = %context.display_path(), "served listing");
                Ok(html_response(
                    StatusCode::OK,
                    render_listing(&context, &entries).into_bytes(),
                ))
            }
        }
    }

    /// Resolve `path` against the root without reading any content.
    pub async fn resolve(&self, path: &str) -> Result<RequestContext, ResponderError> {
        let path = path.split_once('?').map_or(path, |(path, _)| path);
        let decoded = percent_decode_str(path).decode_utf8_lossy();
        let segments = normalize(&decoded)?;

        let candidate = segments
            .iter()
            .fold(self.root.to_path_buf(), |path, segment| path.join(segment));
        let resolved = self.contain(&candidate).await?;

        let metadata = tokio::fs::metadata(&resolved).await.map_err(missing)?;
        let resolved = if metadata.is_dir() {
            let index = match self.contain(&resolved.join(INDEX_DOCUMENT)).await {
                Ok(index) => Some(index),
                Err(ResponderError::NotFound) => None,
                Err(err) => return Err(err),
            };
            let index = match index {
                Some(index) => is_file(&index).await.then_some(index),
                None => None,
            };
            index.map_or(Resolved::Directory(resolved), Resolved::File)
        } else {
            Resolved::File(resolved)
        };

        Ok(RequestContext { segments, resolved })
    }

    /// Canonicalize `path` and make sure it is still below the root.
    async fn contain(&self, path: &Path) -> Result<PathBuf, ResponderError> {
        let canonical = tokio::fs::canonicalize(path).await.map_err(missing)?;
        // Component-wise, so `/srv/www` never contains `/srv/wwwdata`.
        if canonical.starts_with(&self.root) {
            Ok(canonical)
        } else {
            Err(ResponderError::Forbidden)
        }
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file())
}

fn missing(err: io::Error) -> ResponderError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => ResponderError::NotFound,
        _ => ResponderError::Io(err),
    }
}

/// Split a decoded request path into segments, applying `.` and `..`.
///
/// Climbing above the root is refused outright.
fn normalize(path: &str) -> Result<Vec<String>, ResponderError> {
    let mut segments = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop().ok_or(ResponderError::Forbidden)?;
            }
            // Would turn into a new root or prefix once joined.
            segment if segment.contains('\0') || (cfg!(windows) && segment.contains(':')) => {
                return Err(ResponderError::NotFound)
            }
            segment => segments.push(segment.to_owned()),
        }
    }
    Ok(segments)
}

fn content_type(path: &Path) -> HeaderValue {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let value = if mime.type_() == mime_guess::mime::TEXT {
        format!("{}; charset=utf-8", mime.essence_str())
    } else {
        mime.essence_str().to_owned()
    };
    HeaderValue::from_str(&value)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}

fn file_response(path: &Path, data: Vec<u8>) -> Response {
    let mut response = Response::new(Body::empty());
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type(path));
    headers.insert(header::CONTENT_LENGTH, data.len().into());
    *response.body_mut() = Body::from(data);
    response
}

fn html_response(status: StatusCode, page: Vec<u8>) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(header::CONTENT_LENGTH, page.len().into());
    *response.body_mut() = Body::from(page);
    response
}

/// An immediate child of a listed directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListingEntry {
    /// File name.
    pub name: String,
    /// Whether the entry is (or links to) a directory.
    pub is_dir: bool,
}

impl Ord for ListingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .is_dir
            .cmp(&self.is_dir)
            .then_with(|| self.name.to_lowercase().cmp(&other.name.to_lowercase()))
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for ListingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Read and sort the entries of `dir`: directories first, then by name.
pub async fn read_listing(dir: &Path) -> io::Result<Vec<ListingEntry>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();

    while let Some(entry) = reader.next_entry().await? {
        // Follow symlinks; dangling ones are listed as files.
        let is_dir = tokio::fs::metadata(entry.path())
            .await
            .is_ok_and(|m| m.is_dir());
        entries.push(ListingEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir,
        });
    }

    entries.sort();
    Ok(entries)
}

fn render_listing(context: &RequestContext, entries: &[ListingEntry]) -> String {
    let base: String = context
        .segments
        .iter()
        .map(|segment| format!("/{}", utf8_percent_encode(segment, SEGMENT)))
        .collect();

    let mut items = String::new();
    if let Some((_, parent)) = context.segments.split_last() {
        let up: String = parent
            .iter()
            .map(|segment| format!("/{}", utf8_percent_encode(segment, SEGMENT)))
            .collect();
        items.push_str(&format!(
            "      <li><a class=\"dir\" href=\"{}/\">..</a></li>\n",
            html_escape::encode_double_quoted_attribute(&up)
        ));
    }

    for entry in entries {
        let slash = if entry.is_dir { "/" } else { "" };
        let href = format!("{base}/{}{slash}", utf8_percent_encode(&entry.name, SEGMENT));
        items.push_str(&format!(
            "      <li><a{} href=\"{}\">{}{slash}</a></li>\n",
            if entry.is_dir { " class=\"dir\"" } else { "" },
            html_escape::encode_double_quoted_attribute(&href),
            html_escape::encode_text(&entry.name),
        ));
    }

    format!(
        include_str!("../assets/listing.html"),
        title = html_escape::encode_text(&context.display_path()),
        entries = items,
    )
}
