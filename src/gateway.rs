//! Routing of inbound connections to files or to the reload channel.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        FromRequestParts, Request, State,
    },
    response::{IntoResponse, Response},
    Router,
};
use http::{header, request::Parts, Method};
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::Level;

use crate::{
    inject::{InjectLayer, RELOAD_SCRIPT},
    predicate::{And, ContentTypeStartsWithPredicate, SuccessPredicate},
    reloader::{ReloadClient, Reloader},
    responder::{Responder, ResponderError},
};

#[derive(Clone, Debug)]
struct GatewayState {
    responder: Responder,
    reloader: Reloader,
}

/// Build the application serving `responder`'s root and accepting reload
/// clients for `reloader`.
///
/// Every successful HTML response gets the reload script.
pub fn router(responder: Responder, reloader: Reloader) -> Router {
    let inject = InjectLayer::new(
        RELOAD_SCRIPT,
        And::new(ContentTypeStartsWithPredicate::new("text/html"), SuccessPredicate),
    );

    Router::new()
        .fallback(handle)
        .with_state(GatewayState {
            responder,
            reloader,
        })
        .layer(inject)
        .layer(
            TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new().level(Level::INFO)),
        )
}

async fn handle(State(state): State<GatewayState>, request: Request) -> Response {
    let (mut parts, _) = request.into_parts();

    if is_websocket_handshake(&parts) {
        return match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(upgrade) => upgrade.on_upgrade(move |socket| {
                let client = state.reloader.register();
                serve_client(socket, client)
            }),
            Err(rejection) => rejection.into_response(),
        };
    }

    if parts.method != Method::GET && parts.method != Method::HEAD {
        return ResponderError::MethodNotAllowed.into_response();
    }

    state.responder.respond(parts.uri.path()).await
}

fn is_websocket_handshake(parts: &Parts) -> bool {
    parts
        .headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

/// Forward reloads to one browser tab until either side hangs up.
async fn serve_client(mut socket: WebSocket, mut client: ReloadClient) {
    loop {
        tokio::select! {
            message = client.recv() => match message {
                Some(text) => {
                    if socket.send(Message::Text(String::from(text).into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    socket.send(Message::Close(None)).await.ok();
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    // Dropping the client takes it out of the set.
    tracing::debug!(client = ?client.id(), "reload client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use http::StatusCode;
    use tower::ServiceExt;

    fn app() -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(
            dir.path().join("index.html"),
            "<html><body><h1>home</h1></body></html>",
        )
        .unwrap();
        std::fs::write(dir.path().join("sub").join("a.txt"), "plain").unwrap();

        let responder = Responder::new(dir.path()).unwrap();
        (dir, router(responder, Reloader::new()))
    }

    async fn get(app: Router, method: Method, uri: &str) -> (StatusCode, String, String) {
        let request = http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .to_owned();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_index_gets_script_before_body() {
        let (_dir, app) = app();
        let (status, _, body) = get(app, Method::GET, "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.matches(RELOAD_SCRIPT).count(), 1);
        assert_eq!(
            body,
            format!("<html><body><h1>home</h1>{RELOAD_SCRIPT}</body></html>")
        );
    }

    #[tokio::test]
    async fn test_listing_gets_script_once() {
        let (_dir, app) = app();
        let (status, content_type, body) = get(app, Method::GET, "/sub/").await;

        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("text/html"));
        assert_eq!(body.matches(RELOAD_SCRIPT).count(), 1);
        assert!(body.contains(">..</a>"));
        assert!(body.contains(">a.txt</a>"));
    }

    #[tokio::test]
    async fn test_plain_files_are_untouched() {
        let (_dir, app) = app();
        let (status, content_type, body) = get(app, Method::GET, "/sub/a.txt").await;

        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("text/plain"));
        assert_eq!(body, "plain");
    }

    #[tokio::test]
    async fn test_error_pages_have_no_script() {
        let (_dir, app) = app();
        let (status, _, body) = get(app, Method::GET, "/missing.html").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!body.contains(RELOAD_SCRIPT));
    }

    #[tokio::test]
    async fn test_only_get_and_head_are_served() {
        let (_dir, app) = app();
        let (status, _, _) = get(app.clone(), Method::POST, "/").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _, _) = get(app, Method::HEAD, "/sub/a.txt").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn test_handshake_detection() {
        let (parts, _) = http::Request::builder()
            .header(header::UPGRADE, "WebSocket")
            .body(())
            .unwrap()
            .into_parts();
        assert!(is_websocket_handshake(&parts));

        let (parts, _) = http::Request::new(()).into_parts();
        assert!(!is_websocket_handshake(&parts));
    }
}
