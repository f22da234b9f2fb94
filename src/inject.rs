//! Textual injection of the reload client into HTML responses.

use std::{
    future::Future,
    task::{ready, Poll},
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::{header, HeaderMap, Request, Response};
use http_body::{Body, Frame, SizeHint};
use tower::{Layer, Service};

use crate::predicate::Predicate;

/// Browser-side reload client, a `<script>` element.
///
/// It connects back to the serving host over a WebSocket and reloads the page
/// on a `reload` message, or shortly after the connection drops.
pub const RELOAD_SCRIPT: &str = include_str!("../assets/reload.html");

/// Return `html` with `script` inserted exactly once.
///
/// The script goes right before the last `</body>`, else before the last
/// `</html>`, else at the very end. Tags are matched ASCII
/// case-insensitively; the document is never parsed.
pub fn inject_script(html: &[u8], script: &[u8]) -> Bytes {
    let at = rfind_tag(html, b"</body>")
        .or_else(|| rfind_tag(html, b"</html>"))
        .unwrap_or(html.len());

    let mut out = BytesMut::with_capacity(html.len() + script.len());
    out.put_slice(&html[..at]);
    out.put_slice(script);
    out.put_slice(&html[at..]);
    out.freeze()
}

fn rfind_tag(haystack: &[u8], tag: &[u8]) -> Option<usize> {
    haystack
        .windows(tag.len())
        .rposition(|window| window.eq_ignore_ascii_case(tag))
}

/// Layer to apply [`InjectService`] middleware.
#[derive(Clone, Debug)]
pub struct InjectLayer<Pred> {
    script: Bytes,
    predicate: Pred,
}

impl<Pred> InjectLayer<Pred> {
    /// Inject `script` into every response matching `predicate`.
    pub fn new(script: impl Into<Bytes>, predicate: Pred) -> Self {
        Self {
            script: script.into(),
            predicate,
        }
    }
}

impl<S, Pred: Clone> Layer<S> for InjectLayer<Pred> {
    type Service = InjectService<S, Pred>;

    fn layer(&self, inner: S) -> Self::Service {
        InjectService::new(inner, self.script.clone(), self.predicate.clone())
    }
}

/// Middleware that injects a script into matching responses.
#[derive(Clone, Debug)]
pub struct InjectService<S, Pred> {
    service: S,
    script: Bytes,
    predicate: Pred,
}

impl<S, Pred> InjectService<S, Pred> {
    /// Wrap `service`.
    pub fn new(service: S, script: Bytes, predicate: Pred) -> Self {
        Self {
            service,
            script,
            predicate,
        }
    }
}

impl<S, Pred, ReqBody, ResBody> Service<Request<ReqBody>> for InjectService<S, Pred>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    Pred: Predicate<Response<ResBody>>,
    ResBody: Body,
{
    type Response = Response<InjectBody<ResBody>>;
    type Error = S::Error;
    type Future = InjectResponseFuture<S::Future, Pred>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        InjectResponseFuture {
            inner: self.service.call(request),
            script: Some(self.script.clone()),
            predicate: self.predicate.clone(),
        }
    }
}

pin_project_lite::pin_project! {
    /// Response future for [`InjectService`].
    pub struct InjectResponseFuture<F, Pred> {
        #[pin]
        inner: F,
        script: Option<Bytes>,
        predicate: Pred,
    }
}

impl<F, Pred, B, E> Future for InjectResponseFuture<F, Pred>
where
    F: Future<Output = Result<Response<B>, E>>,
    Pred: Predicate<Response<B>>,
    B: Body,
{
    type Output = Result<Response<InjectBody<B>>, E>;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let response = ready!(this.inner.poll(cx)?);

        // Encoded bodies cannot be edited textually.
        let injectable = this.predicate.check(&response)
            && !response.headers().contains_key(header::CONTENT_ENCODING);

        let (mut parts, body) = response.into_parts();
        let body = match this.script.take() {
            Some(script) if injectable => {
                let length = parts
                    .headers
                    .get(header::CONTENT_LENGTH)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<usize>().ok());
                match length {
                    Some(length) => {
                        parts
                            .headers
                            .insert(header::CONTENT_LENGTH, (length + script.len()).into());
                    }
                    None => {
                        parts.headers.remove(header::CONTENT_LENGTH);
                    }
                }
                InjectBody::injecting(body, script)
            }
            _ => InjectBody::passthrough(body),
        };

        Poll::Ready(Ok(Response::from_parts(parts, body)))
    }
}

pin_project_lite::pin_project! {
    /// Response body for [`InjectService`].
    ///
    /// Bodies that are injected into are buffered completely, since the
    /// insertion point is only known once the whole document has been seen.
    pub struct InjectBody<B> {
        #[pin]
        body: B,
        state: State,
    }
}

enum State {
    Passthrough,
    Buffering {
        buffer: BytesMut,
        script: Bytes,
        trailers: Option<HeaderMap>,
    },
    Trailers(HeaderMap),
    Done,
}

impl<B> InjectBody<B> {
    fn passthrough(body: B) -> Self {
        Self {
            body,
            state: State::Passthrough,
        }
    }

    fn injecting(body: B, script: Bytes) -> Self {
        Self {
            body,
            state: State::Buffering {
                buffer: BytesMut::new(),
                script,
                trailers: None,
            },
        }
    }
}

impl<B: Body> Body for InjectBody<B> {
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        loop {
            match this.state {
                State::Passthrough => {
                    let frame = ready!(this.body.as_mut().poll_frame(cx)?);
                    return Poll::Ready(frame.map(|frame| {
                        Ok(frame.map_data(|mut data| data.copy_to_bytes(data.remaining())))
                    }));
                }
                State::Buffering {
                    buffer,
                    script,
                    trailers,
                } => match ready!(this.body.as_mut().poll_frame(cx)) {
                    Some(Ok(frame)) => match frame.into_data() {
                        Ok(data) => buffer.put(data),
                        Err(frame) => {
                            if let Ok(map) = frame.into_trailers() {
                                trailers.get_or_insert_with(HeaderMap::new).extend(map);
                            }
                        }
                    },
                    Some(Err(err)) => {
                        *this.state = State::Done;
                        return Poll::Ready(Some(Err(err)));
                    }
                    None => {
                        let html = inject_script(buffer, script);
                        *this.state = match trailers.take() {
                            Some(map) => State::Trailers(map),
                            None => State::Done,
                        };
                        return Poll::Ready(Some(Ok(Frame::data(html))));
                    }
                },
                State::Trailers(_) => {
                    let State::Trailers(map) = std::mem::replace(this.state, State::Done) else {
                        unreachable!()
                    };
                    return Poll::Ready(Some(Ok(Frame::trailers(map))));
                }
                State::Done => return Poll::Ready(None),
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match self.state {
            State::Passthrough => self.body.is_end_stream(),
            State::Done => true,
            _ => false,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.state {
            State::Passthrough => self.body.size_hint(),
            State::Buffering { script, .. } => match self.body.size_hint().exact() {
                Some(exact) => SizeHint::with_exact(exact + script.len() as u64),
                None => SizeHint::default(),
            },
            State::Trailers(_) | State::Done => SizeHint::with_exact(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{And, ContentTypeStartsWithPredicate, SuccessPredicate};
    use axum::body::{to_bytes, Body as AxumBody};
    use http::StatusCode;
    use pretty_assertions::assert_eq;
    use std::convert::Infallible;
    use tower::ServiceExt;

    const SCRIPT: &str = "<script>reload()</script>";

    fn inject(html: &str) -> String {
        String::from_utf8(inject_script(html.as_bytes(), SCRIPT.as_bytes()).to_vec()).unwrap()
    }

    #[test]
    fn test_inject_before_body() {
        assert_eq!(
            inject("<html><body><p>hi</p></body></html>"),
            "<html><body><p>hi</p><script>reload()</script></body></html>"
        );
    }

    #[test]
    fn test_inject_before_html_without_body() {
        assert_eq!(
            inject("<html><p>hi</p></html>"),
            "<html><p>hi</p><script>reload()</script></html>"
        );
    }

    #[test]
    fn test_inject_appends_without_closing_tags() {
        assert_eq!(inject("<p>hi</p>"), "<p>hi</p><script>reload()</script>");
        assert_eq!(inject(""), SCRIPT);
    }

    #[test]
    fn test_inject_matches_tags_case_insensitively() {
        assert_eq!(
            inject("<BODY>x</BODY>"),
            "<BODY>x<script>reload()</script></BODY>"
        );
    }

    #[test]
    fn test_inject_uses_last_closing_body() {
        let html = "<body><pre>&lt;/body&gt; </body></pre></body>";
        let out = inject(html);
        assert_eq!(out.matches(SCRIPT).count(), 1);
        assert!(out.ends_with("</pre><script>reload()</script></body>"));
    }

    #[test]
    fn test_inject_keeps_invalid_utf8() {
        let html = b"<body>\xff\xfe</body>";
        let out = inject_script(html, SCRIPT.as_bytes());
        assert_eq!(&out[..8], b"<body>\xff\xfe");
        assert!(out.ends_with(b"</body>"));
    }

    async fn call(
        status: StatusCode,
        content_type: &'static str,
        body: &'static str,
    ) -> (Option<usize>, String) {
        let inner = tower::service_fn(move |_: Request<()>| async move {
            Ok::<_, Infallible>(
                Response::builder()
                    .status(status)
                    .header(header::CONTENT_TYPE, content_type)
                    .header(header::CONTENT_LENGTH, body.len())
                    .body(AxumBody::from(body))
                    .unwrap(),
            )
        });
        let response = InjectLayer::new(
            SCRIPT,
            And::new(ContentTypeStartsWithPredicate::new("text/html"), SuccessPredicate),
        )
        .layer(inner)
        .oneshot(Request::new(()))
        .await
        .unwrap();
        let length = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok()?.parse().ok());
        let bytes = to_bytes(AxumBody::new(response.into_body()), usize::MAX)
            .await
            .unwrap();
        (length, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_service_injects_into_html() {
        let (length, body) = call(StatusCode::OK, "text/html", "<body></body>").await;

        assert_eq!(body, "<body><script>reload()</script></body>");
        assert_eq!(length, Some(body.len()));
    }

    #[tokio::test]
    async fn test_service_skips_other_content_types() {
        let (length, body) = call(StatusCode::OK, "text/plain", "<body></body>").await;

        assert_eq!(body, "<body></body>");
        assert_eq!(length, Some(body.len()));
    }

    #[tokio::test]
    async fn test_service_skips_error_pages() {
        let (_, body) = call(StatusCode::NOT_FOUND, "text/html", "<body></body>").await;

        assert_eq!(body, "<body></body>");
    }
}
