//! Predicates for deciding which HTTP responses receive the reload script.
//!
//! Note that in addition to the predicates exported by this module,
//! [`Predicate`] is also implemented for `Fn(&T) -> bool + Clone`,
//! which is useful for quickly getting an arbitrary predicate.
use http::{header, Response};

/// Trait for predicates that check if a value matches them.
pub trait Predicate<T>: Clone {
    /// Check if the predicate matches the given value.
    fn check(&mut self, thing: &T) -> bool;
}

/// A predicate that matches based on [`Content-Type`] header.
///
/// [`Content-Type`]: https://developer.mozilla.org/en-US/docs/Web/HTTP/Headers/Content-Type
#[derive(Copy, Clone, Debug)]
pub struct ContentTypeStartsWithPredicate<Patt>(Patt);

impl<Patt: AsRef<str> + Copy> ContentTypeStartsWithPredicate<Patt> {
    /// Create a new [`ContentTypeStartsWithPredicate`] predicate.
    pub fn new(pattern: Patt) -> Self {
        ContentTypeStartsWithPredicate(pattern)
    }
}

impl<T, Patt: AsRef<str> + Copy> Predicate<Response<T>> for ContentTypeStartsWithPredicate<Patt> {
    fn check(&mut self, response: &Response<T>) -> bool {
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok().map(|s| s.starts_with(self.0.as_ref())))
            .unwrap_or(false)
    }
}

/// A predicate that matches responses with a `2xx` status.
///
/// Error pages are generated by the server itself and never edited, so there
/// is nothing to reload them for.
#[derive(Copy, Clone, Debug)]
pub struct SuccessPredicate;

impl<T> Predicate<Response<T>> for SuccessPredicate {
    fn check(&mut self, response: &Response<T>) -> bool {
        response.status().is_success()
    }
}

/// A predicate that matches when both of its parts match.
#[derive(Copy, Clone, Debug)]
pub struct And<A, B>(A, B);

impl<A, B> And<A, B> {
    /// Create a new [`And`] predicate.
    pub fn new(first: A, second: B) -> Self {
        And(first, second)
    }
}

impl<T, A: Predicate<T>, B: Predicate<T>> Predicate<T> for And<A, B> {
    fn check(&mut self, thing: &T) -> bool {
        self.0.check(thing) && self.1.check(thing)
    }
}

impl<T, F> Predicate<T> for F
where
    F: Fn(&T) -> bool + Clone,
{
    fn check(&mut self, thing: &T) -> bool {
        (self)(thing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn response(status: StatusCode, content_type: &str) -> Response<()> {
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, content_type)
            .body(())
            .unwrap()
    }

    #[test]
    fn test_content_type_prefix() {
        let mut html = ContentTypeStartsWithPredicate::new("text/html");

        assert!(html.check(&response(StatusCode::OK, "text/html; charset=utf-8")));
        assert!(!html.check(&response(StatusCode::OK, "text/plain")));
        assert!(!html.check(&Response::new(())));
    }

    #[test]
    fn test_and_requires_both() {
        let mut html_ok = And::new(
            ContentTypeStartsWithPredicate::new("text/html"),
            SuccessPredicate,
        );

        assert!(html_ok.check(&response(StatusCode::OK, "text/html")));
        assert!(!html_ok.check(&response(StatusCode::NOT_FOUND, "text/html")));
        assert!(!html_ok.check(&response(StatusCode::OK, "text/css")));
    }

    #[test]
    fn test_closure_predicate() {
        let mut teapot = |res: &Response<()>| res.status() == StatusCode::IM_A_TEAPOT;

        assert!(teapot.check(&response(StatusCode::IM_A_TEAPOT, "text/html")));
        assert!(!teapot.check(&response(StatusCode::OK, "text/html")));
    }
}
