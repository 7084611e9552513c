pub mod document;
pub mod html;

pub use html::HtmlSurface;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::errors::SurfaceError;

/// Controls that submit their form when clicked.
pub const SUBMIT_CONTROLS: &str =
    "input[type=submit], input[type=image], button[type=submit], button:not([type])";

/// Opaque handle to an element of the page that is currently loaded.
///
/// Handles are invalidated by any navigation, submit or `back`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub usize);

/// How to look elements up on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Element tag name, e.g. `form` or `a`.
    Tag(String),
    /// Value of the `name` attribute.
    Name(String),
    /// CSS selector for structural queries.
    Css(String),
}

impl Locator {
    pub fn tag(tag: &str) -> Self {
        Locator::Tag(tag.to_string())
    }

    pub fn name(name: &str) -> Self {
        Locator::Name(name.to_string())
    }

    pub fn css(selector: &str) -> Self {
        Locator::Css(selector.to_string())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Tag(t) => write!(f, "<{}>", t),
            Locator::Name(n) => write!(f, "[name={}]", n),
            Locator::Css(s) => write!(f, "css:{}", s),
        }
    }
}

/// Capability surface the engine drives: navigation, DOM lookup and input.
///
/// A surface holds exactly one navigation state. Callers must never drive it
/// from two tasks at once.
#[async_trait]
pub trait BrowsingSurface: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), SurfaceError>;

    /// URL of the current page after redirects.
    async fn current_url(&mut self) -> Result<String, SurfaceError>;

    /// Finds elements matching `locator`, restricted to descendants of
    /// `scope` when given. Results are in document order.
    async fn find_elements(
        &mut self,
        scope: Option<ElementId>,
        locator: &Locator,
    ) -> Result<Vec<ElementId>, SurfaceError>;

    async fn attribute(
        &mut self,
        element: ElementId,
        name: &str,
    ) -> Result<Option<String>, SurfaceError>;

    async fn clear(&mut self, element: ElementId) -> Result<(), SurfaceError>;

    async fn send_keys(&mut self, element: ElementId, text: &str) -> Result<(), SurfaceError>;

    async fn click(&mut self, element: ElementId) -> Result<(), SurfaceError>;

    async fn page_source(&mut self) -> Result<String, SurfaceError>;

    async fn back(&mut self) -> Result<(), SurfaceError>;

    /// Waits at most `timeout` for an element matching `locator` to exist.
    async fn wait_until(&mut self, locator: &Locator, timeout: Duration) -> Result<(), SurfaceError>;

    /// Drops cookies, history and any other per-identity state.
    async fn reset(&mut self) -> Result<(), SurfaceError>;
}

/// Convenience lookup of the first element matching `locator`.
pub async fn find_first<S: BrowsingSurface + ?Sized>(
    surface: &mut S,
    scope: Option<ElementId>,
    locator: &Locator,
) -> Result<ElementId, SurfaceError> {
    surface
        .find_elements(scope, locator)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| SurfaceError::ElementNotFound(locator.to_string()))
}
