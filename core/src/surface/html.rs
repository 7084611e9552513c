use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use super::document::{self, ClickAction};
use super::{BrowsingSurface, ElementId, Locator};
use crate::errors::SurfaceError;
use crate::http::{PageRequest, Transport};

struct Page {
    url: Url,
    source: String,
    /// Field values typed since the page was loaded, keyed by element index.
    typed: HashMap<usize, String>,
}

/// Browsing surface over plain HTML: no script execution, browser-like form
/// submission and a back stack.
pub struct HtmlSurface<T: Transport> {
    transport: T,
    history: Vec<Page>,
    page_timeout: Duration,
}

impl<T: Transport> HtmlSurface<T> {
    pub fn new(transport: T, page_timeout: Duration) -> Self {
        Self {
            transport,
            history: Vec::new(),
            page_timeout,
        }
    }

    fn page(&self) -> Result<&Page, SurfaceError> {
        self.history.last().ok_or(SurfaceError::NoPage)
    }

    fn page_mut(&mut self) -> Result<&mut Page, SurfaceError> {
        self.history.last_mut().ok_or(SurfaceError::NoPage)
    }

    async fn load(&mut self, request: PageRequest) -> Result<(), SurfaceError> {
        let response = tokio::time::timeout(self.page_timeout, self.transport.fetch(&request))
            .await
            .map_err(|_| SurfaceError::Timeout(self.page_timeout))??;
        debug!("{} {} -> {}", request.method, request.url, response.status);

        self.history.push(Page {
            url: response.url,
            source: response.body,
            typed: HashMap::new(),
        });
        Ok(())
    }

    fn current_value(&self, element: ElementId) -> Result<String, SurfaceError> {
        let page = self.page()?;
        match page.typed.get(&element.0) {
            Some(v) => Ok(v.clone()),
            None => document::initial_value(&page.source, element.0),
        }
    }
}

#[async_trait]
impl<T: Transport> BrowsingSurface for HtmlSurface<T> {
    async fn navigate(&mut self, url: &str) -> Result<(), SurfaceError> {
        let parsed = Url::parse(url).map_err(|e| SurfaceError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        self.load(PageRequest::get(parsed)).await
    }

    async fn current_url(&mut self) -> Result<String, SurfaceError> {
        Ok(self.page()?.url.to_string())
    }

    async fn find_elements(
        &mut self,
        scope: Option<ElementId>,
        locator: &Locator,
    ) -> Result<Vec<ElementId>, SurfaceError> {
        let page = self.page()?;
        let found = document::find(&page.source, scope.map(|s| s.0), locator)?;
        Ok(found.into_iter().map(ElementId).collect())
    }

    async fn attribute(
        &mut self,
        element: ElementId,
        name: &str,
    ) -> Result<Option<String>, SurfaceError> {
        if name == "value" {
            if let Some(v) = self.page()?.typed.get(&element.0) {
                return Ok(Some(v.clone()));
            }
        }
        document::attribute(&self.page()?.source, element.0, name)
    }

    async fn clear(&mut self, element: ElementId) -> Result<(), SurfaceError> {
        // Validates the handle before recording anything.
        document::attribute(&self.page()?.source, element.0, "name")?;
        self.page_mut()?.typed.insert(element.0, String::new());
        Ok(())
    }

    async fn send_keys(&mut self, element: ElementId, text: &str) -> Result<(), SurfaceError> {
        let mut value = self.current_value(element)?;
        value.push_str(text);
        self.page_mut()?.typed.insert(element.0, value);
        Ok(())
    }

    async fn click(&mut self, element: ElementId) -> Result<(), SurfaceError> {
        let action = {
            let page = self.page()?;
            document::click_action(&page.source, &page.url, element.0, &page.typed)?
        };
        match action {
            ClickAction::Follow(url) => self.load(PageRequest::get(url)).await,
            ClickAction::Submit(request) => self.load(request).await,
            ClickAction::Nothing => Ok(()),
        }
    }

    async fn page_source(&mut self) -> Result<String, SurfaceError> {
        Ok(self.page()?.source.clone())
    }

    async fn back(&mut self) -> Result<(), SurfaceError> {
        if self.history.len() > 1 {
            self.history.pop();
            // Browsers restore the previous page with its fields reset here.
            self.page_mut()?.typed.clear();
        }
        Ok(())
    }

    async fn wait_until(&mut self, locator: &Locator, timeout: Duration) -> Result<(), SurfaceError> {
        // Pages are complete once loaded; nothing can appear later.
        let found = self.find_elements(None, locator).await?;
        if found.is_empty() {
            Err(SurfaceError::Timeout(timeout))
        } else {
            Ok(())
        }
    }

    async fn reset(&mut self) -> Result<(), SurfaceError> {
        self.history.clear();
        self.transport.reset()
    }
}
