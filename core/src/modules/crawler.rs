use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::core::budget::{RunBudget, StopReason};
use crate::core::frontier::{Frontier, Traversal};
use crate::errors::{ProbeError, SurfaceError};
use crate::surface::{BrowsingSurface, Locator};
use crate::utils::{host_of, resolve_link};

lazy_static! {
    static ref NUMERIC_SEGMENT: Regex = Regex::new(r"^\d+$").unwrap();
    static ref OPAQUE_SEGMENT: Regex = Regex::new(
        r"(?i)^([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}|[0-9a-f]*\d[0-9a-f]*)$"
    )
    .unwrap();
}

/// A page reached during a crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    /// Decoded query pairs in URL order.
    pub params: Vec<(String, String)>,
    /// The URL carries a query parameter or an ID-like path segment.
    pub identity_scoped: bool,
    /// The page content matched the owner's identity pattern.
    pub owner_marked: bool,
}

impl Endpoint {
    pub fn from_url(url: &Url) -> Self {
        Self {
            url: url.to_string(),
            params: url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
            identity_scoped: looks_identity_scoped(url),
            owner_marked: false,
        }
    }
}

/// True when the URL has a query parameter or a path segment that looks like
/// an object ID (all digits, UUID, or hex with at least 8 chars and a digit).
pub fn looks_identity_scoped(url: &Url) -> bool {
    if url.query_pairs().next().is_some() {
        return true;
    }
    url.path_segments().map_or(false, |mut segments| {
        segments.any(|s| {
            NUMERIC_SEGMENT.is_match(s) || (s.len() >= 8 && OPAQUE_SEGMENT.is_match(s))
        })
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    /// Declared input type, `text` when absent.
    pub kind: String,
}

impl FormField {
    /// Fields a user can type into.
    pub fn is_typeable(&self) -> bool {
        !matches!(
            self.kind.as_str(),
            "submit" | "button" | "image" | "reset" | "hidden" | "checkbox" | "radio" | "file"
        )
    }
}

/// A form seen on one page visit. The same markup on two pages yields two
/// forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub page_url: String,
    pub action: String,
    pub method: String,
    /// Position among the page's forms, used to find it again after reloads.
    pub index: usize,
    pub fields: Vec<FormField>,
}

impl Form {
    pub fn typeable_fields(&self) -> impl Iterator<Item = &FormField> {
        self.fields.iter().filter(|f| f.is_typeable())
    }

    pub fn has_password(&self) -> bool {
        self.fields.iter().any(|f| f.kind == "password")
    }
}

/// Everything a crawl produced.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    /// URLs taken from the frontier, in visiting order.
    pub visited: Vec<String>,
    pub endpoints: Vec<Endpoint>,
    pub forms: Vec<Form>,
    pub stopped: Option<StopReason>,
}

/// Same-host crawl scope, minus pages that must never be opened (logout).
#[derive(Debug, Clone)]
pub struct Scope {
    host: Option<String>,
    excluded_paths: Vec<String>,
}

impl Scope {
    pub fn same_host(seed: &Url) -> Self {
        Self {
            host: host_of(seed),
            excluded_paths: Vec::new(),
        }
    }

    /// Drops every in-scope URL with the same path as `url`, whatever its
    /// query string.
    pub fn excluding(mut self, url: &Url) -> Self {
        if host_of(url) == self.host {
            self.excluded_paths.push(url.path().to_string());
        }
        self
    }

    pub fn contains(&self, url: &Url) -> bool {
        self.host.is_some()
            && host_of(url) == self.host
            && !self.excluded_paths.iter().any(|p| p == url.path())
    }
}

/// What to record on each visited page.
#[derive(Debug, Clone)]
pub enum CrawlTarget {
    /// Forms containing a password field.
    LoginForms,
    /// Pages whose source matches the owner's pattern.
    IdentityContent(Regex),
}

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub max_depth: u32,
    pub max_pages: usize,
    pub traversal: Traversal,
    pub page_settle: Duration,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_pages: 200,
            traversal: Traversal::BreadthFirst,
            page_settle: Duration::from_secs(1),
        }
    }
}

pub struct Crawler {
    options: CrawlOptions,
}

impl Crawler {
    pub fn new(options: CrawlOptions) -> Self {
        Self { options }
    }

    /// Walks same-scope links from `seed` up to `max_depth` hops. The seed
    /// is depth 0, so `max_depth == 0` visits the seed only. Page failures
    /// are logged and skipped.
    pub async fn crawl<S: BrowsingSurface + ?Sized>(
        &self,
        surface: &mut S,
        seed: &Url,
        scope: &Scope,
        target: &CrawlTarget,
        budget: &RunBudget,
    ) -> Inventory {
        let mut inventory = Inventory::default();
        let mut frontier = Frontier::new(self.options.traversal);

        let mut seed = seed.clone();
        seed.set_fragment(None);
        if !scope.contains(&seed) {
            warn!("Seed {} is outside the crawl scope", seed);
            return inventory;
        }
        frontier.push(seed.to_string(), 0);

        while let Some((url, depth)) = frontier.next() {
            if let Some(reason) = budget.exhausted() {
                warn!("Crawl stopped early ({:?}); {} page(s) left queued", reason, frontier.len() + 1);
                inventory.stopped = Some(reason);
                break;
            }
            if inventory.visited.len() >= self.options.max_pages {
                warn!("Reached max pages limit ({})", self.options.max_pages);
                break;
            }

            info!("Visiting: {} (depth {})", url, depth);
            inventory.visited.push(url.clone());

            if let Err(e) = surface.navigate(&url).await {
                warn!("{}", ProbeError::navigation(&url, e));
                continue;
            }
            tokio::time::sleep(self.options.page_settle).await;

            let base = match surface.current_url().await.ok().and_then(|u| Url::parse(&u).ok()) {
                Some(u) => u,
                None => match Url::parse(&url) {
                    Ok(u) => u,
                    Err(_) => continue,
                },
            };

            if let Err(e) = self.inspect_page(surface, &url, &base, target, &mut inventory).await {
                warn!("Error inspecting {}: {}", url, e);
            }

            if depth >= self.options.max_depth {
                continue;
            }
            match extract_links(surface, &base, scope).await {
                Ok(links) => {
                    for link in links {
                        if frontier.push(link.clone(), depth + 1) {
                            debug!("Queued {} (depth {})", link, depth + 1);
                        }
                    }
                }
                Err(e) => warn!("Error extracting links from {}: {}", url, e),
            }
        }

        info!(
            "Crawl finished: {} page(s) visited, {} endpoint(s), {} form(s)",
            inventory.visited.len(),
            inventory.endpoints.len(),
            inventory.forms.len()
        );
        inventory
    }

    async fn inspect_page<S: BrowsingSurface + ?Sized>(
        &self,
        surface: &mut S,
        url: &str,
        base: &Url,
        target: &CrawlTarget,
        inventory: &mut Inventory,
    ) -> Result<(), SurfaceError> {
        let requested = Url::parse(url).map_err(|e| SurfaceError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let mut endpoint = Endpoint::from_url(&requested);

        match target {
            CrawlTarget::IdentityContent(pattern) => {
                let source = surface.page_source().await?;
                endpoint.owner_marked = pattern.is_match(&source);
                if endpoint.owner_marked && endpoint.identity_scoped {
                    let names: Vec<&str> = endpoint.params.iter().map(|(k, _)| k.as_str()).collect();
                    info!("Identity-scoped content at {} (params: {:?})", url, names);
                }
            }
            CrawlTarget::LoginForms => {
                let forms = extract_forms(surface, url, base).await?;
                let found = forms.iter().filter(|f| f.has_password()).count();
                if found > 0 {
                    info!("Found {} login form(s) on {}", found, url);
                }
                inventory.forms.extend(forms.into_iter().filter(|f| f.has_password()));
            }
        }

        inventory.endpoints.push(endpoint);
        Ok(())
    }
}

async fn extract_links<S: BrowsingSurface + ?Sized>(
    surface: &mut S,
    base: &Url,
    scope: &Scope,
) -> Result<Vec<String>, SurfaceError> {
    let anchors = surface.find_elements(None, &Locator::tag("a")).await?;
    let mut links = Vec::new();
    for anchor in anchors {
        let href = match surface.attribute(anchor, "href").await? {
            Some(h) => h,
            None => continue,
        };
        match resolve_link(base, &href) {
            Some(link) if scope.contains(&link) => links.push(link.to_string()),
            _ => debug!("Dropping out-of-scope link {}", href),
        }
    }
    Ok(links)
}

/// All forms on the current page with their named input fields.
pub async fn extract_forms<S: BrowsingSurface + ?Sized>(
    surface: &mut S,
    page_url: &str,
    base: &Url,
) -> Result<Vec<Form>, SurfaceError> {
    let form_elements = surface.find_elements(None, &Locator::tag("form")).await?;
    let mut forms = Vec::with_capacity(form_elements.len());

    for (index, form_el) in form_elements.into_iter().enumerate() {
        let action = match surface.attribute(form_el, "action").await? {
            Some(a) if !a.trim().is_empty() => base
                .join(a.trim())
                .map(|u| u.to_string())
                .unwrap_or_else(|_| page_url.to_string()),
            _ => page_url.to_string(),
        };
        let method = surface
            .attribute(form_el, "method")
            .await?
            .map(|m| m.to_ascii_lowercase())
            .unwrap_or_else(|| "get".to_string());

        let mut fields = Vec::new();
        for input in surface.find_elements(Some(form_el), &Locator::tag("input")).await? {
            let name = match surface.attribute(input, "name").await? {
                Some(n) if !n.is_empty() => n,
                _ => continue,
            };
            let kind = surface
                .attribute(input, "type")
                .await?
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "text".to_string());
            fields.push(FormField { name, kind });
        }

        forms.push(Form {
            page_url: page_url.to_string(),
            action,
            method,
            index,
            fields,
        });
    }
    Ok(forms)
}
