pub mod client;

pub use client::HttpClient;

use async_trait::async_trait;
use reqwest::Method;
use url::Url;

use crate::errors::SurfaceError;

/// A page load issued by the surface: a plain navigation or a form submit.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub method: Method,
    pub url: Url,
    /// Urlencoded body fields for POST submits.
    pub form: Option<Vec<(String, String)>>,
}

impl PageRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            form: None,
        }
    }

    pub fn post_form(url: Url, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::POST,
            url,
            form: Some(fields),
        }
    }

    /// Looks up a submitted field in the body or, for GET, the query string.
    pub fn field(&self, name: &str) -> Option<String> {
        match &self.form {
            Some(fields) => fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone()),
            None => self
                .url
                .query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned()),
        }
    }
}

/// What came back for a page load, after redirects.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResponse {
    pub url: Url,
    pub status: u16,
    pub body: String,
}

/// Network layer underneath the HTML surface.
#[async_trait]
pub trait Transport: Send {
    async fn fetch(&mut self, request: &PageRequest) -> Result<PageResponse, SurfaceError>;

    /// Forgets cookies and any other identity-bound state.
    fn reset(&mut self) -> Result<(), SurfaceError>;
}
