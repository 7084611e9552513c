//! Synchronous DOM helpers behind [`HtmlSurface`](super::HtmlSurface).
//!
//! `scraper::Html` is not `Send`, so every helper parses the page source,
//! answers one question and returns owned data. Element handles are indices
//! into the document-order list of elements, which is stable across re-parses
//! of the same source.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use url::Url;

use super::Locator;
use crate::errors::SurfaceError;
use crate::http::PageRequest;

/// What a click on an element amounts to.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickAction {
    Follow(Url),
    Submit(PageRequest),
    Nothing,
}

enum Matcher {
    Tag(String),
    Name(String),
    Css(Selector),
}

impl Matcher {
    fn new(locator: &Locator) -> Result<Self, SurfaceError> {
        Ok(match locator {
            Locator::Tag(t) => Matcher::Tag(t.to_ascii_lowercase()),
            Locator::Name(n) => Matcher::Name(n.clone()),
            Locator::Css(s) => Matcher::Css(
                Selector::parse(s).map_err(|_| SurfaceError::InvalidSelector(s.clone()))?,
            ),
        })
    }

    fn matches(&self, el: &ElementRef<'_>) -> bool {
        match self {
            Matcher::Tag(t) => el.value().name() == t,
            Matcher::Name(n) => el.value().attr("name") == Some(n.as_str()),
            Matcher::Css(sel) => sel.matches(el),
        }
    }
}

fn with_elements<R>(source: &str, f: impl FnOnce(&[ElementRef<'_>]) -> R) -> R {
    let doc = Html::parse_document(source);
    let elements: Vec<ElementRef<'_>> = doc
        .tree
        .root()
        .descendants()
        .filter_map(ElementRef::wrap)
        .collect();
    f(&elements)
}

fn get<'a, 'b>(elements: &'b [ElementRef<'a>], idx: usize) -> Result<&'b ElementRef<'a>, SurfaceError> {
    elements.get(idx).ok_or(SurfaceError::StaleElement(idx))
}

fn is_descendant(el: &ElementRef<'_>, ancestor: &ElementRef<'_>) -> bool {
    el.ancestors().any(|a| a.id() == ancestor.id())
}

fn input_type(el: &ElementRef<'_>) -> String {
    el.value()
        .attr("type")
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "text".to_string())
}

fn is_submit_control(el: &ElementRef<'_>) -> bool {
    match el.value().name() {
        "input" => matches!(input_type(el).as_str(), "submit" | "image"),
        "button" => matches!(
            el.value().attr("type").map(|t| t.to_ascii_lowercase()).as_deref(),
            None | Some("submit")
        ),
        _ => false,
    }
}

pub fn find(source: &str, scope: Option<usize>, locator: &Locator) -> Result<Vec<usize>, SurfaceError> {
    let matcher = Matcher::new(locator)?;
    with_elements(source, |elements| {
        let scope_el = match scope {
            Some(idx) => Some(*get(elements, idx)?),
            None => None,
        };
        Ok(elements
            .iter()
            .enumerate()
            .filter(|(_, el)| scope_el.map_or(true, |s| is_descendant(el, &s)))
            .filter(|(_, el)| matcher.matches(el))
            .map(|(i, _)| i)
            .collect())
    })
}

pub fn attribute(source: &str, idx: usize, name: &str) -> Result<Option<String>, SurfaceError> {
    with_elements(source, |elements| {
        Ok(get(elements, idx)?.value().attr(name).map(str::to_string))
    })
}

/// The value a field holds before anything was typed into it.
pub fn initial_value(source: &str, idx: usize) -> Result<String, SurfaceError> {
    with_elements(source, |elements| {
        let el = get(elements, idx)?;
        Ok(match el.value().name() {
            "textarea" => el.text().collect(),
            _ => el.value().attr("value").unwrap_or_default().to_string(),
        })
    })
}

pub fn click_action(
    source: &str,
    page_url: &Url,
    idx: usize,
    typed: &HashMap<usize, String>,
) -> Result<ClickAction, SurfaceError> {
    with_elements(source, |elements| {
        let el = get(elements, idx)?;

        if el.value().name() == "a" {
            let target = el
                .value()
                .attr("href")
                .and_then(|href| page_url.join(href.trim()).ok())
                .filter(|u| matches!(u.scheme(), "http" | "https"));
            return Ok(target.map_or(ClickAction::Nothing, ClickAction::Follow));
        }

        if !is_submit_control(el) {
            return Ok(ClickAction::Nothing);
        }

        let form = el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|a| a.value().name() == "form");
        match form {
            Some(form) => build_submission(elements, &form, page_url, idx, typed).map(ClickAction::Submit),
            None => Ok(ClickAction::Nothing),
        }
    })
}

fn build_submission(
    elements: &[ElementRef<'_>],
    form: &ElementRef<'_>,
    page_url: &Url,
    submitter: usize,
    typed: &HashMap<usize, String>,
) -> Result<PageRequest, SurfaceError> {
    let mut action = match form.value().attr("action").map(str::trim) {
        None | Some("") => page_url.clone(),
        Some(a) => page_url.join(a).map_err(|e| SurfaceError::Navigation {
            url: a.to_string(),
            reason: e.to_string(),
        })?,
    };
    action.set_fragment(None);

    let is_post = form
        .value()
        .attr("method")
        .map_or(false, |m| m.eq_ignore_ascii_case("post"));

    let mut fields: Vec<(String, String)> = Vec::new();
    for (i, el) in elements.iter().enumerate() {
        if !is_descendant(el, form) {
            continue;
        }
        let name = match el.value().attr("name") {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => continue,
        };
        let attr_value = el.value().attr("value").unwrap_or_default().to_string();

        match el.value().name() {
            "input" => match input_type(el).as_str() {
                "submit" | "image" => {
                    if i == submitter {
                        fields.push((name, attr_value));
                    }
                }
                "button" | "reset" | "file" => {}
                "checkbox" | "radio" => {
                    if el.value().attr("checked").is_some() {
                        let v = if attr_value.is_empty() { "on".to_string() } else { attr_value };
                        fields.push((name, v));
                    }
                }
                _ => {
                    let v = typed.get(&i).cloned().unwrap_or(attr_value);
                    fields.push((name, v));
                }
            },
            "textarea" => {
                let v = typed.get(&i).cloned().unwrap_or_else(|| el.text().collect());
                fields.push((name, v));
            }
            "select" => {
                let v = typed.get(&i).cloned().or_else(|| selected_option(el));
                if let Some(v) = v {
                    fields.push((name, v));
                }
            }
            "button" => {
                if i == submitter {
                    fields.push((name, attr_value));
                }
            }
            _ => {}
        }
    }

    if is_post {
        Ok(PageRequest::post_form(action, fields))
    } else {
        action.set_query(None);
        if !fields.is_empty() {
            action.query_pairs_mut().extend_pairs(fields.iter());
        }
        Ok(PageRequest::get(action))
    }
}

fn selected_option(select: &ElementRef<'_>) -> Option<String> {
    let options: Vec<ElementRef<'_>> = select
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "option")
        .collect();
    let chosen = options
        .iter()
        .find(|o| o.value().attr("selected").is_some())
        .or_else(|| options.first())?;
    Some(
        chosen
            .value()
            .attr("value")
            .map(str::to_string)
            .unwrap_or_else(|| chosen.text().collect::<String>().trim().to_string()),
    )
}
