use crate::crawler::{Context, Method, ParseFunc, ParseResult, Request, RootGenerator, Task};
use crate::output::Item;
use crate::rules::{compile_selector, parse_base, resolve_link};
use crate::ParseError;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

/// What a declarative rule does with the elements its selector matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    /// Follow every `href` as a derived request
    Links,

    /// Emit the page URL if any element contains a keyword
    Match,

    /// Emit the trimmed text of every element
    Text,
}

/// A rule as written in the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    pub kind: RuleKind,

    /// CSS selector the rule operates on
    pub selector: String,

    /// Rule that parses followed links (links rules)
    #[serde(default)]
    pub next: Option<String>,

    /// Priority of followed links (links rules)
    #[serde(default)]
    pub priority: u32,

    /// Only follow links containing this substring (links rules)
    #[serde(default)]
    pub pattern: Option<String>,

    /// Keyword to look for (match rules)
    #[serde(default)]
    pub contains: Option<String>,
}

/// Seed requests of a task as written in the configuration file
///
/// `template` may reference `{url}` (the task URL) and `{offset}`, which takes the
/// values `start`, `start + step`, ... for `pages` pages.
#[derive(Debug, Clone, Deserialize)]
pub struct RootSpec {
    #[serde(default)]
    pub urls: Vec<String>,

    #[serde(default)]
    pub template: Option<String>,

    #[serde(default = "default_pages")]
    pub pages: u32,

    #[serde(default)]
    pub start: u32,

    #[serde(default)]
    pub step: u32,

    /// Rule that parses the seed pages
    pub rule: String,

    #[serde(default)]
    pub method: Method,

    #[serde(default)]
    pub priority: u32,
}

impl RootSpec {
    /// Expands the explicit URLs followed by the templated ones
    pub fn expand(&self, task_url: &str) -> Vec<String> {
        let mut urls = self.urls.clone();
        if let Some(template) = &self.template {
            let template = template.replace("{url}", task_url);
            for page in 0..self.pages {
                let Some(offset) = self.offset(page) else {
                    tracing::warn!("Offset of page {} overflows, stopping at {} pages", page + 1, page);
                    break;
                };
                urls.push(template.replace("{offset}", &offset.to_string()));
            }
        }
        urls
    }

    /// `start + page * step`, or None if it does not fit in a u32
    pub fn offset(&self, page: u32) -> Option<u32> {
        page.checked_mul(self.step)?.checked_add(self.start)
    }
}

fn default_pages() -> u32 {
    1
}

/// Builds the root generator described by a root section
pub fn build_root(spec: &RootSpec) -> RootGenerator {
    let spec = spec.clone();
    Arc::new(move |task: &Arc<Task>| -> Result<Vec<Request>, ParseError> {
        spec.expand(&task.property().url)
            .into_iter()
            .map(|url| -> Result<Request, ParseError> {
                parse_base(&url)?;
                Ok(Request::new(task, url, spec.rule.as_str())
                    .with_method(spec.method)
                    .with_priority(spec.priority))
            })
            .collect()
    })
}

/// Compiles a declarative rule into a parse function
///
/// The selector is compiled once here, so a bad selector fails at startup rather
/// than on every page.
pub fn build_parse_func(spec: &RuleSpec) -> Result<ParseFunc, ParseError> {
    let selector = compile_selector(&spec.selector)?;

    match spec.kind {
        RuleKind::Links => {
            let next = required(spec, spec.next.as_deref(), "next")?;
            Ok(links_rule(selector, next, spec.priority, spec.pattern.clone()))
        }
        RuleKind::Match => {
            let keyword = required(spec, spec.contains.as_deref(), "contains")?;
            Ok(match_rule(selector, keyword))
        }
        RuleKind::Text => Ok(text_rule(selector)),
    }
}

fn required(spec: &RuleSpec, value: Option<&str>, field: &str) -> Result<String, ParseError> {
    value.map(str::to_string).ok_or_else(|| ParseError::Rule {
        rule: spec.name.clone(),
        message: format!("missing `{}`", field),
    })
}

fn links_rule(selector: Selector, next: String, priority: u32, pattern: Option<String>) -> ParseFunc {
    Arc::new(move |ctx: &Context<'_>| -> Result<ParseResult, ParseError> {
        let base = parse_base(&ctx.request.url)?;
        let document = Html::parse_document(ctx.body);
        let mut seen = HashSet::new();
        let mut result = ParseResult::default();

        for element in document.select(&selector) {
            let Some(link) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, &base))
            else {
                continue;
            };

            if let Some(pattern) = &pattern {
                if !link.contains(pattern.as_str()) {
                    continue;
                }
            }

            if seen.insert(link.clone()) {
                result
                    .requests
                    .push(ctx.request.derive(link, next.as_str()).with_priority(priority));
            }
        }

        Ok(result)
    })
}

fn match_rule(selector: Selector, keyword: String) -> ParseFunc {
    Arc::new(move |ctx: &Context<'_>| -> Result<ParseResult, ParseError> {
        let document = Html::parse_document(ctx.body);
        let found = document
            .select(&selector)
            .any(|element| element.text().collect::<String>().contains(keyword.as_str()));

        let mut result = ParseResult::default();
        if found {
            result.items.push(Item::new(ctx.request, ctx.request.url.as_str()));
        }
        Ok(result)
    })
}

fn text_rule(selector: Selector) -> ParseFunc {
    Arc::new(move |ctx: &Context<'_>| -> Result<ParseResult, ParseError> {
        let document = Html::parse_document(ctx.body);
        let items = document
            .select(&selector)
            .map(|element| element.text().collect::<String>())
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .map(|text| Item::new(ctx.request, text))
            .collect();

        Ok(ParseResult {
            requests: Vec::new(),
            items,
        })
    })
}
