//! Compiled rule set for discussion-group forums
//!
//! The root walks the first pages of a group's discussion list. The `list` rule
//! follows every topic link; the `content` rule emits the topic URL when the topic
//! body mentions the task's keyword.

use crate::crawler::{Context, ParseFunc, ParseResult, Request, RuleTree, Task, TaskProperty};
use crate::output::Item;
use crate::rules::{compile_selector, parse_base, resolve_link};
use crate::ParseError;
use scraper::Html;
use std::collections::HashSet;
use std::sync::Arc;

pub const NAME: &str = "forum";

pub const LIST_RULE: &str = "list";
pub const CONTENT_RULE: &str = "content";
pub const RULES: &[&str] = &[LIST_RULE, CONTENT_RULE];

/// Keyword used when the task does not configure one
pub const DEFAULT_KEYWORD: &str = "阳台";

const LIST_PAGES: u32 = 3;
const LIST_PAGE_SIZE: u32 = 25;
const TOPIC_PATH: &str = "/group/topic/";

/// Builds the forum rule tree for a task
pub fn rule_tree(property: &TaskProperty, keyword: Option<&str>) -> Result<RuleTree, ParseError> {
    let base = property.url.clone();
    let keyword = keyword.unwrap_or(DEFAULT_KEYWORD).to_string();

    let mut tree = RuleTree::new(move |task: &Arc<Task>| -> Result<Vec<Request>, ParseError> {
        (0..LIST_PAGES)
            .map(|page| list_page_url(&base, page * LIST_PAGE_SIZE))
            .map(|url| -> Result<Request, ParseError> {
                parse_base(&url)?;
                Ok(Request::new(task, url, LIST_RULE))
            })
            .collect()
    });
    tree.insert(LIST_RULE, list_rule()?);
    tree.insert(CONTENT_RULE, content_rule(keyword)?);
    Ok(tree)
}

fn list_page_url(base: &str, offset: u32) -> String {
    format!("{}discussion?start={}", base, offset)
}

fn list_rule() -> Result<ParseFunc, ParseError> {
    let links = compile_selector("a[href]")?;

    Ok(Arc::new(move |ctx: &Context<'_>| -> Result<ParseResult, ParseError> {
        let base = parse_base(&ctx.request.url)?;
        let document = Html::parse_document(ctx.body);
        let mut seen = HashSet::new();
        let mut result = ParseResult::default();

        let topics = document
            .select(&links)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| resolve_link(href, &base))
            .filter(|url| url.contains(TOPIC_PATH));

        for url in topics {
            if seen.insert(url.clone()) {
                result.requests.push(ctx.request.derive(url, CONTENT_RULE));
            }
        }

        Ok(result)
    }))
}

fn content_rule(keyword: String) -> Result<ParseFunc, ParseError> {
    let body = compile_selector("div.topic-content")?;

    Ok(Arc::new(move |ctx: &Context<'_>| -> Result<ParseResult, ParseError> {
        let document = Html::parse_document(ctx.body);
        let mentions = document
            .select(&body)
            .any(|div| div.text().collect::<String>().contains(keyword.as_str()));

        let mut result = ParseResult::default();
        if mentions {
            result.items.push(Item::new(ctx.request, ctx.request.url.as_str()));
        }
        Ok(result)
    }))
}
