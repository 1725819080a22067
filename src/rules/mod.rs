//! Rule sets
//!
//! Rules turn a fetched page into derived requests and items. They come from two
//! places: declarative rules read from the configuration file, and compiled rule
//! sets shipped with the crate that a task selects by name.

mod declarative;
pub mod forum;

pub use declarative::{build_parse_func, build_root, RootSpec, RuleKind, RuleSpec};

use crate::crawler::{RuleTree, TaskProperty};
use crate::{ParseError, RegistryError, WeftError};
use scraper::Selector;
use url::Url;

/// Rule names defined by a compiled rule set, or `None` if no such set exists
pub fn builtin_rule_names(name: &str) -> Option<&'static [&'static str]> {
    match name {
        forum::NAME => Some(forum::RULES),
        _ => None,
    }
}

/// Builds the rule tree of a compiled rule set
pub fn builtin_rule_tree(
    name: &str,
    property: &TaskProperty,
    keyword: Option<&str>,
) -> Result<RuleTree, WeftError> {
    match name {
        forum::NAME => Ok(forum::rule_tree(property, keyword)?),
        _ => Err(RegistryError::UnknownBuiltin(name.to_string()).into()),
    }
}

pub(crate) fn compile_selector(selector: &str) -> Result<Selector, ParseError> {
    Selector::parse(selector).map_err(|e| ParseError::Selector {
        selector: selector.to_string(),
        message: format!("{:?}", e),
    })
}

pub(crate) fn parse_base(url: &str) -> Result<Url, ParseError> {
    Url::parse(url).map_err(|e| ParseError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })
}

/// Resolves an href against the page it was found on
///
/// Returns None for:
/// - empty and fragment-only hrefs
/// - javascript:, mailto:, tel: and data: links
/// - anything that is not HTTP(S) after resolution
pub(crate) fn resolve_link(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    match base.join(href) {
        Ok(absolute) if absolute.scheme() == "http" || absolute.scheme() == "https" => {
            Some(absolute.to_string())
        }
        _ => None,
    }
}
