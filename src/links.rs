//! Link extraction, filtering and naming.

use regex::Regex;
use reqwest::Url;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::contract::{LinkCandidate, PageSource};
use crate::error::FetchError;

fn anchor_regex() -> &'static Regex {
    static ANCHOR: OnceLock<Regex> = OnceLock::new();
    ANCHOR.get_or_init(|| {
        Regex::new(r#"(?is)<a\s[^>]*?\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))[^>]*>(.*?)</a\s*>"#)
            .expect("anchor pattern is valid")
    })
}

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<[^>]+>").expect("tag pattern is valid"))
}

/// Find every `<a href>` in `html` and resolve it against `base`.
///
/// Fragment-only links and non-http(s) schemes (`mailto:`, `javascript:`) are skipped.
pub fn extract_links(base: &str, html: &str) -> Result<Vec<LinkCandidate>, FetchError> {
    let base_url = Url::parse(base).map_err(|e| FetchError::InvalidUrl {
        url: base.to_string(),
        message: e.to_string(),
    })?;

    let mut links = Vec::new();
    for caps in anchor_regex().captures_iter(html) {
        let href = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().trim())
            .unwrap_or_default();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let mut resolved = match base_url.join(&unescape_entities(href)) {
            Ok(url) => url,
            Err(e) => {
                debug!(href, error = %e, "[FETCH] Skipping unresolvable link");
                continue;
            }
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        resolved.set_fragment(None);

        let inner = caps.get(4).map(|m| m.as_str()).unwrap_or_default();
        let anchor_text = tag_regex().replace_all(inner, "");
        let anchor_text = unescape_entities(anchor_text.split_whitespace().collect::<Vec<_>>().join(" ").as_str());

        links.push(LinkCandidate {
            url: resolved.to_string(),
            anchor_text,
        });
    }
    Ok(links)
}

fn unescape_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Include/exclude pairs on the link URL and on its anchor text.
///
/// An unset include matches everything, an unset exclude matches nothing.
#[derive(Debug, Clone, Default)]
pub struct LinkFilter {
    pub include_href: Option<Regex>,
    pub exclude_href: Option<Regex>,
    pub include_href_anchor: Option<Regex>,
    pub exclude_href_anchor: Option<Regex>,
}

impl LinkFilter {
    pub fn accepts(&self, link: &LinkCandidate) -> bool {
        let included = |re: &Option<Regex>, s: &str| re.as_ref().map_or(true, |re| re.is_match(s));
        let excluded = |re: &Option<Regex>, s: &str| re.as_ref().map_or(false, |re| re.is_match(s));
        included(&self.include_href, &link.url)
            && !excluded(&self.exclude_href, &link.url)
            && included(&self.include_href_anchor, &link.anchor_text)
            && !excluded(&self.exclude_href_anchor, &link.anchor_text)
    }

    /// Filter, de-duplicate by URL (first anchor wins) and sort by URL.
    pub fn select(&self, candidates: Vec<LinkCandidate>) -> Vec<LinkCandidate> {
        let mut unique: BTreeMap<String, LinkCandidate> = BTreeMap::new();
        for link in candidates.into_iter().filter(|l| self.accepts(l)) {
            unique.entry(link.url.clone()).or_insert(link);
        }
        unique.into_values().collect()
    }
}

/// Page listings fetched during one pass, keyed by page URL.
///
/// Created at the start of a pass and dropped at its end, so sections sharing a
/// page fetch it once. Failures are not cached.
#[derive(Debug, Default)]
pub struct PageCache {
    pages: HashMap<String, Vec<LinkCandidate>>,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn links(
        &mut self,
        source: &dyn PageSource,
        url: &str,
    ) -> Result<Vec<LinkCandidate>, FetchError> {
        if let Some(links) = self.pages.get(url) {
            debug!(url, "[FETCH] Page served from pass cache");
            return Ok(links.clone());
        }
        let links = source.links(url).await?;
        self.pages.insert(url.to_string(), links.clone());
        Ok(links)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

fn sanitize_component(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim().trim_matches('.').to_string()
}

/// Render a section's filename template for `link`.
///
/// Placeholders: `{filename}` (last URL path segment), `{path}` (URL path without
/// the leading `/`) and `{anchor}` (anchor text). Returns `None` when the result is
/// empty or would escape the section directory.
pub fn render_filename(template: &str, link: &LinkCandidate) -> Option<String> {
    let url = Url::parse(&link.url).ok()?;
    let path = url.path().trim_start_matches('/');
    let filename = path.rsplit('/').next().unwrap_or_default();

    let rendered = template
        .replace("{filename}", &sanitize_component(filename))
        .replace("{path}", path)
        .replace("{anchor}", &sanitize_component(&link.anchor_text));

    let parts: Vec<&str> = rendered.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() || parts.iter().any(|p| *p == "." || *p == "..") {
        warn!(url = %link.url, template, rendered, "[FETCH] Filename template produced an unusable name");
        return None;
    }
    Some(parts.join("/"))
}
