use mockall::predicate::eq;
use regex::Regex;

use web_mirror::contract::{LinkCandidate, MockPageSource};
use web_mirror::links::{extract_links, render_filename, LinkFilter, PageCache};

const PAGE: &str = r##"
<html><body>
  <a href="b.txt">Second</a>
  <A HREF='a.txt' class="x"><b>First</b> &amp; best</A>
  <a href="/other/c.tar.gz#section">Archive</a>
  <a href="mailto:someone@site.test">mail</a>
  <a href="#top">top</a>
  <a href="b.txt">Duplicate</a>
</body></html>
"##;

fn link(url: &str, anchor: &str) -> LinkCandidate {
    LinkCandidate {
        url: url.to_string(),
        anchor_text: anchor.to_string(),
    }
}

#[test]
fn links_are_resolved_against_the_page() {
    let links = extract_links("http://site.test/data/index.html", PAGE).unwrap();
    let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "http://site.test/data/b.txt",
            "http://site.test/data/a.txt",
            "http://site.test/other/c.tar.gz",
            "http://site.test/data/b.txt",
        ]
    );
    assert_eq!(links[1].anchor_text, "First & best");
}

#[test]
fn select_filters_dedupes_and_sorts() {
    let links = extract_links("http://site.test/data/", PAGE).unwrap();
    let filter = LinkFilter {
        exclude_href: Some(Regex::new(r"\.tar\.gz$").unwrap()),
        ..LinkFilter::default()
    };
    let selected = filter.select(links);
    assert_eq!(
        selected,
        vec![
            link("http://site.test/data/a.txt", "First & best"),
            link("http://site.test/data/b.txt", "Second"),
        ]
    );
}

#[test]
fn anchor_filters_apply_to_link_text() {
    let filter = LinkFilter {
        include_href_anchor: Some(Regex::new("(?i)archive").unwrap()),
        ..LinkFilter::default()
    };
    assert!(filter.accepts(&link("http://x/1.tgz", "Archive one")));
    assert!(!filter.accepts(&link("http://x/1.txt", "Text")));

    let filter = LinkFilter {
        exclude_href_anchor: Some(Regex::new("old").unwrap()),
        ..LinkFilter::default()
    };
    assert!(!filter.accepts(&link("http://x/1.tgz", "old release")));
}

#[test]
fn filename_templates() {
    let l = link("http://site.test/pub/v1/data.tar.gz", "Release: 1/2");
    assert_eq!(render_filename("{filename}", &l).as_deref(), Some("data.tar.gz"));
    assert_eq!(render_filename("{path}", &l).as_deref(), Some("pub/v1/data.tar.gz"));
    assert_eq!(render_filename("{anchor}.tgz", &l).as_deref(), Some("Release_ 1_2.tgz"));
    assert_eq!(render_filename("{filename}", &link("http://site.test/dir/", "d")), None);
    assert_eq!(render_filename("../{filename}", &l), None);
}

#[tokio::test]
async fn page_cache_fetches_each_page_once() {
    let mut source = MockPageSource::new();
    source
        .expect_links()
        .with(eq("http://site.test/data/"))
        .times(1)
        .returning(|_| Ok(vec![link("http://site.test/data/a.txt", "a")]));

    let mut cache = PageCache::new();
    let first = cache.links(&source, "http://site.test/data/").await.unwrap();
    let second = cache.links(&source, "http://site.test/data/").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(cache.len(), 1);
}
