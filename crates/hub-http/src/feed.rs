//! Hub/self link-relation extraction from HTTP `Link` headers and from
//! Atom, RSS, and HTML bodies.

use scraper::{Html, Selector};
use url::Url;

use crate::error::Error;

/// One `rel="..."` link relation, resolved against the page/feed's base
/// URL where the source provides a relative `href`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRelation {
    pub rel: String,
    pub href: Url,
}

impl LinkRelation {
    pub fn is_hub(&self) -> bool {
        self.rel.split_ascii_whitespace().any(|r| r == "hub")
    }

    pub fn is_self(&self) -> bool {
        self.rel.split_ascii_whitespace().any(|r| r == "self")
    }
}

/// Parses an HTTP `Link` header value: comma-separated `<url>; rel="x"`
/// segments (RFC 8288), relative to `base`.
pub fn parse_link_header(value: &str, base: &Url) -> Vec<LinkRelation> {
    let mut relations = Vec::new();

    for segment in value.split(',') {
        let segment = segment.trim();
        let Some(url_end) = segment.find('>') else {
            continue;
        };
        let Some(url_text) = segment.get(1..url_end) else {
            continue;
        };
        let Ok(href) = base.join(url_text) else {
            continue;
        };

        for param in segment[url_end + 1..].split(';') {
            let param = param.trim();
            let Some(rel_value) = param.strip_prefix("rel=") else {
                continue;
            };
            let rel = rel_value.trim_matches('"').to_owned();
            relations.push(LinkRelation {
                rel,
                href: href.clone(),
            });
        }
    }

    relations
}

/// Extracts link relations from a feed/page body, dispatching on
/// `content_type`'s subtype: `xml`/`atom+xml`/`rss+xml` are parsed as
/// XML (`<link rel="..." href="...">`, including the RSS
/// `<atom:link>` convention; `quick_xml` strips the namespace prefix
/// via `local_name()` so both forms match one code path), `html` via
/// `scraper`. An unrecognized or absent content type falls back to
/// sniffing the first non-whitespace byte.
pub fn extract_link_relations(
    content_type: Option<&str>,
    body: &str,
    base: &Url,
) -> Result<Vec<LinkRelation>, Error> {
    let looks_like_xml = body.trim_start().starts_with('<') && {
        let head = body.trim_start();
        head.starts_with("<?xml") || head.starts_with("<feed") || head.starts_with("<rss")
    };

    let is_html = content_type
        .map(|ct| ct.contains("html"))
        .unwrap_or(!looks_like_xml);

    if is_html {
        Ok(extract_from_html(body, base))
    } else {
        extract_from_xml(body, base)
    }
}

fn extract_from_html(body: &str, base: &Url) -> Vec<LinkRelation> {
    let document = Html::parse_document(body);
    let selector = match Selector::parse("link[rel]") {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };

    document
        .select(&selector)
        .filter_map(|element| {
            let rel = element.value().attr("rel")?.to_owned();
            let href_text = element.value().attr("href")?;
            let href = base.join(href_text).ok()?;
            Some(LinkRelation { rel, href })
        })
        .collect()
}

fn extract_from_xml(body: &str, base: &Url) -> Result<Vec<LinkRelation>, Error> {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut relations = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(tag) | Event::Empty(tag) => {
                if tag.local_name().as_ref() != b"link" {
                    continue;
                }

                let mut rel = None;
                let mut href = None;

                for attribute in tag.attributes().flatten() {
                    match attribute.key.local_name().as_ref() {
                        b"rel" => rel = attribute.unescape_value().ok().map(|v| v.into_owned()),
                        b"href" => href = attribute.unescape_value().ok().map(|v| v.into_owned()),
                        _ => {}
                    }
                }

                if let (Some(rel), Some(href_text)) = (rel, href) {
                    if let Ok(href) = base.join(&href_text) {
                        relations.push(LinkRelation { rel, href });
                    }
                }
            }
            _ => {}
        }
    }

    Ok(relations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        "https://example.com/feed".parse().unwrap()
    }

    #[test]
    fn parses_link_header_with_multiple_segments() {
        let value = r#"<https://hub.example.com/>; rel="hub", <https://example.com/feed>; rel="self""#;
        let relations = parse_link_header(value, &base());

        assert_eq!(relations.len(), 2);
        assert!(relations[0].is_hub());
        assert!(relations[1].is_self());
    }

    #[test]
    fn extracts_atom_link_relations() {
        let body = r#"<?xml version="1.0"?>
            <feed xmlns="http://www.w3.org/2005/Atom">
                <link rel="hub" href="https://hub.example.com/"/>
                <link rel="self" href="/feed"/>
            </feed>"#;

        let relations = extract_link_relations(Some("application/atom+xml"), body, &base())
            .expect("parses");
        assert_eq!(relations.len(), 2);
        assert!(relations.iter().any(|r| r.is_hub()));
        assert!(relations
            .iter()
            .any(|r| r.is_self() && r.href == base()));
    }

    #[test]
    fn extracts_rss_atom_namespaced_link() {
        let body = r#"<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
            <channel>
                <atom:link rel="hub" href="https://hub.example.com/"/>
            </channel>
        </rss>"#;

        let relations =
            extract_link_relations(Some("application/rss+xml"), body, &base()).expect("parses");
        assert!(relations.iter().any(|r| r.is_hub()));
    }

    #[test]
    fn extracts_html_link_relations() {
        let body = r#"<html><head><link rel="hub" href="https://hub.example.com/"></head></html>"#;
        let relations = extract_link_relations(Some("text/html"), body, &base()).expect("parses");
        assert!(relations.iter().any(|r| r.is_hub()));
    }
}
