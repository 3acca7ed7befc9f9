use std::collections::HashSet;
use std::sync::LazyLock;

use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use crate::session::Frame;

/// Anchors whose visible text contains this phrase point at bulletin documents.
pub const MARKER: &str = "Documentos adjuntos";

static ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveredDocument {
    pub label: String,
    pub link: Url,
}

/// Collect marker anchors from every frame (page first), keeping the first
/// occurrence of each exact (label, link) pair.
pub fn discover(frames: &[Frame]) -> Vec<DiscoveredDocument> {
    let mut seen = HashSet::new();
    let mut docs = Vec::new();
    let mut total = 0usize;

    for frame in frames {
        let found = marker_anchors(frame);
        debug!(url = %frame.url, anchors = found.len(), "Scanned frame");
        total += found.len();
        for doc in found {
            if seen.insert(doc.clone()) {
                docs.push(doc);
            }
        }
    }

    info!(
        frames = frames.len(),
        matches = total,
        documents = docs.len(),
        "Discovered bulletin documents"
    );
    docs
}

/// Marker anchors of a single frame, hrefs resolved against the frame URL.
/// Anchors without a usable href are ignored.
pub fn marker_anchors(frame: &Frame) -> Vec<DiscoveredDocument> {
    let document = Html::parse_document(&frame.html);
    document
        .select(&ANCHOR_SEL)
        .filter_map(|a| {
            let label = visible_text(&a);
            if !label.contains(MARKER) {
                return None;
            }
            let href = a.value().attr("href")?.trim();
            if href.is_empty() {
                return None;
            }
            let link = frame.url.join(href).ok()?;
            Some(DiscoveredDocument { label, link })
        })
        .collect()
}

/// Element text with runs of whitespace collapsed, roughly what a browser
/// renders for an inline anchor.
fn visible_text(element: &ElementRef<'_>) -> String {
    let mut buf = String::new();
    let mut last_space = false;
    for ch in element.text().flat_map(str::chars) {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str, url: &str) -> Frame {
        Frame {
            url: Url::parse(url).unwrap(),
            html: std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap(),
        }
    }

    fn bulletin_frames() -> Vec<Frame> {
        vec![
            fixture("bulletin", "https://www.pima.go.cr/boletin/"),
            fixture("documentos_frame", "https://www.pima.go.cr/boletin/embed/documentos.html"),
        ]
    }

    #[test]
    fn finds_marker_anchors_with_absolute_links() {
        let page = fixture("bulletin", "https://www.pima.go.cr/boletin/");
        let docs = marker_anchors(&page);
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].label, "Documentos adjuntos 15/06/2024");
        assert_eq!(
            docs[0].link.as_str(),
            "https://www.pima.go.cr/wp-content/uploads/2024/06/boletin-15-06-2024.pdf"
        );
        // Relative and absolute forms of the same document resolve identically.
        assert_eq!(docs[1], docs[2]);
    }

    #[test]
    fn dedups_across_page_and_frames() {
        let docs = discover(&bulletin_frames());
        let pairs: Vec<(&str, &str)> = docs
            .iter()
            .map(|d| (d.label.as_str(), d.link.path()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("Documentos adjuntos 15/06/2024", "/wp-content/uploads/2024/06/boletin-15-06-2024.pdf"),
                ("Documentos adjuntos 22/06/2024", "/wp-content/uploads/2024/06/boletin-22-06-2024.pdf"),
                ("Documentos adjuntos 03/07/2024", "/wp-content/uploads/2024/07/boletin-03-07-2024.pdf"),
            ]
        );
    }

    #[test]
    fn same_link_with_different_label_is_kept() {
        let frame = Frame {
            url: Url::parse("https://www.pima.go.cr/boletin/").unwrap(),
            html: r#"<a href="/a.pdf">Documentos adjuntos</a>
                     <a href="/a.pdf">Documentos adjuntos (copia)</a>
                     <a href="/a.pdf">Documentos adjuntos</a>"#
                .to_string(),
        };
        let docs = discover(&[frame.clone(), frame]);
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn marker_is_case_sensitive_and_anchor_needs_href() {
        let frame = Frame {
            url: Url::parse("https://www.pima.go.cr/boletin/").unwrap(),
            html: r#"<a href="/a.pdf">documentos adjuntos</a><a>Documentos adjuntos</a>"#.to_string(),
        };
        assert!(marker_anchors(&frame).is_empty());
    }

    #[test]
    fn no_matches_is_empty_not_error() {
        let frame = Frame {
            url: Url::parse("https://www.pima.go.cr/boletin/").unwrap(),
            html: "<html><body><p>Sin publicaciones</p></body></html>".to_string(),
        };
        assert!(discover(&[frame]).is_empty());
    }
}
