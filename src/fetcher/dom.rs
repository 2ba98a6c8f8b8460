use scraper::{Html, Selector};

/// Elements whose text never shows up in the rendered page
const HIDDEN_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Whitespace-normalized text of the document body, as a reader would see it
pub fn extract_text(html: &str) -> String {
    let doc = Html::parse_document(html);

    let Ok(body) = Selector::parse("body") else {
        return String::new();
    };

    let mut words = Vec::new();
    for root in doc.select(&body) {
        for node in root.descendants() {
            let Some(text) = node.value().as_text() else {
                continue;
            };
            let hidden = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|e| HIDDEN_ELEMENTS.contains(&e.name()))
            });
            if !hidden {
                words.extend(text.split_whitespace());
            }
        }
    }

    words.join(" ")
}

/// `href` attribute of every anchor that has one
pub fn extract_links(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);

    let Ok(anchors) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let links = doc
        .select(&anchors)
        .filter_map(|e| e.value().attr("href"))
        .map(|s| s.to_string())
        .collect::<Vec<String>>();

    ::log::debug!("DOM contains {} anchor hrefs", links.len());
    links
}

/// First `max_chars` characters of `text`, never splitting a code point
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}
