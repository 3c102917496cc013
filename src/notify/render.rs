use htmlescape::encode_minimal;

use super::Notification;
use crate::feed::FetchedItem;

const UNTITLED: &str = "(untitled)";

/// Build the message announcing `item`.
///
/// The sender's display name is the feed title, or the feed URL when the
/// feed has no title. The item description is passed through as HTML; the
/// title and link are escaped.
pub fn render_notification(
    feed_title: Option<&str>,
    feed_url: &str,
    item: &FetchedItem,
) -> Notification {
    let from_name = feed_title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(feed_url)
        .to_string();

    let subject = item
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNTITLED)
        .to_string();

    let title = encode_minimal(&subject);
    let description = item.description.as_deref().unwrap_or_default();

    let html_body = match item.link.as_deref().filter(|l| !l.trim().is_empty()) {
        Some(link) => format!(
            "<h1><a href=\"{link}\">{title}</a></h1>{description}<p><a href=\"{link}\">{link}</a></p>",
            link = encode_minimal(link),
        ),
        None => format!("<h1>{title}</h1>{description}"),
    };

    Notification {
        from_name,
        subject,
        html_body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn item() -> FetchedItem {
        FetchedItem {
            guid: "guid-1".to_string(),
            link: Some("https://example.com/post?a=1&b=2".to_string()),
            title: Some("Fish & Chips".to_string()),
            description: Some("<p>Tasty</p>".to_string()),
            published: None,
        }
    }

    #[test]
    fn test_render_full_item() {
        let n = render_notification(Some("Food Blog"), "https://example.com/rss", &item());

        assert_eq!(n.from_name, "Food Blog");
        assert_eq!(n.subject, "Fish & Chips");
        assert_eq!(
            n.html_body,
            "<h1><a href=\"https://example.com/post?a=1&amp;b=2\">Fish &amp; Chips</a></h1>\
             <p>Tasty</p>\
             <p><a href=\"https://example.com/post?a=1&amp;b=2\">https://example.com/post?a=1&amp;b=2</a></p>"
        );
    }

    #[test]
    fn test_untitled_feed_uses_url_as_sender() {
        let n = render_notification(None, "https://example.com/rss", &item());
        assert_eq!(n.from_name, "https://example.com/rss");

        let n = render_notification(Some("  "), "https://example.com/rss", &item());
        assert_eq!(n.from_name, "https://example.com/rss");
    }

    #[test]
    fn test_untitled_item() {
        let untitled = FetchedItem {
            title: None,
            ..item()
        };
        let n = render_notification(Some("Food Blog"), "https://example.com/rss", &untitled);
        assert_eq!(n.subject, "(untitled)");
        assert!(n.html_body.contains(">(untitled)</a></h1>"));
    }

    #[test]
    fn test_item_without_link_omits_links() {
        let unlinked = FetchedItem {
            link: None,
            description: None,
            ..item()
        };
        let n = render_notification(Some("Food Blog"), "https://example.com/rss", &unlinked);
        assert_eq!(n.html_body, "<h1>Fish &amp; Chips</h1>");
    }
}
