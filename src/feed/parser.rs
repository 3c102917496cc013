use feed_rs::parser;

use super::{FeedDocument, FetchError, FetchedItem};

/// Parse an RSS, Atom or JSON Feed document.
///
/// Entries keep their document order. An entry without a publisher id gets
/// an empty `guid`, so identity can fall back to its link instead of an id
/// synthesized by the parser.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedDocument, FetchError> {
    let feed = parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
        .parse(bytes)
        .map_err(|e| FetchError::Parse(e.to_string()))?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            // Atom entries may list self/edit/enclosure links ahead of the page
            let link = entry
                .links
                .iter()
                .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
                .or_else(|| entry.links.first())
                .map(|l| l.href.clone());
            let published = entry.published.or(entry.updated);
            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body));

            FetchedItem {
                guid: entry.id.trim().to_string(),
                link,
                title: entry.title.map(|t| t.content),
                description,
                published,
            }
        })
        .collect();

    Ok(FeedDocument {
        title: feed.title.map(|t| t.content),
        items,
    })
}
