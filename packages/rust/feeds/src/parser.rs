//! Minimal RSS 2.0 / Atom item extraction.
//!
//! Podcast feeds only need three things per item: a title, a publication
//! date, and an audio enclosure. This parser pulls exactly those out with
//! regular expressions and ignores everything else.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

/// Extensions accepted as audio when an enclosure has no MIME type.
const AUDIO_EXTENSIONS: &[&str] = &[".mp3", ".m4a", ".ogg", ".aac"];

static ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(item|entry)\b[^>]*>(.*?)</(?:item|entry)>").expect("static item regex")
});

static TAG_ATTRS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(enclosure|link)\b([^>]*)/?>").expect("static enclosure regex")
});

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z:_-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("static attr regex")
});

/// One feed item, reduced to the fields the pipeline uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub title: String,
    /// Publication date normalised to UTC.
    pub published: Option<NaiveDate>,
    pub audio_url: Option<String>,
}

/// Parse every `<item>` (RSS) or `<entry>` (Atom) in `xml`.
pub fn parse_feed(xml: &str) -> Vec<Episode> {
    ITEM_RE
        .captures_iter(xml)
        .filter_map(|caps| caps.get(2))
        .map(|body| parse_item(body.as_str()))
        .collect()
}

fn parse_item(body: &str) -> Episode {
    let title = element_text(body, "title").unwrap_or_default();
    let published = ["pubDate", "published", "updated", "dc:date"]
        .iter()
        .find_map(|tag| element_text(body, tag))
        .and_then(|raw| parse_pub_date(&raw));

    Episode {
        title,
        published,
        audio_url: audio_enclosure(body),
    }
}

/// Text content of the first `<tag>` element, CDATA unwrapped and entities decoded.
fn element_text(body: &str, tag: &str) -> Option<String> {
    let re = Regex::new(&format!(
        r"(?is)<{tag}\b[^>]*>(.*?)</{tag}>",
        tag = regex::escape(tag)
    ))
    .ok()?;
    let raw = re.captures(body)?.get(1)?.as_str().trim();
    let raw = raw
        .strip_prefix("<![CDATA[")
        .and_then(|s| s.strip_suffix("]]>"))
        .unwrap_or(raw);
    let text = decode_entities(raw.trim());
    (!text.is_empty()).then_some(text)
}

/// First audio enclosure: `<enclosure type="audio/...">`, then
/// `<link rel="enclosure">` whose type or extension looks like audio.
fn audio_enclosure(body: &str) -> Option<String> {
    let mut fallback = None;

    for caps in TAG_ATTRS_RE.captures_iter(body) {
        let tag = caps.get(1).map(|m| m.as_str().to_ascii_lowercase());
        let attrs = attributes(caps.get(2).map_or("", |m| m.as_str()));
        let get = |name: &str| {
            attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        };
        let mime = get("type").unwrap_or_default();

        match tag.as_deref() {
            Some("enclosure") => {
                let Some(url) = get("url").or_else(|| get("href")) else {
                    continue;
                };
                if mime.contains("audio") {
                    return Some(url.to_string());
                }
                if fallback.is_none() && looks_like_audio(url) {
                    fallback = Some(url.to_string());
                }
            }
            Some("link") if get("rel") == Some("enclosure") => {
                let Some(url) = get("href") else { continue };
                if fallback.is_none() && (mime.contains("audio") || looks_like_audio(url)) {
                    fallback = Some(url.to_string());
                }
            }
            _ => {}
        }
    }

    fallback
}

fn attributes(raw: &str) -> Vec<(String, String)> {
    ATTR_RE
        .captures_iter(raw)
        .filter_map(|c| {
            let key = c.get(1)?.as_str().to_string();
            let value = c.get(2).or_else(|| c.get(3))?.as_str();
            Some((key, decode_entities(value)))
        })
        .collect()
}

fn looks_like_audio(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    AUDIO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// RFC 2822 (RSS) or RFC 3339 (Atom) date, converted to a UTC calendar date.
pub fn parse_pub_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc).date_naive())
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Morning Call</title>
    <item>
      <title><![CDATA[EP120 | Rates &amp; chips]]></title>
      <pubDate>Tue, 24 Feb 2026 22:30:00 -0800</pubDate>
      <enclosure url="https://cdn.example.com/ep120.mp3?token=a&amp;b=1" length="1" type="audio/mpeg"/>
    </item>
    <item>
      <title>Trailer</title>
      <pubDate>Mon, 02 Feb 2026 08:00:00 +0800</pubDate>
      <enclosure url="https://cdn.example.com/trailer.jpg" type="image/jpeg"/>
    </item>
    <item>
      <title>No date</title>
      <enclosure url="https://cdn.example.com/x.m4a"/>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_rss_items() {
        let episodes = parse_feed(RSS);
        assert_eq!(episodes.len(), 3);

        assert_eq!(episodes[0].title, "EP120 | Rates & chips");
        // 22:30 PST is the next day in UTC.
        assert_eq!(episodes[0].published, NaiveDate::from_ymd_opt(2026, 2, 25));
        assert_eq!(
            episodes[0].audio_url.as_deref(),
            Some("https://cdn.example.com/ep120.mp3?token=a&b=1")
        );

        assert_eq!(episodes[1].audio_url, None);
        assert_eq!(episodes[2].published, None);
        assert_eq!(episodes[2].audio_url.as_deref(), Some("https://cdn.example.com/x.m4a"));
    }

    #[test]
    fn parses_atom_entries() {
        let atom = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <title>Weekly wrap</title>
    <updated>2026-02-20T10:00:00Z</updated>
    <link rel="alternate" href="https://example.com/post"/>
    <link rel="enclosure" type="audio/mp4" href="https://cdn.example.com/wrap.m4a"/>
  </entry>
</feed>"#;
        let episodes = parse_feed(atom);
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].published, NaiveDate::from_ymd_opt(2026, 2, 20));
        assert_eq!(
            episodes[0].audio_url.as_deref(),
            Some("https://cdn.example.com/wrap.m4a")
        );
    }

    #[test]
    fn garbage_yields_no_items() {
        assert!(parse_feed("<html><body>nope</body></html>").is_empty());
        assert_eq!(parse_pub_date("yesterday"), None);
    }
}
