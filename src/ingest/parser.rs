// src/ingest/parser.rs
//! RSS document → ordered [`RawFeedItem`]s.
//!
//! Two passes over the same reader: a streaming well-formedness scan that also
//! finds the root element, then an event walk over the channel that collects
//! item children by qualified name (`content:encoded`, `dc:creator`,
//! `media:content` keep their prefix). Scalar fields keep their first non-blank
//! occurrence; repeated, nested and unknown elements never fail the document.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use metrics::histogram;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::ingest::error::MalformedFeedError;
use crate::ingest::types::{MediaAttachment, ParsedFeed, RawFeedItem};

/// Item children the walk keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Guid,
    Link,
    Title,
    Description,
    ContentEncoded,
    Content,
    PubDate,
    Author,
    Creator,
    Category,
}

impl Field {
    fn from_name(name: &[u8]) -> Option<Self> {
        Some(match name {
            b"guid" => Self::Guid,
            b"link" => Self::Link,
            b"title" => Self::Title,
            b"description" => Self::Description,
            b"content:encoded" => Self::ContentEncoded,
            b"content" => Self::Content,
            b"pubDate" => Self::PubDate,
            b"author" => Self::Author,
            b"dc:creator" => Self::Creator,
            b"category" => Self::Category,
            _ => return None,
        })
    }
}

fn is_media(name: &[u8]) -> bool {
    matches!(name, b"media:content" | b"media:thumbnail")
}

#[derive(Debug, Default)]
struct ItemBuilder {
    guid: Option<String>,
    link: Option<String>,
    title: Option<String>,
    description: Option<String>,
    content_encoded: Option<String>,
    content: Option<String>,
    pub_date: Option<String>,
    author: Option<String>,
    creator: Option<String>,
    categories: Vec<String>,
    media: Vec<MediaAttachment>,
}

impl ItemBuilder {
    fn slot(&mut self, field: Field) -> Option<&mut Option<String>> {
        match field {
            Field::Guid => Some(&mut self.guid),
            Field::Link => Some(&mut self.link),
            Field::Title => Some(&mut self.title),
            Field::Description => Some(&mut self.description),
            Field::ContentEncoded => Some(&mut self.content_encoded),
            Field::Content => Some(&mut self.content),
            Field::PubDate => Some(&mut self.pub_date),
            Field::Author => Some(&mut self.author),
            Field::Creator => Some(&mut self.creator),
            Field::Category => None,
        }
    }

    fn set(&mut self, field: Field, text: &str) {
        let text = text.trim();
        match self.slot(field) {
            Some(slot) => {
                if slot.is_none() && !text.is_empty() {
                    *slot = Some(text.to_string());
                }
            }
            None => self.categories.push(text.to_string()),
        }
    }

    fn build(self) -> RawFeedItem {
        RawFeedItem {
            guid: self.guid,
            link: self.link,
            title: self.title,
            description: self.description,
            content: first_present([self.content_encoded, self.content]),
            pub_date: self.pub_date,
            author: first_present([self.author, self.creator]),
            categories: (!self.categories.is_empty()).then_some(self.categories),
            media: self.media,
        }
    }
}

/// First alternative that resolved to text.
fn first_present<const N: usize>(alternatives: [Option<String>; N]) -> Option<String> {
    alternatives.into_iter().flatten().next()
}

fn media_of(e: &BytesStart<'_>) -> MediaAttachment {
    let mut media = MediaAttachment::default();
    for attr in e.attributes().flatten() {
        let value = attr.unescape_value().ok().map(Cow::into_owned);
        match attr.key.as_ref() {
            b"url" => media.url = value,
            b"type" => media.media_type = value,
            b"medium" => media.medium = value,
            _ => {}
        }
    }
    media
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Language,
    Item(Field),
}

/// Text being collected for one element, appended only at its own depth.
#[derive(Debug)]
struct Capture {
    target: Target,
    depth: usize,
    text: String,
}

/// HTML named entities that are not XML entities, rewritten before parsing.
const HTML_ONLY_ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", " "),
    ("&ndash;", "&#8211;"),
    ("&mdash;", "&#8212;"),
    ("&ldquo;", "&#8220;"),
    ("&rdquo;", "&#8221;"),
    ("&lsquo;", "&#8216;"),
    ("&rsquo;", "&#8217;"),
    ("&hellip;", "&#8230;"),
];

fn scrub_html_entities_for_xml(s: &str) -> String {
    let mut out = s.trim_start_matches('\u{feff}').to_string();
    for (from, to) in HTML_ONLY_ENTITIES {
        if out.contains(from) {
            out = out.replace(from, to);
        }
    }
    out
}

/// Streaming scan: every event must parse, exactly one root, no stray text.
/// Returns the root element's qualified name.
fn scan_root(xml: &str) -> Result<String, MalformedFeedError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut depth = 0usize;
    let mut root: Option<String> = None;
    loop {
        let ev = reader.read_event().map_err(|e| {
            MalformedFeedError(format!("at byte {}: {e}", reader.buffer_position()))
        })?;
        match &ev {
            Event::Start(e) | Event::Empty(e) if depth == 0 => {
                if root.is_some() {
                    return Err(MalformedFeedError("multiple root elements".into()));
                }
                root = Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                if matches!(ev, Event::Start(_)) {
                    depth += 1;
                }
            }
            Event::Start(_) => depth += 1,
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Text(t) if depth == 0 && !t.iter().all(u8::is_ascii_whitespace) => {
                return Err(MalformedFeedError("text outside the root element".into()));
            }
            Event::CData(_) if depth == 0 => {
                return Err(MalformedFeedError("CDATA outside the root element".into()));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(MalformedFeedError("unexpected end of document".into()));
    }
    root.ok_or_else(|| MalformedFeedError("document has no root element".into()))
}

/// Walk the channel found at `channel_depth` (1 for `<channel>` roots, 2 under
/// `<rss>`), collecting the channel language and its items.
fn walk_channel(xml: &str, channel_depth: usize) -> Result<ParsedFeed, MalformedFeedError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = ParsedFeed::default();
    let mut depth = 0usize;
    let mut in_channel = false;
    let mut item: Option<ItemBuilder> = None;
    let mut capture: Option<Capture> = None;

    loop {
        let ev = reader.read_event().map_err(|e| {
            MalformedFeedError(format!("at byte {}: {e}", reader.buffer_position()))
        })?;
        match &ev {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.name();
                let name = name.as_ref();
                let is_start = matches!(ev, Event::Start(_));

                if depth + 1 == channel_depth && name == b"channel" {
                    in_channel = is_start;
                } else if in_channel && depth == channel_depth {
                    match name {
                        b"item" if is_start => item = Some(ItemBuilder::default()),
                        b"item" => feed.items.push(ItemBuilder::default().build()),
                        b"language" if is_start => {
                            capture = Some(Capture {
                                target: Target::Language,
                                depth: depth + 1,
                                text: String::new(),
                            })
                        }
                        _ => {}
                    }
                } else if depth == channel_depth + 1 {
                    if let Some(it) = item.as_mut() {
                        if is_media(name) {
                            it.media.push(media_of(e));
                        }
                        match Field::from_name(name) {
                            Some(field) if is_start => {
                                capture = Some(Capture {
                                    target: Target::Item(field),
                                    depth: depth + 1,
                                    text: String::new(),
                                })
                            }
                            Some(field) => it.set(field, ""),
                            None => {}
                        }
                    }
                }

                if is_start {
                    depth += 1;
                }
            }
            Event::Text(t) => {
                if let Some(c) = capture.as_mut().filter(|c| c.depth == depth) {
                    match t.unescape() {
                        Ok(s) => c.text.push_str(&s),
                        Err(_) => c.text.push_str(&String::from_utf8_lossy(t)),
                    }
                }
            }
            Event::CData(t) => {
                if let Some(c) = capture.as_mut().filter(|c| c.depth == depth) {
                    c.text.push_str(&String::from_utf8_lossy(t));
                }
            }
            Event::End(_) => {
                if capture.as_ref().is_some_and(|c| c.depth == depth) {
                    if let Some(c) = capture.take() {
                        match c.target {
                            Target::Language => {
                                let lang = c.text.trim();
                                if feed.language.is_none() && !lang.is_empty() {
                                    feed.language = Some(lang.to_string());
                                }
                            }
                            Target::Item(field) => {
                                if let Some(it) = item.as_mut() {
                                    it.set(field, &c.text);
                                }
                            }
                        }
                    }
                } else if depth == channel_depth + 1 {
                    if let Some(it) = item.take() {
                        feed.items.push(it.build());
                    }
                } else if depth == channel_depth {
                    in_channel = false;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(feed)
}

/// Parse a feed document. Fails only when the markup itself is not well-formed.
pub fn parse_feed(raw: &str) -> Result<ParsedFeed, MalformedFeedError> {
    let t0 = std::time::Instant::now();
    let xml = scrub_html_entities_for_xml(raw);
    let root = scan_root(&xml)?;

    let feed = match root.as_str() {
        "rss" => walk_channel(&xml, 2)?,
        "channel" => walk_channel(&xml, 1)?,
        other => {
            tracing::debug!(target: "ingest", root = other, "feed root has no channel; zero items");
            ParsedFeed::default()
        }
    };

    histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(feed)
}

pub fn parse_feed_bytes(raw: &[u8]) -> Result<ParsedFeed, MalformedFeedError> {
    parse_feed(&String::from_utf8_lossy(raw))
}

/// RFC 2822 first (RSS `pubDate`), then RFC 3339. Anything else → `None`.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
