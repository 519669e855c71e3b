/// Streaming RSS/Atom feed parser
use super::{ChannelInfo, FeedFormat, MediaItem, ShortFormClassifier};
use crate::chapters::{parse_timecode, ChapterExtractor};
use crate::{FeedlineError, Result};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::BufRead;
use tracing::{debug, warn};

/// Feed parser producing media items and channel metadata.
///
/// Documents are read as an event stream; nothing is kept beyond the item
/// currently being assembled.
#[derive(Debug, Clone)]
pub struct FeedParser {
    classifier: ShortFormClassifier,
    extractor: ChapterExtractor,
}

impl FeedParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            classifier: ShortFormClassifier::new()?,
            extractor: ChapterExtractor::new()?,
        })
    }

    /// Parse feed items in document order.
    ///
    /// Stops after `item_limit` items. Items published at or before
    /// `published_after` are left out without ending the scan.
    pub fn parse_items<R: BufRead>(
        &self,
        input: R,
        item_limit: Option<usize>,
        published_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<MediaItem>> {
        let scan = self.scan(
            input,
            ScanMode::Items {
                limit: item_limit,
                published_after,
            },
        )?;
        debug!("Parsed {} feed items", scan.items.len());
        Ok(scan.items)
    }

    /// Parse the channel header without collecting items
    pub fn parse_channel_metadata<R: BufRead>(&self, input: R) -> Result<ChannelInfo> {
        let scan = self.scan(input, ScanMode::Channel)?;
        let channel = scan.channel;

        match (channel.title, channel.link) {
            (Some(title), Some(link)) => Ok(ChannelInfo {
                title,
                description: channel.description,
                thumbnail_url: channel.thumbnail_url,
                link,
                channel_id: channel.channel_id,
                feed_url: None,
            }),
            _ => Err(FeedlineError::MetadataNotFound),
        }
    }

    fn scan<R: BufRead>(&self, input: R, mode: ScanMode) -> Result<FeedScan<'_>> {
        let mut reader = Reader::from_reader(input);
        reader.config_mut().trim_text(true);

        let mut scan = FeedScan::new(self, mode);
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => scan.start(&e, false)?,
                Ok(Event::Empty(e)) => scan.start(&e, true)?,
                Ok(Event::Text(e)) => match e.unescape() {
                    Ok(text) => scan.text(&text),
                    Err(error) => scan.unescape_failed(&String::from_utf8_lossy(&e), &error.to_string()),
                },
                Ok(Event::CData(e)) => scan.text(&String::from_utf8_lossy(&e.into_inner())),
                Ok(Event::End(e)) => scan.end(e.name().as_ref()),
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    scan.interrupted(&e.to_string(), reader.buffer_position() as u64)?;
                    break;
                }
            }

            if scan.is_done() {
                break;
            }
            buf.clear();
        }

        if scan.format.is_none() {
            if scan.saw_content {
                return Err(FeedlineError::MalformedDocument(
                    "document has no feed root element".to_string(),
                ));
            }
            debug!("Feed document is empty");
        }
        Ok(scan)
    }
}

#[derive(Debug, Clone, Copy)]
enum ScanMode {
    Items {
        limit: Option<usize>,
        published_after: Option<DateTime<Utc>>,
    },
    Channel,
}

/// Raw item fields as they appear in the document; first occurrence wins
#[derive(Debug, Default)]
struct RawEntry {
    video_id: Option<String>,
    atom_id: Option<String>,
    guid: Option<String>,
    title: Option<String>,
    link: Option<String>,
    media_content_url: Option<String>,
    enclosure_url: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    media_description: Option<String>,
    summary: Option<String>,
    content: Option<String>,
    description: Option<String>,
    content_encoded: Option<String>,
    media_thumbnail: Option<String>,
    itunes_image: Option<String>,
    media_duration: Option<String>,
    yt_duration: Option<String>,
    itunes_duration: Option<String>,
    /// Some text could not be decoded; the item is skipped
    poisoned: bool,
}

#[derive(Debug, Default)]
struct RawChannel {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    thumbnail_url: Option<String>,
    channel_id: Option<String>,
}

/// Event-driven scan state for one document
struct FeedScan<'p> {
    parser: &'p FeedParser,
    mode: ScanMode,
    format: Option<FeedFormat>,
    /// Qualified names of the open elements
    path: Vec<String>,
    text: String,
    /// Non-whitespace text appeared outside any element
    saw_content: bool,
    entry: Option<RawEntry>,
    channel: RawChannel,
    items: Vec<MediaItem>,
}

impl<'p> FeedScan<'p> {
    fn new(parser: &'p FeedParser, mode: ScanMode) -> Self {
        Self {
            parser,
            mode,
            format: None,
            path: Vec::new(),
            text: String::new(),
            saw_content: false,
            entry: None,
            channel: RawChannel::default(),
            items: Vec::new(),
        }
    }

    fn is_done(&self) -> bool {
        match self.mode {
            ScanMode::Items { limit: Some(limit), .. } => {
                self.format.is_some() && self.items.len() >= limit
            }
            _ => false,
        }
    }

    /// Handle a syntax error; fatal only before the root element was seen
    fn interrupted(&mut self, error: &str, position: u64) -> Result<()> {
        if self.format.is_none() {
            return Err(FeedlineError::MalformedDocument(format!(
                "{} at position {}",
                error, position
            )));
        }

        if self.entry.take().is_some() {
            debug!("Dropping incomplete feed item");
        }
        warn!(
            "⚠️ Feed parsing stopped at position {}: {} (kept {} items)",
            position,
            error,
            self.items.len()
        );
        Ok(())
    }

    fn start(&mut self, e: &BytesStart<'_>, empty: bool) -> Result<()> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();

        let Some(format) = self.format else {
            let format = FeedFormat::from_root(e.local_name().as_ref()).ok_or_else(|| {
                FeedlineError::MalformedDocument(format!("unexpected root element <{}>", name))
            })?;
            debug!("Detected {:?} feed", format);
            self.format = Some(format);
            if !empty {
                self.path.push(name);
            }
            return Ok(());
        };

        let collecting = matches!(self.mode, ScanMode::Items { .. });
        if !empty && collecting && self.entry.is_none() && name == format.item_element() {
            self.entry = Some(RawEntry::default());
        } else {
            self.attributes(&name, e);
        }

        if !empty {
            self.path.push(name);
            self.text.clear();
        }
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if self.format.is_none() {
            self.saw_content |= !text.trim().is_empty();
            return;
        }

        // Trimmed neighbours of a CDATA section need a separator
        if !self.text.is_empty()
            && !self.text.ends_with(char::is_whitespace)
            && !text.starts_with(char::is_whitespace)
        {
            self.text.push(' ');
        }
        self.text.push_str(text);
    }

    /// Text with an undecodable entity poisons the open item; outside an
    /// item the raw text is kept
    fn unescape_failed(&mut self, raw: &str, error: &str) {
        match self.entry.as_mut() {
            Some(entry) => {
                if !entry.poisoned {
                    debug!("Feed item has undecodable text: {}", error);
                }
                entry.poisoned = true;
            }
            None => self.text(raw),
        }
    }

    fn end(&mut self, qualified_name: &[u8]) {
        let name = String::from_utf8_lossy(qualified_name);
        let text = std::mem::take(&mut self.text);
        self.path.pop();

        let Some(format) = self.format else {
            return;
        };

        if name == format.item_element() {
            if let Some(entry) = self.entry.take() {
                self.finish_entry(entry, format);
                return;
            }
        }

        let text = text.trim().to_string();
        match self.entry.as_mut() {
            Some(entry) => entry_text(entry, &name, text),
            None => {
                let parent = self.path.last().map(String::as_str).unwrap_or_default();
                channel_text(&mut self.channel, &name, parent, text);
            }
        }
    }

    fn attributes(&mut self, name: &str, e: &BytesStart<'_>) {
        let parent = self.path.last().map(String::as_str).unwrap_or_default();

        if let Some(entry) = self.entry.as_mut() {
            match name {
                "link" => {
                    if let Some(href) = alternate_href(e) {
                        set(&mut entry.link, href);
                    }
                }
                "media:content" => {
                    if let Some(url) = attribute(e, b"url") {
                        set(&mut entry.media_content_url, url);
                    }
                    if let Some(duration) = attribute(e, b"duration") {
                        set(&mut entry.media_duration, duration);
                    }
                }
                "media:thumbnail" => {
                    if let Some(url) = attribute(e, b"url") {
                        set(&mut entry.media_thumbnail, url);
                    }
                }
                "enclosure" => {
                    if let Some(url) = attribute(e, b"url") {
                        set(&mut entry.enclosure_url, url);
                    }
                }
                "yt:duration" => {
                    if let Some(seconds) = attribute(e, b"seconds") {
                        set(&mut entry.yt_duration, seconds);
                    }
                }
                "itunes:image" => {
                    if let Some(href) = attribute(e, b"href") {
                        set(&mut entry.itunes_image, href);
                    }
                }
                _ => {}
            }
            return;
        }

        match (name, parent) {
            ("link", "feed") => {
                if let Some(href) = alternate_href(e) {
                    set(&mut self.channel.link, href);
                }
            }
            ("itunes:image", "channel") | ("media:thumbnail", "channel") => {
                let url = attribute(e, b"href").or_else(|| attribute(e, b"url"));
                if let Some(url) = url {
                    set(&mut self.channel.thumbnail_url, url);
                }
            }
            _ => {}
        }
    }

    fn finish_entry(&mut self, entry: RawEntry, format: FeedFormat) {
        if entry.poisoned {
            warn!("⚠️ Skipping feed item with undecodable text");
            return;
        }

        let item = match self.parser.build_item(entry, format) {
            Ok(item) => item,
            Err(reason) => {
                debug!("Skipping feed item: {}", reason);
                return;
            }
        };

        if let ScanMode::Items {
            published_after: Some(cutoff),
            ..
        } = self.mode
        {
            if item.published <= cutoff {
                debug!("Skipping '{}', published before cutoff", item.title);
                return;
            }
        }

        if item.is_short {
            debug!("Classified '{}' as short", item.title);
        }
        self.items.push(item);
    }
}

impl FeedParser {
    fn build_item(&self, entry: RawEntry, format: FeedFormat) -> std::result::Result<MediaItem, String> {
        let title = entry.title.ok_or("missing title")?;

        let (media_url, id, description) = match format {
            FeedFormat::Atom => (
                entry.link.or(entry.media_content_url),
                entry.video_id.or(entry.atom_id),
                entry.media_description.or(entry.summary).or(entry.content),
            ),
            FeedFormat::Rss => (
                entry.link.or(entry.enclosure_url).or(entry.media_content_url),
                entry.guid,
                entry.description.or(entry.content_encoded).or(entry.media_description),
            ),
        };
        let media_url = media_url.ok_or_else(|| format!("'{}' has no media URL", title))?;

        let published = entry
            .published
            .as_deref()
            .and_then(parse_date)
            .or_else(|| entry.updated.as_deref().and_then(parse_date))
            .ok_or_else(|| format!("'{}' has no valid publish date", title))?;

        let duration = [entry.media_duration, entry.yt_duration, entry.itunes_duration]
            .into_iter()
            .flatten()
            .find_map(|text| parse_duration(&text));

        let classification = self.classifier.classify(&title, description.as_deref());
        let chapters = description
            .as_deref()
            .map(|text| self.extractor.extract(text, duration))
            .unwrap_or_default();

        Ok(MediaItem {
            id: id.unwrap_or_else(|| media_url.clone()),
            title,
            description,
            published,
            duration,
            media_url,
            thumbnail_url: entry.media_thumbnail.or(entry.itunes_image),
            is_short: classification.is_short,
            is_likely_short: classification.is_likely_short,
            chapters,
        })
    }
}

fn entry_text(entry: &mut RawEntry, name: &str, text: String) {
    let slot = match name {
        "yt:videoId" => &mut entry.video_id,
        "id" => &mut entry.atom_id,
        "guid" => &mut entry.guid,
        "title" => &mut entry.title,
        "link" => &mut entry.link,
        "published" | "pubDate" | "dc:date" => &mut entry.published,
        "updated" => &mut entry.updated,
        "media:description" => &mut entry.media_description,
        "summary" => &mut entry.summary,
        "content" => &mut entry.content,
        "description" => &mut entry.description,
        "content:encoded" => &mut entry.content_encoded,
        "itunes:duration" => &mut entry.itunes_duration,
        _ => return,
    };
    set(slot, text);
}

fn channel_text(channel: &mut RawChannel, name: &str, parent: &str, text: String) {
    let slot = match (name, parent) {
        ("title", "channel" | "feed") => &mut channel.title,
        ("link", "channel") => &mut channel.link,
        ("description", "channel") | ("subtitle", "feed") => &mut channel.description,
        ("url", "image") | ("logo" | "icon", "feed") => &mut channel.thumbnail_url,
        ("yt:channelId", "feed") => &mut channel.channel_id,
        _ => return,
    };
    set(slot, text);
}

fn set(slot: &mut Option<String>, value: String) {
    if slot.is_none() && !value.is_empty() {
        *slot = Some(value);
    }
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok().map(|value| value.into_owned()))
}

/// `href` of a link without `rel` or with `rel="alternate"`
fn alternate_href(e: &BytesStart<'_>) -> Option<String> {
    let rel = attribute(e, b"rel");
    if rel.as_deref().map_or(true, |rel| rel == "alternate") {
        attribute(e, b"href")
    } else {
        None
    }
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_rfc2822(text))
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// Seconds, or a `m:s` / `h:m:s` time code
fn parse_duration(text: &str) -> Option<f64> {
    let text = text.trim();
    text.parse::<f64>()
        .ok()
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .or_else(|| parse_timecode(text).ok())
}
