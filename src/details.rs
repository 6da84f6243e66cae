//! # Song Details Module
//!
//! Looks up background blurbs for a song, its artist and its album so the
//! intro prompt has something to talk about.
//!
//! ## Lookup Chain
//!
//! Each subject goes through the same chain until one source answers:
//!
//! ```text
//! Wikipedia search → REST summary (first 3 hits, skipping disambiguation)
//!        ↓ nothing
//! Last.fm +wiki page → og:description
//!        ↓ nothing
//! AllMusic search → first matching detail page → meta description
//!        ↓ nothing
//! placeholder text + AllMusic search link
//! ```
//!
//! Compilation albums are not looked up; their album pages rarely say
//! anything about the individual track.
//!
//! All HTTP goes through the [`WebClient`] trait so the chain can be tested
//! with canned pages.

use crate::song::Song;
use anyhow::{Context, Result};
use lazy_static::lazy_static;
use log::{debug, info, warn};
use rand::Rng;
use regex::{Regex, RegexBuilder};
use reqwest::Url;
use serde::Deserialize;
use std::cell::Cell;
use std::time::Duration;

pub const NO_SUMMARY: &str = "No Wikipedia, Last.fm, or AllMusic summary available.";
const USER_AGENT: &str = "Mozilla/5.0";

lazy_static! {
    static ref FEAT_RE: Regex = RegexBuilder::new(r"\(feat.*?\)")
        .case_insensitive(true)
        .build()
        .expect("static feat pattern");
    static ref NON_ALNUM_RE: Regex = Regex::new(r"[^a-zA-Z0-9\s]").expect("static alnum pattern");
    static ref OG_DESCRIPTION_RE: Regex =
        RegexBuilder::new(r#"<meta property="og:description" content="(.*?)""#)
        .case_insensitive(true)
        .build()
        .expect("static og pattern");
    static ref META_DESCRIPTION_RE: Regex =
        RegexBuilder::new(r#"<meta name="description" content="(.*?)""#)
        .case_insensitive(true)
        .build()
        .expect("static meta pattern");
    static ref ALLMUSIC_LINK_RE: Regex =
        RegexBuilder::new(r#"href="(https://www\.allmusic\.com/(song|album|artist)/[^"]+)""#)
        .case_insensitive(true)
        .build()
        .expect("static allmusic pattern");
    static ref NUMERIC_ENTITY_RE: Regex =
        Regex::new(r"&#(x?)([0-9a-fA-F]+);").expect("static entity pattern");
}

/// Minimal HTTP surface used by the lookups.
pub trait WebClient: Send + Sync {
    /// GET a page as text. `Ok(None)` for non-200 responses.
    fn get_text(&self, url: &str) -> Result<Option<String>>;
}

/// Blocking `reqwest` client with a short timeout.
pub struct HttpClient {
    client: reqwest::blocking::Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl WebClient for HttpClient {
    fn get_text(&self, url: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("GET {url} failed"))?;
        if response.status() != reqwest::StatusCode::OK {
            debug!("GET {url} returned {}", response.status());
            return Ok(None);
        }
        Ok(Some(response.text().with_context(|| format!("Reading body of {url} failed"))?))
    }
}

/// What a blurb describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    Song,
    Album,
    Artist,
}

impl LookupKind {
    fn as_str(self) -> &'static str {
        match self {
            LookupKind::Song => "song",
            LookupKind::Album => "album",
            LookupKind::Artist => "artist",
        }
    }
}

/// A summary together with the page it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blurb {
    pub url: String,
    pub summary: String,
}

/// Tag data plus whatever the web had to say.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongDetails {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub is_compilation: bool,
    pub song: Option<Blurb>,
    pub artist_info: Option<Blurb>,
    pub album_info: Option<Blurb>,
}

impl SongDetails {
    /// Details with no blurbs yet.
    pub fn new(song: &Song) -> Self {
        Self {
            title: song.title.clone(),
            artist: song.artist.clone(),
            album: song.album.clone(),
            is_compilation: song.is_compilation,
            song: None,
            artist_info: None,
            album_info: None,
        }
    }

    /// Formatted sections for the intro prompt.
    pub fn results(&self) -> String {
        let mut out = Vec::new();
        let sections = [
            ("Artist", &self.artist, &self.artist_info),
            ("Album", &self.album, &self.album_info),
            ("Song", &self.title, &self.song),
        ];
        for (label, name, blurb) in sections {
            if let Some(b) = blurb {
                out.push(format!("\n{label}: {name}"));
                out.push(b.url.clone());
                out.push(format!("Summary:\n{}...", b.summary));
            }
        }
        if out.is_empty() {
            out.push("No relevant Wikipedia pages found.".to_string());
        }
        out.join("\n")
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(rename = "type")]
    kind: Option<String>,
    title: Option<String>,
    extract: Option<String>,
    content_urls: Option<ContentUrls>,
}

#[derive(Debug, Deserialize)]
struct ContentUrls {
    desktop: Option<PageUrls>,
}

#[derive(Debug, Deserialize)]
struct PageUrls {
    page: Option<String>,
}

/// Runs the lookup chain against a [`WebClient`].
pub struct DetailsFetcher<'a> {
    client: &'a dyn WebClient,
    max_delay: Duration,
    responses: Cell<usize>,
    failures: Cell<usize>,
}

impl<'a> DetailsFetcher<'a> {
    pub fn new(client: &'a dyn WebClient) -> Self {
        Self {
            client,
            max_delay: Duration::from_secs(1),
            responses: Cell::new(0),
            failures: Cell::new(0),
        }
    }

    /// Upper bound of the random pause before each Wikipedia call.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Fill in song, artist and album blurbs.
    ///
    /// # Errors
    ///
    /// Returns an error only when every request failed at the transport level,
    /// which usually means the machine is offline.
    pub fn fetch(&self, song: &Song) -> Result<SongDetails> {
        let mut details = SongDetails::new(song);
        let title = clean_title(&song.title);
        let artist = song.artist.as_str();
        info!("Searching the web for '{}' by '{}'", song.title, artist);

        details.song = self
            .search_wikipedia(&format!("{title} song by {artist}"))
            .or_else(|| self.fetch_lastfm_wiki(artist, &title, LookupKind::Song))
            .or_else(|| {
                self.fetch_allmusic_description(&format!("{artist} {title}"), LookupKind::Song)
            })
            .or_else(|| Some(placeholder(&format!("{artist} {} song", song.title))));

        details.artist_info = self
            .search_wikipedia(&format!("the artist {artist}"))
            .or_else(|| self.search_wikipedia(artist))
            .or_else(|| self.fetch_lastfm_wiki(artist, artist, LookupKind::Artist))
            .or_else(|| self.fetch_allmusic_description(artist, LookupKind::Artist))
            .or_else(|| Some(placeholder(artist)));

        if song.is_compilation {
            info!("Skipping album lookup for '{}' (compilation)", song.album);
        } else {
            let album = song.album.as_str();
            details.album_info = self
                .search_wikipedia(&format!("{album} album by {artist}"))
                .or_else(|| self.fetch_lastfm_wiki(artist, album, LookupKind::Album))
                .or_else(|| {
                    self.fetch_allmusic_description(&format!("{artist} {album}"), LookupKind::Album)
                })
                .or_else(|| Some(placeholder(&format!("{artist} {album} album"))));
        }

        if self.responses.get() == 0 && self.failures.get() > 0 {
            anyhow::bail!(
                "All {} web lookups failed; is the network available?",
                self.failures.get()
            );
        }
        Ok(details)
    }

    fn get(&self, url: &str) -> Option<String> {
        match self.client.get_text(url) {
            Ok(body) => {
                self.responses.set(self.responses.get() + 1);
                body
            }
            Err(e) => {
                self.failures.set(self.failures.get() + 1);
                debug!("Lookup request failed: {e:#}");
                None
            }
        }
    }

    fn polite_pause(&self) {
        if self.max_delay.is_zero() {
            return;
        }
        let millis = rand::thread_rng().gen_range(0..self.max_delay.as_millis().max(1) as u64);
        std::thread::sleep(Duration::from_millis(millis));
    }

    /// Best Wikipedia match for a free-text query.
    pub fn search_wikipedia(&self, query: &str) -> Option<Blurb> {
        debug!("Searching wikipedia: query='{query}'");
        let url = Url::parse_with_params(
            "https://en.wikipedia.org/w/api.php",
            &[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", "5"),
                ("format", "json"),
            ],
        )
        .ok()?;

        self.polite_pause();
        let payload = self.get(url.as_str())?;
        let titles: Vec<String> = match serde_json::from_str::<SearchResponse>(&payload) {
            Ok(resp) => resp
                .query
                .map(|q| q.search.into_iter().filter_map(|h| h.title).collect())
                .unwrap_or_default(),
            Err(e) => {
                debug!("Wikipedia search JSON parse error: {e}");
                return None;
            }
        };

        titles
            .iter()
            .take(3)
            .find_map(|title| self.fetch_wikipedia_summary(title))
    }

    fn fetch_wikipedia_summary(&self, title: &str) -> Option<Blurb> {
        let url = url_with_segments("https://en.wikipedia.org/api/rest_v1/page/summary", &[title])?;
        self.polite_pause();
        let payload = self.get(&url)?;
        let data: SummaryResponse = match serde_json::from_str(&payload) {
            Ok(d) => d,
            Err(e) => {
                debug!("Wikipedia summary JSON parse error for {title}: {e}");
                return None;
            }
        };

        if data.kind.as_deref() == Some("disambiguation") {
            return None;
        }
        let extract = data.extract.filter(|e| !e.trim().is_empty())?;
        let page_title = data.title.unwrap_or_else(|| title.to_string());
        let page_url = data
            .content_urls
            .and_then(|c| c.desktop)
            .and_then(|d| d.page)
            .or_else(|| {
                url_with_segments("https://en.wikipedia.org/wiki", &[&page_title.replace(' ', "_")])
            })?;

        let summary = clean_summary(&extract);
        debug!("Summary for {title}: {}", summary.chars().take(100).collect::<String>());
        Some(Blurb { url: page_url, summary })
    }

    /// Last.fm wiki description, read from the OpenGraph tag.
    pub fn fetch_lastfm_wiki(
        &self,
        artist: &str,
        subject: &str,
        kind: LookupKind,
    ) -> Option<Blurb> {
        let segments: Vec<&str> = match kind {
            LookupKind::Song => vec![artist, "_", subject, "+wiki"],
            LookupKind::Album => vec![artist, subject, "+wiki"],
            LookupKind::Artist => vec![artist, "+wiki"],
        };
        let url = url_with_segments("https://www.last.fm/music", &segments)?;
        let html = self.get(&url)?;
        let desc = capture_description(&OG_DESCRIPTION_RE, &html)?;
        Some(Blurb { url, summary: clean_summary(&desc) })
    }

    /// AllMusic search, following the first result of the right kind.
    pub fn fetch_allmusic_description(&self, query: &str, kind: LookupKind) -> Option<Blurb> {
        let search_url = allmusic_search_link(query);
        let html = self.get(&search_url)?;
        let marker = format!("/{}/", kind.as_str());

        let detail_url = ALLMUSIC_LINK_RE
            .captures_iter(&html)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .find(|url| url.contains(&marker))?;

        let detail = self.get(&detail_url)?;
        let desc = capture_description(&META_DESCRIPTION_RE, &detail)
            .or_else(|| capture_description(&OG_DESCRIPTION_RE, &detail))?;
        Some(Blurb { url: detail_url, summary: clean_summary(&desc) })
    }
}

fn placeholder(query: &str) -> Blurb {
    warn!("No web summary found for '{query}'");
    Blurb {
        url: allmusic_search_link(query),
        summary: NO_SUMMARY.to_string(),
    }
}

fn capture_description(re: &Regex, html: &str) -> Option<String> {
    let raw = re.captures(html)?.get(1)?.as_str();
    let desc = decode_html_entities(raw).replace('\n', " ").trim().to_string();
    (!desc.is_empty()).then_some(desc)
}

fn url_with_segments(base: &str, segments: &[&str]) -> Option<String> {
    let mut url = Url::parse(base).ok()?;
    url.path_segments_mut().ok()?.extend(segments);
    Some(url.to_string())
}

/// AllMusic search page for a query. Also used as the "see more" link.
pub fn allmusic_search_link(query: &str) -> String {
    url_with_segments("https://www.allmusic.com/search/all", &[query])
        .unwrap_or_else(|| "https://www.allmusic.com/".to_string())
}

/// Drop `(feat. ...)` and anything that is not a letter, digit or space.
pub fn clean_title(title: &str) -> String {
    let without_feat = FEAT_RE.replace_all(title, "");
    NON_ALNUM_RE.replace_all(&without_feat, "").trim().to_string()
}

/// Bullet each paragraph with `* `.
pub fn clean_summary(summary: &str) -> String {
    let paragraphs: Vec<&str> = summary.trim().split('\n').collect();
    format!("* {}", paragraphs.join("\n* ")).trim().to_string()
}

/// Decode the handful of HTML entities that show up in meta descriptions.
pub fn decode_html_entities(text: &str) -> String {
    let numeric = NUMERIC_ENTITY_RE.replace_all(text, |caps: &regex::Captures| {
        let radix = if caps[1].is_empty() { 10 } else { 16 };
        u32::from_str_radix(&caps[2], radix)
            .ok()
            .and_then(char::from_u32)
            .map(|c| c.to_string())
            .unwrap_or_else(|| caps[0].to_string())
    });
    numeric
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
