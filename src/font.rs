//! Recovers the real text behind a listing site's obfuscation font.
//!
//! The site serves a fresh font per page whose private-use codepoints point at
//! shuffled glyphs. The glyph order itself is stable: glyph `n` draws
//! `PLAIN_TEXT[n - 2]`. Reading the font's cmap is therefore enough to build a
//! `codepoint -> char` table without rendering anything.

use anyhow::Context;
use flate2::read::ZlibDecoder;
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Read;
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use ttf_parser::{PlatformId, RawFace, Tag, cmap};
use url::Url;

use crate::config::Config;
use crate::error::{CrawlError, CrawlResult};

/// Characters in glyph order, as emitted by the site's font generator.
pub const PLAIN_TEXT: &str = "0123456789一师X会四计财场DHLPT聘招工d周|端p年hx设程二五天tCG前KO网SWcgkosw广市月个BF告NRVZ作bfjnrvz三互生人政AJEI件M行QUYaeim软qU银y联";

/// Glyphs 0 (.notdef) and 1 (.null) precede the alphabet.
pub const GLYPH_INDEX_OFFSET: u16 = 2;

const PRIVATE_USE_START: u32 = 0xE000;
const PRIVATE_USE_END: u32 = 0xF8FF;

const WOFF_SIGNATURE: u32 = 0x774F_4646; // "wOFF"
const WOFF_HEADER_LEN: usize = 44;
const WOFF_ENTRY_LEN: usize = 20;
const SFNT_HEADER_LEN: usize = 12;
const SFNT_ENTRY_LEN: usize = 16;

// Full repertoire first, then BMP-only, then legacy Unicode encodings.
const CMAP_PREFERENCE: [(PlatformId, u16); 7] = [
    (PlatformId::Unicode, 4),
    (PlatformId::Windows, 10),
    (PlatformId::Unicode, 3),
    (PlatformId::Windows, 1),
    (PlatformId::Unicode, 2),
    (PlatformId::Unicode, 1),
    (PlatformId::Unicode, 0),
];

static FONT_SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"src:\s*url\(['"]?([^'"()]+file\?[^'"()]+)['"]?\)"#).expect("valid regex")
});

/// Page-scoped mapping from obfuscated codepoint to real character.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlyphMap {
    entries: HashMap<u32, char>,
}

impl GlyphMap {
    pub fn get(&self, codepoint: u32) -> Option<char> {
        self.entries.get(&codepoint).copied()
    }

    pub fn insert(&mut self, codepoint: u32, c: char) {
        self.entries.insert(codepoint, c);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Finds the obfuscation font's `src: url(...)` inside the page's style text
/// and makes it absolute against `origin`.
pub fn extract_font_url(page_markup: &str, origin: &Url) -> Option<String> {
    let caps = FONT_SRC_RE.captures(page_markup)?;
    let raw = caps.get(1)?.as_str().trim();
    match origin.join(raw) {
        Ok(url) => Some(url.to_string()),
        Err(e) => {
            debug!(font_ref = raw, error = %e, "Unresolvable font reference");
            None
        }
    }
}

/// Anything that can turn a font URL into a glyph map. Implementations never
/// fail: an unusable font yields an empty map.
pub trait GlyphResolver: Send + Sync {
    fn resolve(&self, font_url: &str, referer: &str) -> GlyphMap;
}

/// Downloads fonts over HTTP with the same user-agent the browser presents.
pub struct FontResolver {
    client: reqwest::blocking::Client,
}

impl FontResolver {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.font_connect_timeout())
            .timeout(config.font_connect_timeout() + config.font_read_timeout())
            .build()
            .context("Failed to build font HTTP client")?;
        Ok(Self { client })
    }

    fn download(&self, font_url: &str, referer: &str) -> CrawlResult<Vec<u8>> {
        let response = self
            .client
            .get(font_url)
            .header(reqwest::header::REFERER, referer)
            .send()
            .map_err(CrawlError::font)?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(CrawlError::font(format!(
                "font download returned {}",
                response.status()
            )));
        }

        let bytes = response.bytes().map_err(CrawlError::font)?;
        Ok(bytes.to_vec())
    }
}

impl GlyphResolver for FontResolver {
    fn resolve(&self, font_url: &str, referer: &str) -> GlyphMap {
        match self
            .download(font_url, referer)
            .and_then(|data| glyph_map_from_font(&data))
        {
            Ok(map) => {
                info!(font_url, entries = map.len(), "Built glyph map");
                map
            }
            Err(e) => {
                warn!(font_url, error = %e, "Font resolution failed, decoding disabled");
                GlyphMap::default()
            }
        }
    }
}

/// Builds the glyph map from raw font bytes (WOFF or plain sfnt).
pub fn glyph_map_from_font(data: &[u8]) -> CrawlResult<GlyphMap> {
    let sfnt = woff_to_sfnt(data)?;
    let subtable = unicode_cmap(&sfnt)?;
    let alphabet: Vec<char> = PLAIN_TEXT.chars().collect();

    let mut map = GlyphMap::default();
    for codepoint in PRIVATE_USE_START..=PRIVATE_USE_END {
        let Some(glyph) = subtable.glyph_index(codepoint) else {
            continue;
        };
        let Some(slot) = glyph.0.checked_sub(GLYPH_INDEX_OFFSET) else {
            continue;
        };
        if let Some(c) = alphabet.get(slot as usize) {
            map.insert(codepoint, *c);
        }
    }
    Ok(map)
}

fn unicode_cmap(sfnt: &[u8]) -> CrawlResult<cmap::Subtable<'_>> {
    let face = RawFace::parse(sfnt, 0).map_err(CrawlError::font)?;
    let data = face
        .table(Tag::from_bytes(b"cmap"))
        .ok_or_else(|| CrawlError::font("font has no cmap table"))?;
    let table = cmap::Table::parse(data).ok_or_else(|| CrawlError::font("malformed cmap table"))?;

    let mut subtables: Vec<cmap::Subtable> = (0..table.subtables.len())
        .filter_map(|i| table.subtables.get(i))
        .collect();

    for (platform, encoding) in CMAP_PREFERENCE {
        if let Some(idx) = subtables
            .iter()
            .position(|s| s.platform_id == platform && s.encoding_id == encoding)
        {
            return Ok(subtables.swap_remove(idx));
        }
    }

    subtables
        .into_iter()
        .find(|s| s.is_unicode())
        .ok_or_else(|| CrawlError::font("font has no Unicode cmap subtable"))
}

/// One table as listed in a WOFF directory. `data` holds the decompressed
/// payload once it has been read.
#[derive(Debug, Clone)]
pub struct FontTableEntry {
    pub tag: [u8; 4],
    pub offset: u32,
    pub comp_length: u32,
    pub orig_length: u32,
    pub orig_checksum: u32,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct FontTableDirectory {
    pub flavor: u32,
    pub entries: Vec<FontTableEntry>,
}

/// Expands a WOFF container into a plain sfnt image. Input without the WOFF
/// signature is assumed to already be sfnt and is returned as is.
pub fn woff_to_sfnt(data: &[u8]) -> CrawlResult<Cow<'_, [u8]>> {
    if data.len() < 4 || be_u32(data, 0)? != WOFF_SIGNATURE {
        return Ok(Cow::Borrowed(data));
    }

    let mut directory = read_woff_directory(data)?;
    for entry in &mut directory.entries {
        entry.data = inflate_table(data, entry)?;
    }
    Ok(Cow::Owned(write_sfnt(directory.flavor, &directory.entries)?))
}

fn read_woff_directory(data: &[u8]) -> CrawlResult<FontTableDirectory> {
    if data.len() < WOFF_HEADER_LEN {
        return Err(CrawlError::font("truncated WOFF header"));
    }
    let flavor = be_u32(data, 4)?;
    let num_tables = be_u16(data, 12)? as usize;

    let mut entries = Vec::with_capacity(num_tables);
    for i in 0..num_tables {
        let at = WOFF_HEADER_LEN + i * WOFF_ENTRY_LEN;
        let tag_bytes = data
            .get(at..at + 4)
            .ok_or_else(|| CrawlError::font("truncated WOFF table directory"))?;
        let mut tag = [0u8; 4];
        tag.copy_from_slice(tag_bytes);
        entries.push(FontTableEntry {
            tag,
            offset: be_u32(data, at + 4)?,
            comp_length: be_u32(data, at + 8)?,
            orig_length: be_u32(data, at + 12)?,
            orig_checksum: be_u32(data, at + 16)?,
            data: Vec::new(),
        });
    }
    Ok(FontTableDirectory { flavor, entries })
}

fn inflate_table(woff: &[u8], entry: &FontTableEntry) -> CrawlResult<Vec<u8>> {
    let start = entry.offset as usize;
    let stored = woff
        .get(start..start + entry.comp_length as usize)
        .ok_or_else(|| {
            CrawlError::font(format!("table {} lies outside the file", tag_name(&entry.tag)))
        })?;

    if entry.comp_length == entry.orig_length {
        return Ok(stored.to_vec());
    }

    let mut out = Vec::with_capacity(entry.orig_length as usize);
    ZlibDecoder::new(stored)
        .take(entry.orig_length as u64 + 1)
        .read_to_end(&mut out)
        .map_err(CrawlError::font)?;

    if out.len() != entry.orig_length as usize {
        return Err(CrawlError::font(format!(
            "table {} inflated to {} bytes, expected {}",
            tag_name(&entry.tag),
            out.len(),
            entry.orig_length
        )));
    }
    Ok(out)
}

/// Lays tables out as an sfnt image: header, directory, then each table on a
/// 4-byte boundary. Checksums and lengths are carried over unchanged.
pub fn write_sfnt(flavor: u32, tables: &[FontTableEntry]) -> CrawlResult<Vec<u8>> {
    if tables.is_empty() {
        return Err(CrawlError::font("font has no tables"));
    }
    let num_tables = u16::try_from(tables.len()).map_err(CrawlError::font)?;

    let mut entry_selector: u16 = 0;
    while (1u32 << (entry_selector + 1)) <= num_tables as u32 {
        entry_selector += 1;
    }
    // both fields overflow u16 once a font lists 4096 or more tables
    let search_range = (1u32 << entry_selector) * 16;
    let range_shift = (num_tables as u32 * 16).saturating_sub(search_range);
    let search_range = u16::try_from(search_range).unwrap_or(u16::MAX);
    let range_shift = u16::try_from(range_shift).unwrap_or(u16::MAX);

    let mut offsets = Vec::with_capacity(tables.len());
    let mut cursor = SFNT_HEADER_LEN + tables.len() * SFNT_ENTRY_LEN;
    for table in tables {
        cursor = align4(cursor);
        offsets.push(cursor);
        cursor += table.data.len();
    }

    let mut out = Vec::with_capacity(align4(cursor));
    out.extend_from_slice(&flavor.to_be_bytes());
    out.extend_from_slice(&num_tables.to_be_bytes());
    out.extend_from_slice(&search_range.to_be_bytes());
    out.extend_from_slice(&entry_selector.to_be_bytes());
    out.extend_from_slice(&range_shift.to_be_bytes());

    for (table, offset) in tables.iter().zip(&offsets) {
        out.extend_from_slice(&table.tag);
        out.extend_from_slice(&table.orig_checksum.to_be_bytes());
        out.extend_from_slice(&(*offset as u32).to_be_bytes());
        out.extend_from_slice(&table.orig_length.to_be_bytes());
    }

    for table in tables {
        out.resize(align4(out.len()), 0);
        out.extend_from_slice(&table.data);
    }
    out.resize(align4(out.len()), 0);
    Ok(out)
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

fn tag_name(tag: &[u8; 4]) -> String {
    String::from_utf8_lossy(tag).into_owned()
}

fn be_u16(data: &[u8], at: usize) -> CrawlResult<u16> {
    data.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| CrawlError::font(format!("unexpected end of font data at {}", at)))
}

fn be_u32(data: &[u8], at: usize) -> CrawlResult<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| CrawlError::font(format!("unexpected end of font data at {}", at)))
}
