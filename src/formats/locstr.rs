//! `LocStr` XML string tables, the reference corpus format.
//!
//! Each file holds `<LocStr StringId=".." StrOrigin=".." Str=".."/>` elements
//! under any root. Element and attribute names are matched case-insensitively.
//! Every `LocStr` element counts towards the position of the next one, even
//! when its attributes are missing, so positions line up with write-back.

use std::{
    collections::BTreeMap,
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

use quick_xml::{
    Reader, Writer,
    escape::resolve_html5_entity,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event, attributes::Attribute},
};
use serde::Serialize;
use walkdir::WalkDir;

use crate::{
    error::Error,
    index::{CorpusFile, CorpusReader},
    merge::{EntryUpdate, WriteBack},
    traits::{Parser, read_decoded},
    types::RawEntry,
};

const ELEMENT: &[u8] = b"LocStr";
const ATTR_STRING_ID: &[u8] = b"StringId";
const ATTR_STR_ORIGIN: &[u8] = b"StrOrigin";
const ATTR_STR: &[u8] = b"Str";

/// One parsed string table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocStrFile {
    pub entries: Vec<RawEntry>,
}

impl LocStrFile {
    pub fn into_raw_entries(self) -> Vec<RawEntry> {
        self.entries
    }
}

impl Parser for LocStrFile {
    fn from_reader<R: BufRead>(reader: R) -> Result<Self, Error> {
        let mut xml_reader = Reader::from_reader(reader);
        xml_reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut entries = Vec::new();
        loop {
            match xml_reader.read_event_into(&mut buf)? {
                Event::Start(ref e) | Event::Empty(ref e) if is_locstr(e) => {
                    entries.push(parse_locstr(e)?);
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        Ok(LocStrFile { entries })
    }

    fn to_writer<W: Write>(&self, mut writer: W) -> Result<(), Error> {
        let mut xml_writer = Writer::new(&mut writer);

        xml_writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        xml_writer.write_event(Event::Text(BytesText::new("\n")))?;
        xml_writer.write_event(Event::Start(BytesStart::new("LanguageData")))?;
        xml_writer.write_event(Event::Text(BytesText::new("\n")))?;

        for entry in &self.entries {
            let mut elem = BytesStart::new("LocStr");
            elem.push_attribute(("StringId", entry.string_id.as_str()));
            elem.push_attribute(("StrOrigin", entry.str_origin.as_str()));
            elem.push_attribute(("Str", entry.str_value.as_str()));
            xml_writer.write_event(Event::Text(BytesText::new("  ")))?;
            xml_writer.write_event(Event::Empty(elem))?;
            xml_writer.write_event(Event::Text(BytesText::new("\n")))?;
        }

        xml_writer.write_event(Event::End(BytesEnd::new("LanguageData")))?;
        xml_writer.write_event(Event::Text(BytesText::new("\n")))?;
        Ok(())
    }
}

fn is_locstr(e: &BytesStart) -> bool {
    e.local_name().as_ref().eq_ignore_ascii_case(ELEMENT)
}

fn key_is(attr: &Attribute, name: &[u8]) -> bool {
    attr.key.local_name().as_ref().eq_ignore_ascii_case(name)
}

fn attr_value(attr: &Attribute) -> Result<String, Error> {
    let value = attr
        .unescape_value_with(resolve_html5_entity)
        .map_err(quick_xml::Error::from)?;
    Ok(value.into_owned())
}

fn parse_locstr(e: &BytesStart) -> Result<RawEntry, Error> {
    let mut entry = RawEntry::default();
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        if key_is(&attr, ATTR_STRING_ID) {
            entry.string_id = attr_value(&attr)?;
        } else if key_is(&attr, ATTR_STR_ORIGIN) {
            entry.str_origin = attr_value(&attr)?;
        } else if key_is(&attr, ATTR_STR) {
            entry.str_value = attr_value(&attr)?;
        }
    }
    Ok(entry)
}

/// Copies `reader` to `writer`, replacing the `Str` attribute of the
/// `LocStr` elements at the positions in `updates`. Everything else is
/// written back as read. Returns how many elements were rewritten.
///
/// An element whose StringID differs from the update's is refused: the
/// file changed since it was indexed.
pub fn rewrite_str_values<R: BufRead, W: Write>(
    reader: R,
    writer: W,
    updates: &BTreeMap<u32, &EntryUpdate>,
) -> Result<usize, Error> {
    let mut xml_reader = Reader::from_reader(reader);
    let mut xml_writer = Writer::new(writer);
    let mut buf = Vec::new();
    let mut position: u32 = 0;
    let mut rewritten = 0;

    loop {
        buf.clear();
        let event = xml_reader.read_event_into(&mut buf)?;
        match &event {
            Event::Eof => break,
            Event::Decl(decl) => {
                if let Some(decl) = utf8_decl(decl)? {
                    xml_writer.write_event(Event::Decl(decl))?;
                    continue;
                }
            }
            Event::Start(e) | Event::Empty(e) if is_locstr(e) => {
                let current = position;
                position += 1;
                if let Some(update) = updates.get(&current) {
                    let elem = replace_str(e, update)?;
                    rewritten += 1;
                    let replaced = if matches!(event, Event::Empty(_)) {
                        Event::Empty(elem)
                    } else {
                        Event::Start(elem)
                    };
                    xml_writer.write_event(replaced)?;
                    continue;
                }
            }
            _ => {}
        }
        xml_writer.write_event(event)?;
    }
    Ok(rewritten)
}

// Output is always UTF-8, so a declaration naming another encoding is rewritten.
fn utf8_decl(decl: &BytesDecl) -> Result<Option<BytesDecl<'static>>, Error> {
    let Some(encoding) = decl.encoding() else {
        return Ok(None);
    };
    if encoding?.eq_ignore_ascii_case(b"utf-8") {
        return Ok(None);
    }
    let version = String::from_utf8_lossy(&decl.version()?).into_owned();
    let standalone = match decl.standalone() {
        Some(value) => Some(String::from_utf8_lossy(&value?).into_owned()),
        None => None,
    };
    Ok(Some(BytesDecl::new(
        &version,
        Some("utf-8"),
        standalone.as_deref(),
    )))
}

fn replace_str(e: &BytesStart, update: &EntryUpdate) -> Result<BytesStart<'static>, Error> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut elem = BytesStart::new(name);
    let mut replaced = false;

    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        if key_is(&attr, ATTR_STRING_ID) {
            let string_id = attr_value(&attr)?;
            if string_id.trim() != update.string_id.trim() {
                return Err(Error::InvalidCorpus(format!(
                    "entry at position {} is `{}`, expected `{}`",
                    update.position_in_file, string_id, update.string_id
                )));
            }
        }
        if key_is(&attr, ATTR_STR) {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            elem.push_attribute((key.as_str(), update.new_value.as_str()));
            replaced = true;
        } else {
            elem.push_attribute(attr);
        }
    }
    if !replaced {
        elem.push_attribute(("Str", update.new_value.as_str()));
    }
    Ok(elem)
}

/// Directory of `*.xml` string tables, walked recursively in file-name order.
#[derive(Debug, Clone)]
pub struct LocStrDirectory {
    root: PathBuf,
}

impl LocStrDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl CorpusReader for LocStrDirectory {
    fn files(&self) -> Result<Vec<CorpusFile>, Error> {
        if !self.root.is_dir() {
            return Err(Error::InvalidCorpus(format!(
                "`{}` is not a directory",
                self.root.display()
            )));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let is_xml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"));
            if !is_xml {
                continue;
            }
            let relpath = path
                .strip_prefix(&self.root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");
            files.push(CorpusFile::new(path, relpath));
        }
        Ok(files)
    }

    fn read_entries(&self, file: &CorpusFile) -> Result<Vec<RawEntry>, Error> {
        Ok(LocStrFile::read_from(&file.path)?.into_raw_entries())
    }
}

/// Rewrites `Str` attributes in place. Files are re-encoded as UTF-8 and an
/// XML declaration naming another encoding is updated to match.
#[derive(Debug, Default)]
pub struct LocStrWriteBack {
    written: Vec<PathBuf>,
}

impl LocStrWriteBack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files written so far, in write order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl WriteBack for LocStrWriteBack {
    fn write_back(&mut self, source_file: &Path, updates: &[EntryUpdate]) -> Result<(), Error> {
        let content = read_decoded(source_file)?;
        let by_position: BTreeMap<u32, &EntryUpdate> = updates
            .iter()
            .map(|u| (u.position_in_file, u))
            .collect();

        let mut out = Vec::with_capacity(content.len());
        let rewritten = rewrite_str_values(content.as_bytes(), &mut out, &by_position)?;
        if rewritten != by_position.len() {
            return Err(Error::InvalidCorpus(format!(
                "only {} of {} entries found",
                rewritten,
                by_position.len()
            )));
        }

        std::fs::write(source_file, out)?;
        tracing::debug!(file = ?source_file, entries = rewritten, "string table rewritten");
        self.written.push(source_file.to_path_buf());
        Ok(())
    }
}
