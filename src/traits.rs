//! File-level parsing and serialization shared by string tables and
//! correction lists.

use std::{
    fs::File,
    io::{BufRead, BufWriter, Cursor, Read, Write},
    path::Path,
};

use crate::error::Error;

/// Reads and writes one corpus or corrections file.
///
/// Files are decoded before parsing: a UTF-16 or UTF-8 byte order mark picks
/// the encoding, anything else is read as UTF-8 with invalid bytes replaced.
/// Output is always UTF-8 without a BOM.
///
/// # Example
///
/// ```rust,no_run
/// use locmerge::traits::Parser;
/// let file = locmerge::formats::LocStrFile::read_from("languagedata_fr.xml")?;
/// file.write_to("languagedata_fr.copy.xml")?;
/// Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub trait Parser {
    /// Parse from any reader of UTF-8 text.
    fn from_reader<R: BufRead>(reader: R) -> Result<Self, Error>
    where
        Self: Sized;

    /// Write UTF-8 text to any writer.
    fn to_writer<W: Write>(&self, writer: W) -> Result<(), Error>;

    /// Parse a file, honouring its byte order mark.
    fn read_from<P: AsRef<Path>>(path: P) -> Result<Self, Error>
    where
        Self: Sized,
    {
        let decoded = read_decoded(path.as_ref())?;
        Self::from_str(&decoded)
    }

    /// Write to file path, replacing any existing file.
    fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.to_writer(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    fn from_str(s: &str) -> Result<Self, Error>
    where
        Self: Sized,
    {
        Self::from_reader(Cursor::new(s))
    }

    /// Parse from bytes already decoded as UTF-8.
    fn from_bytes(bytes: &[u8]) -> Result<Self, Error>
    where
        Self: Sized,
    {
        Self::from_reader(Cursor::new(bytes))
    }
}

/// Whole file as UTF-8, decoded according to its byte order mark.
pub(crate) fn read_decoded(path: &Path) -> Result<String, Error> {
    let file = File::open(path).map_err(Error::Io)?;
    let mut decoder = encoding_rs_io::DecodeReaderBytesBuilder::new()
        .encoding(Some(encoding_rs::UTF_8))
        .bom_override(true)
        .strip_bom(true)
        .build(file);

    let mut decoded = String::new();
    decoder.read_to_string(&mut decoded).map_err(Error::Io)?;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Correction;

    #[test]
    fn test_corrections_with_utf8_bom() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("corrections.json");
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(br#"[{"string_id":"A1","corrected_text":"Bonjour"}]"#);
        std::fs::write(&path, bytes).unwrap();

        let corrections = Vec::<Correction>::read_from(&path).unwrap();
        assert_eq!(corrections, vec![Correction::new("Bonjour").with_string_id("A1")]);
    }

    #[test]
    fn test_write_to_then_read_from() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        let corrections = vec![Correction::new("Salut").with_str_origin("Hi")];
        corrections.write_to(&path).unwrap();
        assert_eq!(Vec::<Correction>::read_from(&path).unwrap(), corrections);
    }

    #[test]
    fn test_from_bytes_matches_from_str() {
        let json = r#"[{"string_id":"Q1","str_origin":"Yes","corrected_text":"Oui"}]"#;
        assert_eq!(
            Vec::<Correction>::from_bytes(json.as_bytes()).unwrap(),
            Vec::<Correction>::from_str(json).unwrap()
        );
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("latin1.json");
        std::fs::write(&path, b"[{\"corrected_text\":\"caf\xe9\"}]").unwrap();
        let corrections = Vec::<Correction>::read_from(&path).unwrap();
        assert_eq!(corrections[0].corrected_text, "caf\u{fffd}");
    }
}
