//! Glyph remapping for text rendered with an obfuscated font.
//!
//! Some pages draw their last paragraph with a font whose glyph table is permuted, so
//! the code points in the markup are not the characters a reader sees. A
//! [GlyphMapper] translates them back one character at a time.

use super::error::ScraperError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Replacement used by [UnmappedGlyph::Placeholder].
pub const PLACEHOLDER_GLYPH: char = '\u{FFFD}';

/// Font-glyph to Unicode lookup.
pub trait GlyphMapper: Send + Sync {
    /// Displayed character for `glyph`, or None when the table has no entry.
    fn map_glyph(&self, glyph: char) -> Option<char>;
}

impl<F> GlyphMapper for F
where
    F: Fn(char) -> Option<char> + Send + Sync,
{
    fn map_glyph(&self, glyph: char) -> Option<char> {
        self(glyph)
    }
}

/// What to emit for a character the mapper does not know.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmappedGlyph {
    /// Leave the character out (default).
    #[default]
    Drop,
    /// Emit the character unchanged.
    Keep,
    /// Emit [PLACEHOLDER_GLYPH].
    Placeholder,
}

impl std::str::FromStr for UnmappedGlyph {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop" => Ok(UnmappedGlyph::Drop),
            "keep" => Ok(UnmappedGlyph::Keep),
            "placeholder" => Ok(UnmappedGlyph::Placeholder),
            other => Err(format!(
                "unknown unmapped glyph policy '{}': expected drop, keep, or placeholder",
                other
            )),
        }
    }
}

/// Translate `text` character by character.
pub fn remap_text(text: &str, mapper: &dyn GlyphMapper, policy: UnmappedGlyph) -> String {
    text.chars()
        .filter_map(|c| match mapper.map_glyph(c) {
            Some(mapped) => Some(mapped),
            None => match policy {
                UnmappedGlyph::Drop => None,
                UnmappedGlyph::Keep => Some(c),
                UnmappedGlyph::Placeholder => Some(PLACEHOLDER_GLYPH),
            },
        })
        .collect()
}

/// Mapper backed by an in-memory table.
#[derive(Debug, Clone, Default)]
pub struct TableGlyphMapper {
    table: HashMap<char, char>,
}

impl TableGlyphMapper {
    pub fn new(table: HashMap<char, char>) -> Self {
        Self { table }
    }

    /// Load a JSON object whose keys and values are single characters,
    /// e.g. `{"\ue001": "的"}`.
    pub fn from_json_file(path: &Path) -> Result<Self, ScraperError> {
        let err = |reason: String| ScraperError::GlyphMap {
            path: path.display().to_string(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
        let entries: HashMap<String, String> =
            serde_json::from_str(&raw).map_err(|e| err(e.to_string()))?;
        let mut table = HashMap::with_capacity(entries.len());
        for (from, to) in entries {
            let (Some(f), Some(t)) = (single_char(&from), single_char(&to)) else {
                return Err(err(format!(
                    "entry {:?} -> {:?} is not a single character pair",
                    from, to
                )));
            };
            table.insert(f, t);
        }
        Ok(Self { table })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

impl GlyphMapper for TableGlyphMapper {
    fn map_glyph(&self, glyph: char) -> Option<char> {
        self.table.get(&glyph).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn table() -> TableGlyphMapper {
        TableGlyphMapper::new(HashMap::from([('\u{e001}', '我'), ('\u{e002}', '你'), ('，', '，')]))
    }

    #[test]
    fn unmapped_glyphs_follow_policy() {
        let mapper = table();
        let text = "\u{e001}x，\u{e002}";
        assert_eq!(remap_text(text, &mapper, UnmappedGlyph::Drop), "我，你");
        assert_eq!(remap_text(text, &mapper, UnmappedGlyph::Keep), "我x，你");
        assert_eq!(
            remap_text(text, &mapper, UnmappedGlyph::Placeholder),
            "我\u{FFFD}，你"
        );
    }

    #[test]
    fn closures_act_as_mappers() {
        let upper = |c: char| Some(c.to_ascii_uppercase());
        assert_eq!(remap_text("abc", &upper, UnmappedGlyph::Drop), "ABC");
    }

    #[test]
    fn loads_json_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"\ue001": "的", "a": "b"}}"#).unwrap();
        let mapper = TableGlyphMapper::from_json_file(file.path()).unwrap();
        assert_eq!(mapper.len(), 2);
        assert_eq!(mapper.map_glyph('\u{e001}'), Some('的'));
        assert_eq!(mapper.map_glyph('z'), None);
    }

    #[test]
    fn rejects_multi_character_entries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"ab": "c"}}"#).unwrap();
        let err = TableGlyphMapper::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, ScraperError::GlyphMap { .. }));
    }

    #[test]
    fn policy_parses_from_str() {
        assert_eq!("Keep".parse::<UnmappedGlyph>(), Ok(UnmappedGlyph::Keep));
        assert!("other".parse::<UnmappedGlyph>().is_err());
    }
}
