//! Source-script detection used by the untranslated guard.
//!
//! A target value that still contains source-script characters is treated as
//! untranslated even when it is not empty.

/// Detects characters of the source language's script.
pub trait SourceScript {
    fn contains_source_script(&self, text: &str) -> bool;
}

/// Korean source text: Hangul syllables and jamo.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hangul;

impl Hangul {
    fn is_hangul(c: char) -> bool {
        matches!(c,
            '\u{AC00}'..='\u{D7A3}' // syllables
            | '\u{1100}'..='\u{11FF}' // jamo
            | '\u{3130}'..='\u{318F}' // compatibility jamo
            | '\u{A960}'..='\u{A97F}' // jamo extended-A
            | '\u{D7B0}'..='\u{D7FF}' // jamo extended-B
        )
    }
}

impl SourceScript for Hangul {
    fn contains_source_script(&self, text: &str) -> bool {
        text.chars().any(Self::is_hangul)
    }
}

impl<F> SourceScript for F
where
    F: Fn(&str) -> bool,
{
    fn contains_source_script(&self, text: &str) -> bool {
        self(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hangul_detection() {
        assert!(Hangul.contains_source_script("저장"));
        assert!(Hangul.contains_source_script("Save 게임"));
        assert!(Hangul.contains_source_script("ㅋㅋ"));
        assert!(!Hangul.contains_source_script("Sauvegarder"));
        assert!(!Hangul.contains_source_script("保存"));
        assert!(!Hangul.contains_source_script(""));
    }

    #[test]
    fn test_closure_as_source_script() {
        let latin = |text: &str| text.chars().any(|c| c.is_ascii_alphabetic());
        assert!(latin.contains_source_script("abc"));
        assert!(!latin.contains_source_script("123"));
    }
}
