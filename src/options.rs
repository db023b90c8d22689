//! Options controlling one resolution/merge pass.

use serde::{Deserialize, Serialize};

use crate::{
    category::ScriptScope,
    error::Error,
    fuzzy::FuzzyOptions,
    merge::{ApplyMode, LineBreakStyle},
};

/// Pass behavior options for [`crate::run_pass`].
///
/// Deserializable from JSON; every field is optional and falls back to the
/// safe default (only untranslated entries are written, fuzzy matching off).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PassOptions {
    /// Whether existing translations may be overwritten.
    pub mode: ApplyMode,
    /// Lets StrOrigin-only matches overwrite translations in overwrite mode.
    pub allow_origin_only_overwrite: bool,
    /// Line-break representation written into the target.
    pub line_breaks: LineBreakStyle,
    /// Treat a literal `\n` in corrected text as a line break.
    pub escaped_newlines: bool,
    /// Categories eligible for StringID-only matching.
    pub script_scope: ScriptScope,
    /// Enables the fuzzy tier. There is no default threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuzzy: Option<FuzzyOptions>,
    /// Clear values of entries without source text once the pass is done.
    pub enforce_golden_rule: bool,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            mode: ApplyMode::default(),
            allow_origin_only_overwrite: false,
            line_breaks: LineBreakStyle::default(),
            escaped_newlines: false,
            script_scope: ScriptScope::default(),
            fuzzy: None,
            enforce_golden_rule: true,
        }
    }
}

impl PassOptions {
    /// Creates default pass options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from a JSON document and validates them.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Sets the apply mode.
    pub fn with_mode(mut self, mode: ApplyMode) -> Self {
        self.mode = mode;
        self
    }

    /// Enables/disables overwriting through StrOrigin-only matches.
    pub fn with_origin_only_overwrite(mut self, allow: bool) -> Self {
        self.allow_origin_only_overwrite = allow;
        self
    }

    /// Sets the target line-break style.
    pub fn with_line_breaks(mut self, line_breaks: LineBreakStyle) -> Self {
        self.line_breaks = line_breaks;
        self
    }

    /// Enables/disables reading a literal `\n` as a line break.
    pub fn with_escaped_newlines(mut self, enabled: bool) -> Self {
        self.escaped_newlines = enabled;
        self
    }

    /// Sets the script categories of the StringID-only tier.
    pub fn with_script_scope(mut self, script_scope: ScriptScope) -> Self {
        self.script_scope = script_scope;
        self
    }

    /// Enables the fuzzy tier.
    pub fn with_fuzzy(mut self, fuzzy: FuzzyOptions) -> Self {
        self.fuzzy = Some(fuzzy);
        self
    }

    /// Enables/disables the golden-rule cleanup.
    pub fn with_golden_rule_cleanup(mut self, enabled: bool) -> Self {
        self.enforce_golden_rule = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if let Some(fuzzy) = &self.fuzzy {
            fuzzy.validate()?;
        }
        Ok(())
    }
}
