//! Compiler configuration.
//!
//! `RazorConfiguration` is what a project declares. `ParserOptions` and
//! `RazorCodeGenerationOptions` are derived per document by the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::directives::DirectiveRegistry;

// ═══════════════════════════════════════════════════════════════════════════════
// LANGUAGE VERSION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RazorLanguageVersion {
    #[serde(rename = "1.0")]
    Version1_0,
    #[serde(rename = "1.1")]
    Version1_1,
    #[serde(rename = "2.0")]
    Version2_0,
    #[serde(rename = "2.1")]
    Version2_1,
    #[serde(rename = "3.0")]
    Version3_0,
    #[serde(rename = "5.0")]
    Version5_0,
    #[serde(rename = "6.0")]
    Version6_0,
    #[serde(rename = "7.0")]
    Version7_0,
    #[serde(rename = "8.0")]
    Version8_0,
    #[serde(rename = "Experimental")]
    Experimental,
}

impl RazorLanguageVersion {
    pub const LATEST: RazorLanguageVersion = RazorLanguageVersion::Version8_0;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Version1_0 => "1.0",
            Self::Version1_1 => "1.1",
            Self::Version2_0 => "2.0",
            Self::Version2_1 => "2.1",
            Self::Version3_0 => "3.0",
            Self::Version5_0 => "5.0",
            Self::Version6_0 => "6.0",
            Self::Version7_0 => "7.0",
            Self::Version8_0 => "8.0",
            Self::Experimental => "Experimental",
        }
    }
}

impl Default for RazorLanguageVersion {
    fn default() -> Self {
        Self::LATEST
    }
}

impl fmt::Display for RazorLanguageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RazorLanguageVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "1.0" => Self::Version1_0,
            "1.1" => Self::Version1_1,
            "2.0" => Self::Version2_0,
            "2.1" => Self::Version2_1,
            "3.0" => Self::Version3_0,
            "5.0" => Self::Version5_0,
            "6.0" => Self::Version6_0,
            "7.0" => Self::Version7_0,
            "8.0" | "Latest" | "latest" => Self::Version8_0,
            "Experimental" | "experimental" => Self::Experimental,
            other => return Err(format!("unknown Razor language version '{}'", other)),
        })
    }
}

/// Syntax availability, fixed by the language version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RazorParserFeatureFlags {
    /// `@x?.y` continues an implicit expression.
    pub allow_null_conditional_operator_in_implicit_expressions: bool,
    /// Markup islands inside `@functions` blocks.
    pub allow_razor_in_all_code_blocks: bool,
    /// Boolean tag helper attributes may be written without a value.
    pub allow_minimized_boolean_tag_helper_attributes: bool,
}

impl RazorParserFeatureFlags {
    pub fn for_version(version: RazorLanguageVersion) -> Self {
        Self {
            allow_null_conditional_operator_in_implicit_expressions: version
                >= RazorLanguageVersion::Version2_1,
            allow_razor_in_all_code_blocks: version >= RazorLanguageVersion::Version3_0,
            allow_minimized_boolean_tag_helper_attributes: version
                >= RazorLanguageVersion::Version2_1,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILE KIND
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileKind {
    #[default]
    Legacy,
    Component,
    ComponentImport,
}

impl FileKind {
    pub fn from_path(path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with("_imports.razor") {
            FileKind::ComponentImport
        } else if lower.ends_with(".razor") {
            FileKind::Component
        } else {
            FileKind::Legacy
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSER OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserOptions {
    pub version: RazorLanguageVersion,
    pub feature_flags: RazorParserFeatureFlags,
    pub directives: DirectiveRegistry,
    pub design_time: bool,
    pub file_kind: FileKind,
    /// Hard limit on markup/code nesting before the parser stops descending.
    pub max_nesting_depth: usize,
}

pub const DEFAULT_MAX_NESTING_DEPTH: usize = 256;

impl ParserOptions {
    pub fn new(version: RazorLanguageVersion, directives: DirectiveRegistry) -> Self {
        Self {
            version,
            feature_flags: RazorParserFeatureFlags::for_version(version),
            directives,
            design_time: false,
            file_kind: FileKind::Legacy,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }

    pub fn design_time(mut self, design_time: bool) -> Self {
        self.design_time = design_time;
        self
    }

    pub fn with_file_kind(mut self, file_kind: FileKind) -> Self {
        self.file_kind = file_kind;
        self
    }
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self::new(RazorLanguageVersion::LATEST, DirectiveRegistry::legacy())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CODE GENERATION OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RazorCodeGenerationOptions {
    pub design_time: bool,
    pub indent_size: usize,
    pub indent_with_tabs: bool,
    pub suppress_checksum: bool,
    pub suppress_metadata_attributes: bool,
    #[serde(default)]
    pub root_namespace: Option<String>,
}

impl Default for RazorCodeGenerationOptions {
    fn default() -> Self {
        Self {
            design_time: false,
            indent_size: 4,
            indent_with_tabs: false,
            suppress_checksum: false,
            suppress_metadata_attributes: false,
            root_namespace: None,
        }
    }
}

impl RazorCodeGenerationOptions {
    pub fn design_time_default() -> Self {
        Self {
            design_time: true,
            ..Self::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROJECT CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RazorConfiguration {
    pub configuration_name: String,
    pub language_version: RazorLanguageVersion,
    #[serde(default)]
    pub extensions: Vec<String>,
}

pub const MVC_EXTENSION: &str = "MVC-3.0";

impl RazorConfiguration {
    pub fn new(name: &str, version: RazorLanguageVersion, extensions: Vec<String>) -> Self {
        Self {
            configuration_name: name.to_string(),
            language_version: version,
            extensions,
        }
    }

    /// Plain Razor without MVC extensions.
    pub fn default_legacy() -> Self {
        Self::new("Default", RazorLanguageVersion::LATEST, Vec::new())
    }

    pub fn mvc() -> Self {
        Self::new(
            MVC_EXTENSION,
            RazorLanguageVersion::LATEST,
            vec![MVC_EXTENSION.to_string()],
        )
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }
}

impl Default for RazorConfiguration {
    fn default() -> Self {
        Self::default_legacy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_flags_follow_version() {
        let old = RazorParserFeatureFlags::for_version(RazorLanguageVersion::Version2_0);
        assert!(!old.allow_null_conditional_operator_in_implicit_expressions);
        assert!(!old.allow_razor_in_all_code_blocks);

        let latest = RazorParserFeatureFlags::for_version(RazorLanguageVersion::LATEST);
        assert!(latest.allow_null_conditional_operator_in_implicit_expressions);
        assert!(latest.allow_razor_in_all_code_blocks);
    }

    #[test]
    fn test_version_parse_and_serde() {
        assert_eq!(
            "latest".parse::<RazorLanguageVersion>().unwrap(),
            RazorLanguageVersion::LATEST
        );
        assert!("4.0".parse::<RazorLanguageVersion>().is_err());
        let json = serde_json::to_string(&RazorLanguageVersion::Version2_1).unwrap();
        assert_eq!(json, "\"2.1\"");
    }

    #[test]
    fn test_file_kind_from_path() {
        assert_eq!(FileKind::from_path("/Views/Index.cshtml"), FileKind::Legacy);
        assert_eq!(FileKind::from_path("/Pages/Counter.razor"), FileKind::Component);
        assert_eq!(FileKind::from_path("/_Imports.razor"), FileKind::ComponentImport);
    }
}
