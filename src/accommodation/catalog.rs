//! Known tool vocabulary and PNP alias normalization.

use serde::{Deserialize, Serialize};

/// Calculator tool id.
pub const CALCULATOR: &str = "pie-tool-calculator";
/// Text-to-speech tool id.
pub const TEXT_TO_SPEECH: &str = "pie-tool-text-to-speech";
/// Ruler tool id.
pub const RULER: &str = "pie-tool-ruler";
/// Protractor tool id.
pub const PROTRACTOR: &str = "pie-tool-protractor";
/// Line reader tool id.
pub const LINE_READER: &str = "pie-tool-line-reader";
/// Magnifier tool id.
pub const MAGNIFIER: &str = "pie-tool-magnifier";
/// Color scheme tool id.
pub const COLOR_SCHEME: &str = "pie-tool-color-scheme";
/// Answer eliminator tool id.
pub const ANSWER_ELIMINATOR: &str = "pie-tool-answer-eliminator";
/// Graphing tool id.
pub const GRAPH: &str = "pie-tool-graph";
/// Periodic table tool id.
pub const PERIODIC_TABLE: &str = "pie-tool-periodic-table";

/// A tool the player knows how to offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Canonical tool id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Enabled regardless of any configuration.
    pub always_available: bool,
}

impl ToolDefinition {
    fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            always_available: false,
        }
    }
}

/// Ordered tool vocabulary. Order is the evaluation order of the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCatalog {
    tools: Vec<ToolDefinition>,
}

impl Default for ToolCatalog {
    fn default() -> Self {
        let mut color_scheme = ToolDefinition::new(COLOR_SCHEME, "Color Scheme");
        color_scheme.always_available = true;
        Self {
            tools: vec![
                ToolDefinition::new(CALCULATOR, "Calculator"),
                ToolDefinition::new(TEXT_TO_SPEECH, "Text to Speech"),
                ToolDefinition::new(RULER, "Ruler"),
                ToolDefinition::new(PROTRACTOR, "Protractor"),
                ToolDefinition::new(LINE_READER, "Line Reader"),
                ToolDefinition::new(MAGNIFIER, "Magnifier"),
                color_scheme,
                ToolDefinition::new(ANSWER_ELIMINATOR, "Answer Eliminator"),
                ToolDefinition::new(GRAPH, "Graphing"),
                ToolDefinition::new(PERIODIC_TABLE, "Periodic Table"),
            ],
        }
    }
}

impl ToolCatalog {
    /// Catalog from explicit definitions.
    pub fn new(tools: Vec<ToolDefinition>) -> Self {
        Self { tools }
    }

    /// Replace the always-available set. Ids are normalized first.
    pub fn with_always_available<S: AsRef<str>>(mut self, ids: &[S]) -> Self {
        let wanted: Vec<String> = ids.iter().map(|id| normalize_tool_id(id.as_ref())).collect();
        for tool in &mut self.tools {
            tool.always_available = wanted.contains(&tool.id);
        }
        self
    }

    /// Tools in evaluation order.
    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Look up a tool by canonical id.
    pub fn get(&self, id: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.id == id)
    }

    /// Whether a tool bypasses precedence.
    pub fn is_always_available(&self, id: &str) -> bool {
        self.get(id).map(|t| t.always_available).unwrap_or(false)
    }
}

/// Map QTI/PNP support names onto canonical tool ids.
///
/// Unknown ids are returned trimmed but otherwise unchanged so that custom
/// tools still flow through resolution.
pub fn normalize_tool_id(raw: &str) -> String {
    let trimmed = raw.trim();
    let canonical = match trimmed.to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
        "calculator" | "basic-calculator" | "scientific-calculator" => CALCULATOR,
        "texttospeech" | "text-to-speech" | "tts" | "read-aloud" | "readaloud" => TEXT_TO_SPEECH,
        "ruler" => RULER,
        "protractor" => PROTRACTOR,
        "linereader" | "line-reader" | "line-reader-mask" => LINE_READER,
        "magnification" | "magnifier" => MAGNIFIER,
        "colorcontrast" | "color-contrast" | "color-scheme" | "colorscheme" => COLOR_SCHEME,
        "answermasking" | "answer-masking" | "answer-eliminator" | "answereliminator" => {
            ANSWER_ELIMINATOR
        }
        "graph" | "graphing" | "graphing-calculator" => GRAPH,
        "periodictable" | "periodic-table" => PERIODIC_TABLE,
        _ => return trimmed.to_string(),
    };
    canonical.to_string()
}
