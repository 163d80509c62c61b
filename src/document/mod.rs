//! Assessment document model and format detection.
//!
//! The document is the JSON-shaped input handed to the player at session
//! start. Two shapes are accepted:
//! - **flat**: a `questions` list, optionally grouped by flat `sections`
//!   that reference questions by id
//! - **qti**: `testParts` → `sections` → nested `sections` → `assessmentItemRefs`
//!
//! Unknown fields are ignored so that edited documents carrying extra
//! authoring data still load.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DocumentError, DocumentResult};

/// Structural format of an assessment document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentFormat {
    /// Simple question list with optional flat sections.
    Flat,
    /// Test-parts → sections → item-refs.
    Qti,
}

impl std::fmt::Display for AssessmentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssessmentFormat::Flat => write!(f, "flat"),
            AssessmentFormat::Qti => write!(f, "qti"),
        }
    }
}

/// Classify a document. An assessment is `qti` iff it declares at least one test-part.
pub fn detect_format(doc: &AssessmentDocument) -> AssessmentFormat {
    if doc.test_parts.is_empty() {
        AssessmentFormat::Flat
    } else {
        AssessmentFormat::Qti
    }
}

/// Root assessment document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentDocument {
    /// Assessment identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// QTI test parts (non-empty means `qti` format).
    #[serde(default)]
    pub test_parts: Vec<TestPart>,
    /// Flat question list.
    #[serde(default)]
    pub questions: Vec<Question>,
    /// Flat sections referencing questions by id.
    #[serde(default)]
    pub sections: Vec<FlatSection>,
    /// Student accommodation declarations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_needs_profile: Option<PersonalNeedsProfile>,
    /// Policy and administration settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<AssessmentSettings>,
    /// Declared context variables and their defaults.
    #[serde(default)]
    pub context_declarations: Vec<ContextDeclaration>,
}

impl AssessmentDocument {
    /// Parse a document from a JSON string.
    pub fn from_json(json: &str) -> DocumentResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a document from disk.
    pub fn from_path(path: impl AsRef<Path>) -> DocumentResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| DocumentError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Format of this document.
    pub fn format(&self) -> AssessmentFormat {
        detect_format(self)
    }

    /// Identifier used to key attempt sessions, falling back to the title.
    pub fn assessment_id(&self) -> String {
        self.identifier
            .clone()
            .or_else(|| self.title.clone())
            .unwrap_or_else(|| "assessment".to_string())
    }

    /// Locate the tool settings that apply to one item: its own settings and
    /// those of every enclosing section, outermost first.
    pub fn tool_scopes_for(&self, item_identifier: &str) -> ScopeChain {
        match self.format() {
            AssessmentFormat::Qti => self
                .test_parts
                .iter()
                .flat_map(|part| part.sections.iter())
                .find_map(|section| find_in_section(section, item_identifier))
                .unwrap_or_default(),
            AssessmentFormat::Flat => {
                let Some((index, question)) = self
                    .questions
                    .iter()
                    .enumerate()
                    .find(|(i, q)| q.resolved_identifier(*i) == item_identifier)
                else {
                    return ScopeChain::default();
                };
                let section = self.sections.iter().find(|s| {
                    s.question_ids
                        .iter()
                        .any(|id| question.matches_reference(id, index))
                });
                ScopeChain {
                    sections: section
                        .map(|s| Scope {
                            identifier: s.identifier.clone(),
                            settings: s.settings.clone().unwrap_or_default(),
                        })
                        .into_iter()
                        .collect(),
                    item: Some(Scope {
                        identifier: item_identifier.to_string(),
                        settings: question.settings.clone().unwrap_or_default(),
                    }),
                }
            }
        }
    }
}

fn find_in_section(section: &AssessmentSection, item_identifier: &str) -> Option<ScopeChain> {
    let scope = || Scope {
        identifier: section.identifier.clone(),
        settings: section.settings.clone().unwrap_or_default(),
    };
    for nested in &section.sections {
        if let Some(mut found) = find_in_section(nested, item_identifier) {
            found.sections.insert(0, scope());
            return Some(found);
        }
    }
    section
        .assessment_item_refs
        .iter()
        .find(|r| r.identifier == item_identifier)
        .map(|item_ref| ScopeChain {
            sections: vec![scope()],
            item: Some(Scope {
                identifier: item_ref.identifier.clone(),
                settings: item_ref.settings.clone().unwrap_or_default(),
            }),
        })
}

// ============================================================================
// Flat format
// ============================================================================

/// A question in a flat assessment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Authoring id, referenced by flat sections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Stable QTI-like identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Opaque pointer resolved by the item loader.
    #[serde(default, alias = "itemHandle", skip_serializing_if = "Option::is_none")]
    pub item_v_id: Option<String>,
    /// Optional title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Item-level tool settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ToolScopeSettings>,
}

impl Question {
    /// Identifier with fallbacks: `identifier`, then the item handle (`itemVId`,
    /// then `id`), then `q-<n>` (1-based).
    pub fn resolved_identifier(&self, index: usize) -> String {
        self.identifier
            .clone()
            .or_else(|| self.item_v_id.clone())
            .or_else(|| self.id.clone())
            .unwrap_or_else(|| format!("q-{}", index + 1))
    }

    /// Item handle with fallbacks: `itemVId`, then `id`, then the resolved identifier.
    pub fn resolved_handle(&self, index: usize) -> String {
        self.item_v_id
            .clone()
            .or_else(|| self.id.clone())
            .unwrap_or_else(|| self.resolved_identifier(index))
    }

    /// Whether a section's question reference points at this question.
    pub fn matches_reference(&self, reference: &str, index: usize) -> bool {
        self.id.as_deref() == Some(reference) || self.resolved_identifier(index) == reference
    }
}

/// A flat section grouping questions by reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatSection {
    /// Section identifier.
    pub identifier: String,
    /// Optional title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Referenced question ids, in presentation order.
    #[serde(default)]
    pub question_ids: Vec<String>,
    /// Passages or instructions attached to the section.
    #[serde(default)]
    pub rubric_blocks: Vec<RubricBlock>,
    /// Section-level tool settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ToolScopeSettings>,
}

// ============================================================================
// QTI format
// ============================================================================

/// A QTI test part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPart {
    /// Test part identifier.
    pub identifier: String,
    /// Optional title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// `linear` or `nonlinear`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation_mode: Option<String>,
    /// `individual` or `simultaneous`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_mode: Option<String>,
    /// Top-level sections.
    #[serde(default)]
    pub sections: Vec<AssessmentSection>,
}

/// A QTI section; sections may nest arbitrarily.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentSection {
    /// Section identifier.
    pub identifier: String,
    /// Optional title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Whether the section is shown as a navigable unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    /// Passages or instructions attached to the section.
    #[serde(default)]
    pub rubric_blocks: Vec<RubricBlock>,
    /// Nested sub-sections.
    #[serde(default)]
    pub sections: Vec<AssessmentSection>,
    /// Item references owned directly by this section.
    #[serde(default)]
    pub assessment_item_refs: Vec<AssessmentItemRef>,
    /// Section-level tool settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ToolScopeSettings>,
}

/// A QTI item reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentItemRef {
    /// Item identifier.
    pub identifier: String,
    /// Opaque item handle.
    #[serde(default, alias = "itemHandle", skip_serializing_if = "Option::is_none")]
    pub item_v_id: Option<String>,
    /// Item location, used as handle when no `itemVId` is present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    /// Optional title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Whether a response is required before moving on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    /// Item-level tool settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ToolScopeSettings>,
}

impl AssessmentItemRef {
    /// Resolvable item handle, if any.
    pub fn item_handle(&self) -> Option<&str> {
        self.item_v_id
            .as_deref()
            .or(self.href.as_deref())
            .filter(|h| !h.is_empty())
    }
}

/// A section-level content block (passage, instructions).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricBlock {
    /// Optional block identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Intended audience, e.g. `candidate`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    /// `passage`, `instructions`, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    /// Markup content.
    #[serde(default)]
    pub content: String,
}

// ============================================================================
// Accommodation inputs
// ============================================================================

/// Tool requirements and restrictions attached to a section or item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolScopeSettings {
    /// Tools this scope forces on.
    #[serde(default)]
    pub required_tools: Vec<String>,
    /// Tools this scope blocks.
    #[serde(default)]
    pub restricted_tools: Vec<String>,
}

impl ToolScopeSettings {
    /// True when the scope carries no tool rules.
    pub fn is_empty(&self) -> bool {
        self.required_tools.is_empty() && self.restricted_tools.is_empty()
    }
}

/// A section or item scope with its tool settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    /// Section or item identifier.
    pub identifier: String,
    /// Tool settings declared on the scope.
    pub settings: ToolScopeSettings,
}

/// The section and item scopes consulted for one item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeChain {
    /// Enclosing sections, outermost first. Rules on any of them apply to
    /// the item.
    pub sections: Vec<Scope>,
    /// The item itself.
    pub item: Option<Scope>,
}

impl ScopeChain {
    /// Innermost enclosing section.
    pub fn innermost_section(&self) -> Option<&Scope> {
        self.sections.last()
    }
}

/// QTI 3.0 Personal Needs Profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalNeedsProfile {
    /// Supports the student is entitled to.
    #[serde(default)]
    pub supports: Vec<String>,
    /// Supports the student must not receive.
    #[serde(default)]
    pub prohibited_supports: Vec<String>,
    /// Supports shown without user action at test start.
    #[serde(default)]
    pub activate_at_init: Vec<String>,
}

/// Assessment-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentSettings {
    /// Organization policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district_policy: Option<DistrictPolicy>,
    /// Overrides for this administration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_administration: Option<TestAdministration>,
    /// Per-tool settings payloads.
    #[serde(default)]
    pub tool_configs: serde_json::Map<String, serde_json::Value>,
}

/// Organization-level tool policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistrictPolicy {
    /// Tools vetoed for every student and item.
    #[serde(default)]
    pub blocked_tools: Vec<String>,
    /// Tools forced on for every item.
    #[serde(default)]
    pub required_tools: Vec<String>,
}

/// Explicit enable/disable decisions for one administration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestAdministration {
    /// Administration mode, e.g. `practice` or `operational`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Tool id → enabled. Kept in document order.
    #[serde(default)]
    pub tool_overrides: serde_json::Map<String, serde_json::Value>,
}

impl TestAdministration {
    /// Boolean overrides in document order; non-boolean values are ignored.
    pub fn overrides(&self) -> impl Iterator<Item = (&str, bool)> {
        self.tool_overrides
            .iter()
            .filter_map(|(k, v)| v.as_bool().map(|b| (k.as_str(), b)))
    }
}

/// A declared context variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextDeclaration {
    /// Variable identifier.
    pub identifier: String,
    /// QTI base type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_type: Option<String>,
    /// QTI cardinality.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<String>,
    /// Initial value for new attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
}
