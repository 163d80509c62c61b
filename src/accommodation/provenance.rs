//! Decision provenance for accommodation resolution.
//!
//! [`ProvenanceBuilder`] records every decision considered during one
//! resolution pass, including the ones that lost. Decisions live in a flat
//! append-only arena; per-feature trails hold indices into it, so the same
//! decision seen from several views is one record.
//!
//! `build()` consumes the builder and yields a read-only [`ProvenanceReport`],
//! which is the only type that can be serialized. A report can therefore
//! never be formatted from an unfinished trail.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Precedence
// ============================================================================

/// The fixed six-level precedence hierarchy, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Precedence {
    /// Organization-level block; absolute veto.
    DistrictBlock = 1,
    /// Explicit enable/disable for this administration.
    TestAdministration = 2,
    /// The item (or its section) blocks the tool.
    ItemRestriction = 3,
    /// The item (or its section) forces the tool on.
    ItemRequirement = 4,
    /// Organization policy forces the tool on.
    DistrictRequirement = 5,
    /// The student's declared support enables the tool.
    StudentSupport = 6,
}

impl Precedence {
    /// All levels in evaluation order.
    pub const ALL: [Precedence; 6] = [
        Precedence::DistrictBlock,
        Precedence::TestAdministration,
        Precedence::ItemRestriction,
        Precedence::ItemRequirement,
        Precedence::DistrictRequirement,
        Precedence::StudentSupport,
    ];

    /// Numeric level, 1 (highest) to 6 (lowest).
    pub fn level(self) -> u8 {
        self as u8
    }

    /// Level for a numeric precedence.
    pub fn from_level(level: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.level() == level)
    }

    /// Human-readable rule name.
    pub fn rule_name(self) -> &'static str {
        match self {
            Precedence::DistrictBlock => "District Block",
            Precedence::TestAdministration => "Test Administration Override",
            Precedence::ItemRestriction => "Item Restriction",
            Precedence::ItemRequirement => "Item Requirement",
            Precedence::DistrictRequirement => "District Requirement",
            Precedence::StudentSupport => "PNP Support",
        }
    }

    /// Whether a winning enable at this level makes the tool required.
    pub fn implies_required(self) -> bool {
        matches!(
            self,
            Precedence::ItemRequirement | Precedence::DistrictRequirement
        )
    }
}

// ============================================================================
// Records
// ============================================================================

/// What a decision does to its feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    /// Disable the tool.
    Block,
    /// Enable the tool.
    Enable,
    /// Would have fired, but a higher-priority decision already won.
    Skip,
}

impl std::fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionAction::Block => write!(f, "block"),
            DecisionAction::Enable => write!(f, "enable"),
            DecisionAction::Skip => write!(f, "skip"),
        }
    }
}

/// Kind of input consulted during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    /// Organization policy.
    District,
    /// Administration overrides.
    TestAdministration,
    /// Assessment-wide settings.
    Assessment,
    /// Section-level tool settings.
    Section,
    /// Item-level tool settings.
    Item,
    /// Student PNP.
    Student,
    /// Built-in defaults.
    System,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceType::District => "district",
            SourceType::TestAdministration => "test-administration",
            SourceType::Assessment => "assessment",
            SourceType::Section => "section",
            SourceType::Item => "item",
            SourceType::Student => "student",
            SourceType::System => "system",
        };
        write!(f, "{}", s)
    }
}

/// Origin of one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionSource {
    /// Source kind.
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Source identifier, e.g. an item identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl DecisionSource {
    /// Source with no id.
    pub fn new(source_type: SourceType) -> Self {
        Self {
            source_type,
            id: None,
            name: None,
        }
    }

    /// Attach an identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach a display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// One immutable entry of the decision log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionDecision {
    /// Monotonic position in the log, starting at 1.
    pub step: usize,
    /// Precedence level, 1..=6.
    pub precedence: u8,
    /// Rule name.
    pub rule: String,
    /// Tool the decision is about.
    pub feature_id: String,
    /// Effect.
    pub action: DecisionAction,
    /// Where the input came from.
    pub source: DecisionSource,
    /// Why the rule fired (or was skipped).
    pub reason: String,
    /// Raw configuration value, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// When the decision was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Input to [`ProvenanceBuilder::add_decision`].
#[derive(Debug, Clone)]
pub struct DecisionParams {
    /// Level that produced the decision.
    pub precedence: Precedence,
    /// Tool the decision is about.
    pub feature_id: String,
    /// Effect.
    pub action: DecisionAction,
    /// Origin.
    pub source: DecisionSource,
    /// Explanation.
    pub reason: String,
    /// Raw configuration value.
    pub value: Option<Value>,
}

/// A registered input, shown in the report header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Source kind.
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Snapshot of the consulted data.
    pub data: Value,
}

/// Final outcome for one feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinalState {
    /// Offered to the student.
    Enabled,
    /// Explicitly disabled.
    Blocked,
    /// No rule applied; not offered.
    NotConfigured,
}

impl std::fmt::Display for FinalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinalState::Enabled => write!(f, "enabled"),
            FinalState::Blocked => write!(f, "blocked"),
            FinalState::NotConfigured => write!(f, "not-configured"),
        }
    }
}

/// All decisions about one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureResolutionTrail {
    /// Tool id.
    pub feature_id: String,
    /// Indices into the report's decision log, in step order.
    pub decisions: Vec<usize>,
    /// Index of the winning decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winning_decision: Option<usize>,
    /// Indices of decisions that lost to the winner.
    #[serde(default)]
    pub overridden: Vec<usize>,
    /// Derived outcome.
    pub final_state: FinalState,
    /// Whether the winning rule forces the tool on.
    pub required: bool,
    /// Enabled by system default, bypassing precedence.
    pub always_available: bool,
    /// Human-readable explanation.
    pub explanation: String,
}

// ============================================================================
// Builder
// ============================================================================

/// Mutable owner of the decision log during one resolution pass.
#[derive(Debug, Default)]
pub struct ProvenanceBuilder {
    sources: Vec<SourceRecord>,
    decisions: Vec<ResolutionDecision>,
    trails: Vec<FeatureResolutionTrail>,
    by_feature: HashMap<String, usize>,
}

impl ProvenanceBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an input consulted by the pass.
    pub fn add_source(&mut self, source_type: SourceType, data: Value) {
        self.sources.push(SourceRecord { source_type, data });
    }

    /// Ensure a trail exists for a feature, even if no rule ever fires.
    pub fn register_feature(&mut self, feature_id: &str) -> usize {
        if let Some(&idx) = self.by_feature.get(feature_id) {
            return idx;
        }
        self.trails.push(FeatureResolutionTrail {
            feature_id: feature_id.to_string(),
            decisions: Vec::new(),
            winning_decision: None,
            overridden: Vec::new(),
            final_state: FinalState::NotConfigured,
            required: false,
            always_available: false,
            explanation: String::new(),
        });
        let idx = self.trails.len() - 1;
        self.by_feature.insert(feature_id.to_string(), idx);
        idx
    }

    /// Mark a feature as enabled by system default.
    pub fn mark_always_available(&mut self, feature_id: &str) {
        let idx = self.register_feature(feature_id);
        self.trails[idx].always_available = true;
    }

    /// Append a decision and update its feature's winner. Returns the step.
    pub fn add_decision(&mut self, params: DecisionParams) -> usize {
        let index = self.decisions.len();
        let step = index + 1;
        let trail_idx = self.register_feature(&params.feature_id);

        let replaces_winner = params.action != DecisionAction::Skip
            && match self.trails[trail_idx].winning_decision {
                Some(w) => params.precedence.level() < self.decisions[w].precedence,
                None => true,
            };

        self.decisions.push(ResolutionDecision {
            step,
            precedence: params.precedence.level(),
            rule: params.precedence.rule_name().to_string(),
            feature_id: params.feature_id,
            action: params.action,
            source: params.source,
            reason: params.reason,
            value: params.value,
            timestamp: Utc::now(),
        });

        let trail = &mut self.trails[trail_idx];
        trail.decisions.push(index);
        if replaces_winner {
            trail.winning_decision = Some(index);
        }
        step
    }

    /// Number of decisions recorded so far.
    pub fn decision_count(&self) -> usize {
        self.decisions.len()
    }

    /// Finalize: derive states, explanations and aggregate counts.
    pub fn build(mut self) -> ProvenanceReport {
        let mut summary = ProvenanceSummary::default();

        for trail in &mut self.trails {
            let winner = trail.winning_decision.map(|w| &self.decisions[w]);
            trail.overridden = trail
                .decisions
                .iter()
                .copied()
                .filter(|&d| Some(d) != trail.winning_decision)
                .collect();

            trail.final_state = match winner.map(|w| w.action) {
                Some(DecisionAction::Block) => FinalState::Blocked,
                Some(DecisionAction::Enable) => FinalState::Enabled,
                _ if trail.always_available => FinalState::Enabled,
                _ => FinalState::NotConfigured,
            };
            trail.required = winner
                .map(|w| {
                    w.action == DecisionAction::Enable
                        && Precedence::from_level(w.precedence)
                            .map(Precedence::implies_required)
                            .unwrap_or(false)
                })
                .unwrap_or(false);
            trail.explanation = explain(trail, winner, &self.decisions);

            summary.total_features += 1;
            match trail.final_state {
                FinalState::Enabled => summary.enabled += 1,
                FinalState::Blocked => summary.blocked += 1,
                FinalState::NotConfigured => summary.not_configured += 1,
            }
            if trail.required {
                summary.required += 1;
            }
            match winner {
                Some(w) => {
                    *summary
                        .by_source
                        .entry(w.source.source_type.to_string())
                        .or_default() += 1;
                    *summary.by_rule.entry(w.rule.clone()).or_default() += 1;
                }
                None if trail.always_available => {
                    *summary
                        .by_source
                        .entry(SourceType::System.to_string())
                        .or_default() += 1;
                }
                None => {}
            }
        }

        ProvenanceReport {
            generated_at: Utc::now(),
            sources: self.sources,
            decisions: self.decisions,
            trails: self.trails,
            summary,
        }
    }
}

fn describe(decision: &ResolutionDecision) -> String {
    match &decision.source.id {
        Some(id) => format!(
            "{} (precedence {}, {} {})",
            decision.rule, decision.precedence, decision.source.source_type, id
        ),
        None => format!(
            "{} (precedence {}, {})",
            decision.rule, decision.precedence, decision.source.source_type
        ),
    }
}

fn explain(
    trail: &FeatureResolutionTrail,
    winner: Option<&ResolutionDecision>,
    decisions: &[ResolutionDecision],
) -> String {
    let mut text = match winner {
        Some(w) => {
            let verb = match (w.action, trail.required) {
                (DecisionAction::Block, _) => "Blocked",
                (_, true) => "Required",
                _ => "Enabled",
            };
            format!("{} by {}: {}.", verb, describe(w), w.reason)
        }
        None if trail.always_available => "Enabled: always available by system default.".to_string(),
        None => "Not configured at any precedence level.".to_string(),
    };

    if !trail.overridden.is_empty() {
        let losers: Vec<String> = trail
            .overridden
            .iter()
            .map(|&d| describe(&decisions[d]))
            .collect();
        let _ = write!(text, " Overridden: {}.", losers.join("; "));
    }
    text
}

// ============================================================================
// Report
// ============================================================================

/// Aggregate counts over all features.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceSummary {
    /// Number of features with a trail.
    pub total_features: usize,
    /// Features offered.
    pub enabled: usize,
    /// Features blocked.
    pub blocked: usize,
    /// Features no rule applied to.
    pub not_configured: usize,
    /// Enabled features that are also required.
    pub required: usize,
    /// Winning decisions per source type.
    pub by_source: BTreeMap<String, usize>,
    /// Winning decisions per rule.
    pub by_rule: BTreeMap<String, usize>,
}

/// Finalized, read-only provenance snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceReport {
    /// When the report was finalized.
    pub generated_at: DateTime<Utc>,
    /// Inputs consulted.
    pub sources: Vec<SourceRecord>,
    /// Decision log in step order.
    pub decisions: Vec<ResolutionDecision>,
    /// Per-feature trails in evaluation order.
    pub trails: Vec<FeatureResolutionTrail>,
    /// Aggregate counts.
    pub summary: ProvenanceSummary,
}

impl ProvenanceReport {
    /// Trail for a feature.
    pub fn trail(&self, feature_id: &str) -> Option<&FeatureResolutionTrail> {
        self.trails.iter().find(|t| t.feature_id == feature_id)
    }

    /// Winning decision for a feature.
    pub fn winning_decision(&self, feature_id: &str) -> Option<&ResolutionDecision> {
        self.trail(feature_id)
            .and_then(|t| t.winning_decision)
            .map(|i| &self.decisions[i])
    }

    /// Decisions that lost for a feature.
    pub fn overridden(&self, feature_id: &str) -> Vec<&ResolutionDecision> {
        self.trail(feature_id)
            .map(|t| t.overridden.iter().map(|&i| &self.decisions[i]).collect())
            .unwrap_or_default()
    }

    /// Every decision about a feature, in step order.
    pub fn decisions_for(&self, feature_id: &str) -> Vec<&ResolutionDecision> {
        self.trail(feature_id)
            .map(|t| t.decisions.iter().map(|&i| &self.decisions[i]).collect())
            .unwrap_or_default()
    }

    /// Explanation for a feature.
    pub fn explanation(&self, feature_id: &str) -> Option<&str> {
        self.trail(feature_id).map(|t| t.explanation.as_str())
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Markdown audit report.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# Accommodation Resolution Report\n");
        let _ = writeln!(md, "Generated: {}\n", self.generated_at.to_rfc3339());

        let _ = writeln!(md, "## Sources\n");
        if self.sources.is_empty() {
            let _ = writeln!(md, "_No sources consulted._");
        }
        for source in &self.sources {
            let _ = writeln!(md, "- **{}**: `{}`", source.source_type, source.data);
        }

        let s = &self.summary;
        let _ = writeln!(md, "\n## Summary\n");
        let _ = writeln!(md, "| Features | Enabled | Required | Blocked | Not configured |");
        let _ = writeln!(md, "|---|---|---|---|---|");
        let _ = writeln!(
            md,
            "| {} | {} | {} | {} | {} |",
            s.total_features, s.enabled, s.required, s.blocked, s.not_configured
        );
        if !s.by_rule.is_empty() {
            let _ = writeln!(md, "\nWinning rules:\n");
            for (rule, count) in &s.by_rule {
                let _ = writeln!(md, "- {}: {}", rule, count);
            }
        }
        if !s.by_source.is_empty() {
            let _ = writeln!(md, "\nWinning sources:\n");
            for (source, count) in &s.by_source {
                let _ = writeln!(md, "- {}: {}", source, count);
            }
        }

        let _ = writeln!(md, "\n## Features");
        for trail in &self.trails {
            let _ = writeln!(md, "\n### {} ({})\n", trail.feature_id, trail.final_state);
            let _ = writeln!(md, "{}", trail.explanation);
            if trail.decisions.is_empty() {
                continue;
            }
            let _ = writeln!(md, "\n| Step | Precedence | Rule | Action | Source | Reason |");
            let _ = writeln!(md, "|---|---|---|---|---|---|");
            for &i in &trail.decisions {
                let d = &self.decisions[i];
                let marker = if Some(i) == trail.winning_decision { " ✓" } else { "" };
                let source = match &d.source.id {
                    Some(id) => format!("{} `{}`", d.source.source_type, id),
                    None => d.source.source_type.to_string(),
                };
                let _ = writeln!(
                    md,
                    "| {} | {} | {}{} | {} | {} | {} |",
                    d.step, d.precedence, d.rule, marker, d.action, source, d.reason
                );
            }
        }
        md
    }
}
