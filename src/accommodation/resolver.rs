//! Six-level precedence resolution of tool availability.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::catalog::{normalize_tool_id, ToolCatalog};
use super::provenance::{
    DecisionAction, DecisionParams, DecisionSource, Precedence, ProvenanceBuilder,
    ProvenanceReport, SourceType,
};
use crate::config::ResolverConfig;
use crate::document::{
    AssessmentDocument, DistrictPolicy, PersonalNeedsProfile, Scope, ScopeChain,
    TestAdministration,
};

/// Resolved availability of one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedToolConfig {
    /// Canonical tool id.
    pub id: String,
    /// Whether the tool is offered.
    pub enabled: bool,
    /// Whether the tool is forced on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    /// Enabled by system default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always_available: Option<bool>,
    /// Tool settings payload from the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

/// Output of one resolution pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTools {
    /// One entry per tool, in evaluation order.
    pub tools: Vec<ResolvedToolConfig>,
    /// Enabled tools to show without user action at test start.
    pub auto_activate: Vec<String>,
    /// Decision trail, when recording is on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<ProvenanceReport>,
}

impl ResolvedTools {
    /// Config for a tool.
    pub fn get(&self, id: &str) -> Option<&ResolvedToolConfig> {
        let id = normalize_tool_id(id);
        self.tools.iter().find(|t| t.id == id)
    }

    /// Whether a tool is offered.
    pub fn is_enabled(&self, id: &str) -> bool {
        self.get(id).map(|t| t.enabled).unwrap_or(false)
    }

    /// Ids of offered tools.
    pub fn enabled_ids(&self) -> Vec<&str> {
        self.tools
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.id.as_str())
            .collect()
    }
}

/// Everything one resolution pass consults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionInput {
    /// Organization policy.
    pub district_policy: Option<DistrictPolicy>,
    /// Administration overrides.
    pub test_administration: Option<TestAdministration>,
    /// Section and item scopes of the current item.
    pub scopes: ScopeChain,
    /// Student PNP.
    pub profile: Option<PersonalNeedsProfile>,
    /// Per-tool settings payloads.
    pub tool_configs: Map<String, Value>,
}

impl ResolutionInput {
    /// Gather inputs from a document, scoped to one item when given.
    pub fn from_document(doc: &AssessmentDocument, item_identifier: Option<&str>) -> Self {
        let settings = doc.settings.clone().unwrap_or_default();
        Self {
            district_policy: settings.district_policy,
            test_administration: settings.test_administration,
            scopes: item_identifier
                .map(|id| doc.tool_scopes_for(id))
                .unwrap_or_default(),
            profile: doc.personal_needs_profile.clone(),
            tool_configs: settings.tool_configs,
        }
    }
}

/// A rule that would fire for one tool at one level.
struct Candidate {
    precedence: Precedence,
    tool: String,
    action: DecisionAction,
    source: DecisionSource,
    reason: String,
    value: Option<Value>,
}

/// Resolves which tools are enabled, required or blocked.
///
/// Levels are evaluated in order 1→6; within a level, tools are visited in
/// evaluation order. The first applicable rule decides a tool; every later
/// rule that would have fired is recorded as `skip`.
#[derive(Debug, Clone)]
pub struct AccommodationResolver {
    catalog: ToolCatalog,
    record_provenance: bool,
}

impl Default for AccommodationResolver {
    fn default() -> Self {
        Self::new(ToolCatalog::default())
    }
}

impl AccommodationResolver {
    /// Resolver over a catalog, recording provenance.
    pub fn new(catalog: ToolCatalog) -> Self {
        Self {
            catalog,
            record_provenance: true,
        }
    }

    /// Resolver configured from the environment.
    pub fn from_config(config: &ResolverConfig) -> Self {
        let catalog = match &config.always_available {
            Some(ids) => ToolCatalog::default().with_always_available(ids),
            None => ToolCatalog::default(),
        };
        Self::new(catalog).with_provenance(config.provenance_enabled)
    }

    /// Turn provenance recording on or off.
    pub fn with_provenance(mut self, enabled: bool) -> Self {
        self.record_provenance = enabled;
        self
    }

    /// Tool catalog.
    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Resolve tools for a document, scoped to one item when given.
    pub fn resolve_for_item(
        &self,
        doc: &AssessmentDocument,
        item_identifier: Option<&str>,
    ) -> ResolvedTools {
        self.resolve(&ResolutionInput::from_document(doc, item_identifier))
    }

    /// Run one full resolution pass.
    pub fn resolve(&self, input: &ResolutionInput) -> ResolvedTools {
        let candidates = collect_candidates(input);
        let order = self.evaluation_order(&candidates);

        let mut provenance = self.record_provenance.then(|| {
            let mut builder = ProvenanceBuilder::new();
            register_sources(&mut builder, input);
            for tool in &order {
                builder.register_feature(tool);
                if self.catalog.is_always_available(tool) {
                    builder.mark_always_available(tool);
                }
            }
            builder
        });

        let mut decided: HashMap<String, (Precedence, DecisionAction)> = HashMap::new();
        for level in Precedence::ALL {
            for tool in &order {
                for candidate in candidates
                    .iter()
                    .filter(|c| c.precedence == level && &c.tool == tool)
                {
                    let (action, reason) = if self.catalog.is_always_available(tool) {
                        (
                            DecisionAction::Skip,
                            format!("{}; tool is always available", candidate.reason),
                        )
                    } else if let Some((winner, _)) = decided.get(tool) {
                        (
                            DecisionAction::Skip,
                            format!(
                                "{}; already decided by {} (precedence {})",
                                candidate.reason,
                                winner.rule_name(),
                                winner.level()
                            ),
                        )
                    } else {
                        decided.insert(tool.clone(), (level, candidate.action));
                        (candidate.action, candidate.reason.clone())
                    };

                    if let Some(builder) = provenance.as_mut() {
                        builder.add_decision(DecisionParams {
                            precedence: level,
                            feature_id: tool.clone(),
                            action,
                            source: candidate.source.clone(),
                            reason,
                            value: candidate.value.clone(),
                        });
                    }
                }
            }
        }

        let tools: Vec<ResolvedToolConfig> = order
            .iter()
            .map(|tool| {
                let always = self.catalog.is_always_available(tool);
                let outcome = decided.get(tool).copied();
                let enabled = always || matches!(outcome, Some((_, DecisionAction::Enable)));
                let required = !always
                    && matches!(outcome, Some((p, DecisionAction::Enable)) if p.implies_required());
                ResolvedToolConfig {
                    id: tool.clone(),
                    enabled,
                    required: required.then_some(true),
                    always_available: always.then_some(true),
                    settings: enabled
                        .then(|| input.tool_configs.get(tool.as_str()).cloned())
                        .flatten(),
                }
            })
            .collect();

        let auto_activate = auto_activation(input, &tools);
        info!(
            tools = tools.len(),
            enabled = tools.iter().filter(|t| t.enabled).count(),
            auto_activate = auto_activate.len(),
            "Resolved accommodation tools"
        );

        ResolvedTools {
            tools,
            auto_activate,
            provenance: provenance.map(ProvenanceBuilder::build),
        }
    }

    /// Catalog tools first, then unknown tools in first-seen order.
    fn evaluation_order(&self, candidates: &[Candidate]) -> Vec<String> {
        let mut order: Vec<String> = self.catalog.tools().iter().map(|t| t.id.clone()).collect();
        for candidate in candidates {
            if !order.contains(&candidate.tool) {
                order.push(candidate.tool.clone());
            }
        }
        order
    }
}

fn register_sources(builder: &mut ProvenanceBuilder, input: &ResolutionInput) {
    if let Some(policy) = &input.district_policy {
        builder.add_source(SourceType::District, to_value(policy));
    }
    if let Some(admin) = &input.test_administration {
        builder.add_source(SourceType::TestAdministration, to_value(admin));
    }
    if !input.tool_configs.is_empty() {
        builder.add_source(
            SourceType::Assessment,
            json!({ "toolConfigs": input.tool_configs }),
        );
    }
    for section in &input.scopes.sections {
        builder.add_source(
            SourceType::Section,
            json!({ "identifier": section.identifier, "settings": to_value(&section.settings) }),
        );
    }
    if let Some(item) = &input.scopes.item {
        builder.add_source(
            SourceType::Item,
            json!({ "identifier": item.identifier, "settings": to_value(&item.settings) }),
        );
    }
    if let Some(profile) = &input.profile {
        builder.add_source(SourceType::Student, to_value(profile));
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Every rule that applies to some tool, grouped by level in document order.
fn collect_candidates(input: &ResolutionInput) -> Vec<Candidate> {
    let mut out = Vec::new();
    let mut push = |precedence, raw: &str, action, source: DecisionSource, reason: String, value| {
        out.push(Candidate {
            precedence,
            tool: normalize_tool_id(raw),
            action,
            source,
            reason,
            value,
        });
    };

    if let Some(policy) = &input.district_policy {
        for tool in &policy.blocked_tools {
            push(
                Precedence::DistrictBlock,
                tool,
                DecisionAction::Block,
                DecisionSource::new(SourceType::District),
                "district policy blocks this tool".to_string(),
                None,
            );
        }
    }

    if let Some(admin) = &input.test_administration {
        for (tool, enabled) in admin.overrides() {
            let (action, verb) = if enabled {
                (DecisionAction::Enable, "enables")
            } else {
                (DecisionAction::Block, "disables")
            };
            let mut source = DecisionSource::new(SourceType::TestAdministration);
            if let Some(mode) = &admin.mode {
                source = source.with_name(mode.clone());
            }
            push(
                Precedence::TestAdministration,
                tool,
                action,
                source,
                format!("test administration {} this tool", verb),
                Some(Value::Bool(enabled)),
            );
        }
    }

    // outermost section first, the item last
    let scopes: Vec<(SourceType, &Scope)> = input
        .scopes
        .sections
        .iter()
        .map(|s| (SourceType::Section, s))
        .chain(input.scopes.item.iter().map(|i| (SourceType::Item, i)))
        .collect();
    for &(source_type, scope) in &scopes {
        for tool in &scope.settings.restricted_tools {
            push(
                Precedence::ItemRestriction,
                tool,
                DecisionAction::Block,
                DecisionSource::new(source_type).with_id(scope.identifier.clone()),
                format!("{} restricts this tool", source_type),
                None,
            );
        }
    }
    for &(source_type, scope) in &scopes {
        for tool in &scope.settings.required_tools {
            push(
                Precedence::ItemRequirement,
                tool,
                DecisionAction::Enable,
                DecisionSource::new(source_type).with_id(scope.identifier.clone()),
                format!("{} requires this tool", source_type),
                None,
            );
        }
    }

    if let Some(policy) = &input.district_policy {
        for tool in &policy.required_tools {
            push(
                Precedence::DistrictRequirement,
                tool,
                DecisionAction::Enable,
                DecisionSource::new(SourceType::District),
                "district policy requires this tool".to_string(),
                None,
            );
        }
    }

    if let Some(profile) = &input.profile {
        let prohibited: Vec<String> = profile
            .prohibited_supports
            .iter()
            .map(|s| normalize_tool_id(s))
            .collect();
        for support in &profile.supports {
            if prohibited.contains(&normalize_tool_id(support)) {
                debug!(support = %support, "Ignoring support listed as prohibited in the PNP");
                continue;
            }
            push(
                Precedence::StudentSupport,
                support,
                DecisionAction::Enable,
                DecisionSource::new(SourceType::Student).with_name(support.clone()),
                "student PNP declares this support".to_string(),
                None,
            );
        }
    }

    out
}

/// Initial-visibility pass over the enabled set. Never changes enablement.
fn auto_activation(input: &ResolutionInput, tools: &[ResolvedToolConfig]) -> Vec<String> {
    let Some(profile) = &input.profile else {
        return Vec::new();
    };
    let mut active: Vec<String> = Vec::new();
    for raw in &profile.activate_at_init {
        let id = normalize_tool_id(raw);
        let enabled = tools.iter().any(|t| t.id == id && t.enabled);
        if !enabled {
            debug!(tool = %id, "Not auto-activating a tool that is not enabled");
            continue;
        }
        if !active.contains(&id) {
            active.push(id);
        }
    }
    active
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accommodation::catalog::{CALCULATOR, COLOR_SCHEME, RULER, TEXT_TO_SPEECH};
    use crate::document::ToolScopeSettings;

    fn item_scope(required: &[&str], restricted: &[&str]) -> ScopeChain {
        ScopeChain {
            sections: Vec::new(),
            item: Some(Scope {
                identifier: "item-1".to_string(),
                settings: ToolScopeSettings {
                    required_tools: required.iter().map(|s| s.to_string()).collect(),
                    restricted_tools: restricted.iter().map(|s| s.to_string()).collect(),
                },
            }),
        }
    }

    #[test]
    fn test_same_item_restriction_beats_requirement() {
        let input = ResolutionInput {
            scopes: item_scope(&[CALCULATOR], &[CALCULATOR]),
            ..Default::default()
        };
        let resolved = AccommodationResolver::default().resolve(&input);
        assert!(!resolved.is_enabled(CALCULATOR));
        let report = resolved.provenance.unwrap();
        assert_eq!(report.winning_decision(CALCULATOR).unwrap().precedence, 3);
    }

    #[test]
    fn test_always_available_bypasses_block() {
        let input = ResolutionInput {
            district_policy: Some(DistrictPolicy {
                blocked_tools: vec![COLOR_SCHEME.to_string()],
                required_tools: vec![],
            }),
            ..Default::default()
        };
        let resolved = AccommodationResolver::default().resolve(&input);
        let tool = resolved.get(COLOR_SCHEME).unwrap();
        assert!(tool.enabled);
        assert_eq!(tool.always_available, Some(true));

        let report = resolved.provenance.unwrap();
        assert_eq!(report.decisions[0].action, DecisionAction::Skip);
    }

    #[test]
    fn test_unknown_tools_appended_after_catalog() {
        let input = ResolutionInput {
            profile: Some(PersonalNeedsProfile {
                supports: vec!["district-dictionary".to_string()],
                ..Default::default()
            }),
            ..Default::default()
        };
        let resolved = AccommodationResolver::default().resolve(&input);
        assert_eq!(resolved.tools.last().unwrap().id, "district-dictionary");
        assert!(resolved.is_enabled("district-dictionary"));
    }

    #[test]
    fn test_prohibited_support_is_ignored() {
        let input = ResolutionInput {
            profile: Some(PersonalNeedsProfile {
                supports: vec!["textToSpeech".to_string()],
                prohibited_supports: vec![TEXT_TO_SPEECH.to_string()],
                activate_at_init: vec![],
            }),
            ..Default::default()
        };
        let resolved = AccommodationResolver::default().resolve(&input);
        assert!(!resolved.is_enabled(TEXT_TO_SPEECH));
    }

    #[test]
    fn test_settings_only_for_enabled_tools() {
        let mut configs = Map::new();
        configs.insert(RULER.to_string(), json!({ "units": "metric" }));
        configs.insert(CALCULATOR.to_string(), json!({ "type": "scientific" }));
        let input = ResolutionInput {
            scopes: item_scope(&[RULER], &[]),
            tool_configs: configs,
            ..Default::default()
        };
        let resolved = AccommodationResolver::default()
            .with_provenance(false)
            .resolve(&input);
        assert_eq!(resolved.get(RULER).unwrap().settings, Some(json!({ "units": "metric" })));
        assert_eq!(resolved.get(CALCULATOR).unwrap().settings, None);
        assert!(resolved.provenance.is_none());
    }
}
