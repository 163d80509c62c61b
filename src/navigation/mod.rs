//! Navigation structure building.
//!
//! Turns either document format into:
//! - a flat, ordered list of [`QuestionRef`]s (the default linear sequence)
//! - a tree of [`NavigationNode`]s that keeps test-part/section shape for
//!   section-aware navigation and rubric-block lookup
//!
//! Both outputs come from a single traversal so their orderings can never
//! disagree. Dangling section references, item-refs without a handle and
//! duplicate identifiers are skipped with a warning, never an error.

mod navigator;


pub use navigator::*;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::{
    AssessmentDocument, AssessmentFormat, AssessmentSection, FlatSection, RubricBlock,
};

/// A stable identifier paired with an opaque item handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRef {
    /// Stable QTI-like identifier, unique within the assessment.
    pub identifier: String,
    /// Opaque pointer resolved by an [`ItemLoader`].
    pub item_handle: String,
}

/// A node of the navigation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NavigationNode {
    /// A navigable item.
    #[serde(rename_all = "camelCase")]
    Question {
        /// Path-style node id, e.g. `tp1/s1/q1`.
        id: String,
        /// Item identifier.
        identifier: String,
        /// Optional title.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        /// Opaque item handle.
        item_handle: String,
    },
    /// A section; may contain nested sections.
    #[serde(rename_all = "camelCase")]
    Section {
        /// Path-style node id.
        id: String,
        /// Section identifier.
        identifier: String,
        /// Optional title.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        /// Passages and instructions attached to the section.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        rubric_blocks: Vec<RubricBlock>,
        /// Nested sections and questions.
        children: Vec<NavigationNode>,
    },
    /// A QTI test part.
    #[serde(rename_all = "camelCase")]
    TestPart {
        /// Path-style node id.
        id: String,
        /// Test part identifier.
        identifier: String,
        /// Optional title.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        /// Sections of this part.
        children: Vec<NavigationNode>,
    },
}

impl NavigationNode {
    /// Node id.
    pub fn id(&self) -> &str {
        match self {
            NavigationNode::Question { id, .. }
            | NavigationNode::Section { id, .. }
            | NavigationNode::TestPart { id, .. } => id,
        }
    }

    /// Node identifier.
    pub fn identifier(&self) -> &str {
        match self {
            NavigationNode::Question { identifier, .. }
            | NavigationNode::Section { identifier, .. }
            | NavigationNode::TestPart { identifier, .. } => identifier,
        }
    }

    /// Child nodes; empty for questions.
    pub fn children(&self) -> &[NavigationNode] {
        match self {
            NavigationNode::Question { .. } => &[],
            NavigationNode::Section { children, .. } | NavigationNode::TestPart { children, .. } => {
                children
            }
        }
    }

    /// Collect question refs below (and including) this node in pre-order.
    fn collect_refs(&self, out: &mut Vec<QuestionRef>) {
        match self {
            NavigationNode::Question {
                identifier,
                item_handle,
                ..
            } => out.push(QuestionRef {
                identifier: identifier.clone(),
                item_handle: item_handle.clone(),
            }),
            _ => self.children().iter().for_each(|c| c.collect_refs(out)),
        }
    }
}

/// Flatten a navigation tree into its ordered question refs.
pub fn flatten_question_refs(tree: &[NavigationNode]) -> Vec<QuestionRef> {
    let mut refs = Vec::new();
    for node in tree {
        node.collect_refs(&mut refs);
    }
    refs
}

/// Ordered question refs for a document.
pub fn extract_question_refs(doc: &AssessmentDocument) -> Vec<QuestionRef> {
    flatten_question_refs(&build_navigation_structure(doc))
}

/// Navigation tree for a document. Pure and idempotent.
pub fn build_navigation_structure(doc: &AssessmentDocument) -> Vec<NavigationNode> {
    let mut builder = TreeBuilder::default();
    let tree = match doc.format() {
        AssessmentFormat::Flat => builder.flat(doc),
        AssessmentFormat::Qti => builder.qti(doc),
    };
    debug!(
        format = %doc.format(),
        questions = builder.seen.len(),
        "Built navigation structure"
    );
    tree
}

#[derive(Default)]
struct TreeBuilder {
    seen: HashSet<String>,
}

impl TreeBuilder {
    fn question(
        &mut self,
        parent: Option<&str>,
        identifier: String,
        item_handle: String,
        title: Option<String>,
    ) -> Option<NavigationNode> {
        if !self.seen.insert(identifier.clone()) {
            warn!(identifier = %identifier, "Skipping duplicate question identifier");
            return None;
        }
        Some(NavigationNode::Question {
            id: join_id(parent, &identifier),
            identifier,
            title,
            item_handle,
        })
    }

    fn flat(&mut self, doc: &AssessmentDocument) -> Vec<NavigationNode> {
        if doc.sections.is_empty() {
            return doc
                .questions
                .iter()
                .enumerate()
                .filter_map(|(i, q)| {
                    self.question(
                        None,
                        q.resolved_identifier(i),
                        q.resolved_handle(i),
                        q.title.clone(),
                    )
                })
                .collect();
        }

        doc.sections
            .iter()
            .map(|section| self.flat_section(doc, section))
            .collect()
    }

    fn flat_section(&mut self, doc: &AssessmentDocument, section: &FlatSection) -> NavigationNode {
        let id = section.identifier.clone();
        let mut children = Vec::new();
        for reference in &section.question_ids {
            let target = doc
                .questions
                .iter()
                .enumerate()
                .find(|(i, q)| q.matches_reference(reference, *i));
            let Some((index, question)) = target else {
                warn!(
                    section = %section.identifier,
                    reference = %reference,
                    "Skipping dangling section question reference"
                );
                continue;
            };
            if let Some(node) = self.question(
                Some(&id),
                question.resolved_identifier(index),
                question.resolved_handle(index),
                question.title.clone(),
            ) {
                children.push(node);
            }
        }
        NavigationNode::Section {
            id,
            identifier: section.identifier.clone(),
            title: section.title.clone(),
            rubric_blocks: section.rubric_blocks.clone(),
            children,
        }
    }

    fn qti(&mut self, doc: &AssessmentDocument) -> Vec<NavigationNode> {
        doc.test_parts
            .iter()
            .map(|part| {
                let id = part.identifier.clone();
                let children = part
                    .sections
                    .iter()
                    .map(|s| self.qti_section(&id, s))
                    .collect();
                NavigationNode::TestPart {
                    id,
                    identifier: part.identifier.clone(),
                    title: part.title.clone(),
                    children,
                }
            })
            .collect()
    }

    fn qti_section(&mut self, parent: &str, section: &AssessmentSection) -> NavigationNode {
        let id = join_id(Some(parent), &section.identifier);
        let mut children: Vec<NavigationNode> = section
            .sections
            .iter()
            .map(|nested| self.qti_section(&id, nested))
            .collect();

        for item_ref in &section.assessment_item_refs {
            let Some(handle) = item_ref.item_handle() else {
                warn!(
                    section = %section.identifier,
                    item = %item_ref.identifier,
                    "Skipping item-ref without a resolvable item handle"
                );
                continue;
            };
            if let Some(node) = self.question(
                Some(&id),
                item_ref.identifier.clone(),
                handle.to_string(),
                item_ref.title.clone(),
            ) {
                children.push(node);
            }
        }

        NavigationNode::Section {
            id,
            identifier: section.identifier.clone(),
            title: section.title.clone(),
            rubric_blocks: section.rubric_blocks.clone(),
            children,
        }
    }
}

fn join_id(parent: Option<&str>, identifier: &str) -> String {
    match parent {
        Some(p) => format!("{}/{}", p, identifier),
        None => identifier.to_string(),
    }
}
