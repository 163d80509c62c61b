//! Section-aware navigation over a built structure.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{flatten_question_refs, NavigationNode, QuestionRef};
use crate::document::{AssessmentDocument, RubricBlock};
use crate::error::{SessionError, SessionResult};

/// Resolved navigation state exposed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationState {
    /// Current ordinal position, `-1` before the first item.
    pub current_index: i64,
    /// Number of navigable items.
    pub total_items: usize,
    /// Whether a following item exists.
    pub can_next: bool,
    /// Whether a preceding item exists.
    pub can_previous: bool,
    /// Identifier of the section owning the current item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_section: Option<String>,
    /// Number of sections that own items, when the assessment has sections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_sections: Option<usize>,
}

/// Context handed to an [`ItemLoader`].
#[derive(Debug, Clone, Copy)]
pub struct LoadContext<'a> {
    /// Identifier of the item being loaded.
    pub item_identifier: &'a str,
    /// Ordinal position of the item.
    pub position: usize,
    /// Section owning the item.
    pub section_identifier: Option<&'a str>,
}

/// Resolves opaque item handles to item content.
pub trait ItemLoader {
    /// Loaded item representation.
    type Item;
    /// Loader failure.
    type Error: std::fmt::Display;

    /// Load one item.
    fn load_item(&self, item_handle: &str, context: &LoadContext<'_>)
        -> Result<Self::Item, Self::Error>;
}

#[derive(Debug, Clone)]
struct SectionEntry {
    identifier: String,
    rubric_blocks: Vec<RubricBlock>,
    owns_items: bool,
}

/// Navigation over one assessment load.
///
/// Built once from the document; rebuilt, never mutated, when the
/// document changes.
#[derive(Debug, Clone)]
pub struct Navigator {
    refs: Vec<QuestionRef>,
    tree: Vec<NavigationNode>,
    sections: Vec<SectionEntry>,
    /// Per item: indices into `sections`, outermost first.
    chains: Vec<Vec<usize>>,
    /// Indices into `sections` that directly own items, in order.
    navigable: Vec<usize>,
}

impl Navigator {
    /// Build navigation for a document.
    pub fn new(doc: &AssessmentDocument) -> Self {
        Self::from_tree(super::build_navigation_structure(doc))
    }

    /// Build navigation from an existing tree.
    pub fn from_tree(tree: Vec<NavigationNode>) -> Self {
        let refs = flatten_question_refs(&tree);
        let mut nav = Self {
            refs,
            tree: Vec::new(),
            sections: Vec::new(),
            chains: Vec::new(),
            navigable: Vec::new(),
        };
        let mut stack = Vec::new();
        for node in &tree {
            nav.index_node(node, &mut stack);
        }
        nav.tree = tree;
        nav
    }

    fn index_node(&mut self, node: &NavigationNode, stack: &mut Vec<usize>) {
        match node {
            NavigationNode::Question { .. } => {
                if let Some(&owner) = stack.last() {
                    if !self.sections[owner].owns_items {
                        self.sections[owner].owns_items = true;
                        self.navigable.push(owner);
                    }
                }
                self.chains.push(stack.clone());
            }
            NavigationNode::Section {
                identifier,
                rubric_blocks,
                children,
                ..
            } => {
                self.sections.push(SectionEntry {
                    identifier: identifier.clone(),
                    rubric_blocks: rubric_blocks.clone(),
                    owns_items: false,
                });
                stack.push(self.sections.len() - 1);
                for child in children {
                    self.index_node(child, stack);
                }
                stack.pop();
            }
            NavigationNode::TestPart { children, .. } => {
                for child in children {
                    self.index_node(child, stack);
                }
            }
        }
    }

    /// Ordered question refs.
    pub fn question_refs(&self) -> &[QuestionRef] {
        &self.refs
    }

    /// Navigation tree.
    pub fn tree(&self) -> &[NavigationNode] {
        &self.tree
    }

    /// Ordered item identifiers.
    pub fn item_identifiers(&self) -> Vec<String> {
        self.refs.iter().map(|r| r.identifier.clone()).collect()
    }

    /// Number of navigable items.
    pub fn total_items(&self) -> usize {
        self.refs.len()
    }

    /// Identifiers of the sections that directly own items, in order.
    pub fn sections(&self) -> Vec<&str> {
        self.navigable
            .iter()
            .map(|&i| self.sections[i].identifier.as_str())
            .collect()
    }

    /// Position of an item identifier.
    pub fn index_of(&self, identifier: &str) -> Option<usize> {
        self.refs.iter().position(|r| r.identifier == identifier)
    }

    /// Validate an ordinal position; `-1` means not started.
    pub fn check_index(&self, index: i64) -> SessionResult<()> {
        if index == -1 || (index >= 0 && (index as usize) < self.refs.len()) {
            Ok(())
        } else {
            Err(SessionError::IndexOutOfRange {
                index,
                total: self.refs.len(),
            })
        }
    }

    /// Navigation state at a position.
    pub fn state(&self, index: i64) -> SessionResult<NavigationState> {
        self.check_index(index)?;
        let total = self.refs.len();
        let current_section = usize::try_from(index)
            .ok()
            .and_then(|i| self.owning_section(i))
            .map(String::from);
        Ok(NavigationState {
            current_index: index,
            total_items: total,
            can_next: index + 1 < total as i64,
            can_previous: index > 0,
            current_section,
            total_sections: (!self.navigable.is_empty()).then_some(self.navigable.len()),
        })
    }

    /// Validated target of a direct jump.
    pub fn go_to(&self, index: usize) -> SessionResult<usize> {
        if index >= self.refs.len() {
            return Err(SessionError::IndexOutOfRange {
                index: i64::try_from(index).unwrap_or(i64::MAX),
                total: self.refs.len(),
            });
        }
        Ok(index)
    }

    /// Following position, if any.
    pub fn next(&self, current: i64) -> Option<usize> {
        let next = current + 1;
        (next >= 0 && (next as usize) < self.refs.len()).then_some(next as usize)
    }

    /// Preceding position, if any.
    pub fn previous(&self, current: i64) -> Option<usize> {
        (current > 0 && (current as usize) <= self.refs.len()).then(|| current as usize - 1)
    }

    /// First item of the section after the current item's section.
    pub fn next_section(&self, current: i64) -> Option<usize> {
        let target = match usize::try_from(current).ok().and_then(|i| self.owner_rank(i)) {
            Some(rank) => rank + 1,
            None if current < 0 => 0,
            None => return None,
        };
        self.first_item_of_rank(target)
    }

    /// First item of the section before the current item's section.
    pub fn previous_section(&self, current: i64) -> Option<usize> {
        let rank = usize::try_from(current).ok().and_then(|i| self.owner_rank(i))?;
        rank.checked_sub(1).and_then(|r| self.first_item_of_rank(r))
    }

    /// Section directly owning an item.
    pub fn section_for_item(&self, identifier: &str) -> Option<&str> {
        self.index_of(identifier).and_then(|i| self.owning_section(i))
    }

    /// Rubric blocks of every section enclosing an item, outermost first.
    pub fn rubric_blocks_for_item(&self, identifier: &str) -> Vec<&RubricBlock> {
        let Some(index) = self.index_of(identifier) else {
            return Vec::new();
        };
        self.chains[index]
            .iter()
            .flat_map(|&s| self.sections[s].rubric_blocks.iter())
            .collect()
    }

    /// Load the item at a position. Loader failures surface as `None`.
    pub fn load_item<L: ItemLoader>(&self, index: usize, loader: &L) -> Option<L::Item> {
        let question = self.refs.get(index)?;
        let context = LoadContext {
            item_identifier: &question.identifier,
            position: index,
            section_identifier: self.owning_section(index),
        };
        match loader.load_item(&question.item_handle, &context) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(
                    item = %question.identifier,
                    handle = %question.item_handle,
                    error = %e,
                    "Item failed to load"
                );
                None
            }
        }
    }

    fn owning_section(&self, index: usize) -> Option<&str> {
        self.chains
            .get(index)
            .and_then(|chain| chain.last())
            .map(|&s| self.sections[s].identifier.as_str())
    }

    fn owner_rank(&self, index: usize) -> Option<usize> {
        let owner = *self.chains.get(index)?.last()?;
        self.navigable.iter().position(|&s| s == owner)
    }

    fn first_item_of_rank(&self, rank: usize) -> Option<usize> {
        let section = *self.navigable.get(rank)?;
        self.chains
            .iter()
            .position(|chain| chain.last() == Some(&section))
    }
}
