//! # Assessment Player Core
//!
//! Decision logic for a QTI-like assessment player, independent of any UI:
//!
//! - **Navigation**: flat or QTI test-part/section documents become one
//!   ordered list of question references and a tree for section-aware
//!   navigation and rubric-block lookup.
//! - **Sessions**: one deterministic, persisted record per attempt
//!   (assessment, assignment, user), restored and realigned on reload.
//! - **Accommodations**: a six-level precedence hierarchy decides which
//!   assistive tools are enabled, with a provenance trail explaining each
//!   outcome.
//!
//! ## Architecture
//!
//! ```text
//! AssessmentDocument ──► navigation ──► Navigator ──► ItemLoader (host)
//!         │                   │
//!         │                   └──► SessionStore ──► KeyValueStorage (host)
//!         │
//!         └──► AccommodationResolver ──► ResolvedTools + ProvenanceReport
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use assessment_player_core::{
//!     AccommodationResolver, AssessmentDocument, AttemptKey, Navigator, SessionStore,
//! };
//!
//! let doc = AssessmentDocument::from_path("assessment.json")?;
//! let navigator = Navigator::new(&doc);
//! let store = SessionStore::in_memory();
//! let session = store.load_or_create(
//!     &AttemptKey::new(&doc.assessment_id()).with_user("u-1"),
//!     &navigator.item_identifiers(),
//!     &doc.context_declarations,
//! );
//! let tools = AccommodationResolver::default().resolve_for_item(&doc, session.current_item());
//! ```

#![warn(missing_docs)]

/// Accommodation tool resolution and provenance.
pub mod accommodation;
/// Configuration loaded from environment variables.
pub mod config;
/// Assessment document model.
pub mod document;
/// Error types and result aliases.
pub mod error;
/// Question-ref extraction, navigation tree and navigator.
pub mod navigation;
/// Attempt session records and their persistence.
pub mod session;
/// Key/value storage backends.
pub mod storage;

pub use accommodation::{AccommodationResolver, ProvenanceReport, ResolvedTools};
pub use config::Config;
pub use document::{detect_format, AssessmentDocument, AssessmentFormat};
pub use error::{AppError, AppResult};
pub use navigation::{
    build_navigation_structure, extract_question_refs, NavigationNode, Navigator, QuestionRef,
};
pub use session::{AttemptKey, SessionStore, TestSession};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage};
