//! Accommodation tool resolution.
//!
//! Decides, per item, which assistive tools a student sees. Inputs are the
//! district policy, test-administration overrides, section and item tool
//! settings, and the student's Personal Needs Profile. They are combined
//! through a fixed six-level precedence hierarchy:
//!
//! | Level | Rule                          | Effect  |
//! |-------|-------------------------------|---------|
//! | 1     | District Block                | block   |
//! | 2     | Test Administration Override  | either  |
//! | 3     | Item Restriction              | block   |
//! | 4     | Item Requirement              | enable  |
//! | 5     | District Requirement          | enable  |
//! | 6     | PNP Support                   | enable  |
//!
//! Every decision considered, including those that lost, is recorded in a
//! [`ProvenanceReport`] when provenance is enabled.

mod catalog;
mod provenance;
mod resolver;

pub use catalog::*;
pub use provenance::*;
pub use resolver::*;
