//! Constraint enforcement.
//!
//! Key indexes back PRIMARY KEY and UNIQUE constraints. The validator checks
//! inserts and updates against a held lock set, and the delete planner
//! resolves referential actions before any row is removed.

mod cascade;
mod unique_index;
mod validator;

pub use cascade::{DeleteOutcome, DeletePlan};
pub use unique_index::UniqueIndex;
pub use validator::ConstraintValidator;

pub(crate) use validator::{build_row, describe_key, PendingKeys};
