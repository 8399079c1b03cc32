//! Opaque identifier generation.
//!
//! All identifiers in the data model are opaque strings. We use ULIDs
//! (lexicographically sortable, time-ordered) so that `events_for_plan`
//! and similar listings come back roughly insertion-ordered even without
//! an explicit `ORDER BY`.

use ulid::Ulid;

/// Generate a new opaque identifier.
pub fn new_id() -> String {
    Ulid::new().to_string()
}
