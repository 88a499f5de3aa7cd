// Audit & recovery: event log, field diffs, conflict detection, restores.
// Every entity write reaches the log through store::Store::mutate_entity;
// nothing in here writes an entity without also appending its event.

pub mod conflict;
pub mod diff;
pub mod handlers;
pub mod log;
pub mod query;
pub mod restore;
