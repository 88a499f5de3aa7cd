// Tracked entities: projects, prompts, conversations, snippets, collections.
// Stores the records and emits their audit events; contents are opaque JSON.

pub mod handlers;
pub mod hierarchy;
pub mod lifecycle;
pub mod mutations;
