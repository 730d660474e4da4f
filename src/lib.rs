//! Narrative Directives: resolves directive-bearing content text for
//! narrative games.
//!
//! Content lines carry inline control flow (`if{}`/`else{}`/`fi{}`),
//! placeholders, template references and loose-JSON action blocks. The
//! engine turns a raw line plus mutable game state into display text and a
//! set of actions, and draws weighted or chance-based picks from loot and
//! encounter pools.

pub mod core;
pub mod schema;
