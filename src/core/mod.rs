pub mod builtins;
pub mod config;
pub mod control_flow;
pub mod directive;
pub mod dispatch;
pub mod draw;
pub mod engine;
pub mod expression;
pub mod loose_json;
pub mod pool;
pub mod registry;
