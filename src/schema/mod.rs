pub mod content;
pub mod pool;
pub mod state;
