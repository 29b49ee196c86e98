pub mod config;
pub mod context_scope;
pub mod execution;
pub mod logging;
pub mod models;
pub mod orchestration;

pub use context_scope::current_context;
