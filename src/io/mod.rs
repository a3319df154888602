pub mod counts;
pub mod settings;
pub mod state_log;
pub mod summary;
