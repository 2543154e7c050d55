pub mod commands;
pub mod mock;
