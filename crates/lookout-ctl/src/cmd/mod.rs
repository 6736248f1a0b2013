//! CLI command modules.

pub mod events;
pub mod groups;
pub mod http;
pub mod registrars;
pub mod status;
