//! HTTP endpoint handlers for the Mentions API.

pub mod mentions;
pub mod status;
pub mod users;
