//! Outreach — paced, deduplicated bulk messaging over a chat session.

pub mod channels;
pub mod config;
pub mod contacts;
pub mod delivery;
pub mod error;
pub mod pacing;
pub mod report;
pub mod store;
pub mod templates;
