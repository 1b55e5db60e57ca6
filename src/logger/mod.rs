//! Activity logging: append-only JSONL written from a dedicated thread.

pub mod activity;
pub mod jsonl;
