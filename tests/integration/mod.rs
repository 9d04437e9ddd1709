//! Component-level integration tests

mod consumer_pipeline;
mod lobby_store;
