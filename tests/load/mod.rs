//! Concurrency tests against the in-memory store

mod concurrent_queuing;
