//! Persistence layer for the armada scheduler: connection pool, runtime
//! migrations, row models, and the query functions for the `tasks` and
//! `instances` relations.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
