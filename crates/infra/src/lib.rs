//! Infrastructure layer: event persistence, command orchestration, the
//! availability engine, read models and the expiration sweeper.

pub mod command_dispatcher;
pub mod engine;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod sharing;
pub mod sweeper;
