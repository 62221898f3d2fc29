pub mod coordinator;
pub mod events;
pub mod freshness;
pub mod sink;
