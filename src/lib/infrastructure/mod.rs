//! Adapters to the outside world that are not tool servers.

pub mod model;
