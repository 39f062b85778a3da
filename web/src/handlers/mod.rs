//! Request handlers, one module per resource.

pub mod health;
pub mod live;
pub mod locations;
pub mod media;
pub mod tickets;
