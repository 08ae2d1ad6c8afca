pub mod api;
pub mod bookings;
pub mod broadcaster;
pub mod clock;
pub mod config;
pub mod gate;
pub mod gateway;
pub mod memory;
pub mod models;
pub mod outbox;
pub mod payments;
pub mod postgres;
pub mod reaper;
pub mod registry;
pub mod schema;
pub mod service;
pub mod store;
