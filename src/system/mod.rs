pub mod cache;
pub mod collector;
pub mod control;
pub mod derive;
pub mod platform;
pub mod raw;
pub mod scheduler;
pub mod snapshot;
