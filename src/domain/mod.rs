pub mod allocator;
pub mod conflict;
pub mod interval;
pub mod models;
