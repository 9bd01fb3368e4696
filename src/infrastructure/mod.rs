pub mod config;
pub mod error;
pub mod logging;
pub mod schedule_repository;
pub mod storage;
pub mod task_repository;
