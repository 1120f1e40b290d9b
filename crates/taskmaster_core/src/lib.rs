pub mod config;
pub mod error;
pub mod mail;
pub mod model;
pub mod notify;
pub mod reminder;
pub mod storage;
pub mod task_api;
