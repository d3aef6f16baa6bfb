pub mod config;
pub mod database;
pub mod entity;
pub mod repository;
pub mod services;
pub mod store;
pub mod sweep_task;
