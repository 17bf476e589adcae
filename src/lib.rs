pub mod app;
pub mod auth;
pub mod browse;
pub mod config;
pub mod favorites;
pub mod models;
pub mod storage;
pub mod tmdb;
