/*
 * Responsibility
 * - crate のモジュール構成 (binary と integration test の両方から使う)
 */
pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod repos;
pub mod server;
pub mod services;
pub mod state;
