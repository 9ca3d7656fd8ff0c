/*
 * Responsibility
 * - request pipeline の各 stage
 * - pipeline::apply で全 route 共通の stage を順序どおりに掛ける
 * - auth::protect で route 単位の authenticate / authorize を掛ける
 */
pub mod auth;
pub mod context;
pub mod drain;
pub mod errors;
pub mod metrics;
pub mod panics;
pub mod pipeline;
pub mod trace;
