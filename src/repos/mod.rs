/*
 * Responsibility
 * - storage collaborator (users)
 */
pub mod error;
pub mod user_repo;
