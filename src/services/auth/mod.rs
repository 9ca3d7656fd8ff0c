/*
 * Responsibility
 * - password: credential hashing (bcrypt)
 * - keystore: kid -> RSA key pair, atomic reload
 * - jwt: token issue / verify
 * - policy: authentication + authorization rules
 * - service: what the pipeline and handlers call
 */
pub mod factory;
pub mod jwt;
pub mod keystore;
pub mod password;
pub mod policy;
pub mod service;

pub use factory::build_auth_service;
pub use service::{AuthService, AuthenticateError};
