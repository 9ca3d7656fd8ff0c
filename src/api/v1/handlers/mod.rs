pub mod health;
pub mod test_auth;
pub mod token;
pub mod users;
