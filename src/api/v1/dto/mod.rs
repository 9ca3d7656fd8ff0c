pub mod token;
pub mod users;
