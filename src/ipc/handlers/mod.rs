pub mod core;
pub mod profiles;
