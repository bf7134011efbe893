pub mod provision;
pub mod release;
pub mod secret;
