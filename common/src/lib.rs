pub mod deployment;
pub mod models;

pub use deployment::Status;
