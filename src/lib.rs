pub mod app;
pub mod classifier;
pub mod error;
pub mod notify;
pub mod prompting;
pub mod reply;
pub mod store;
pub mod types;
