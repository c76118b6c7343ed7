pub mod analysis;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod env_file;
pub mod error;
pub mod generation;
pub mod http_client;
pub mod image_client;
pub mod image_data;
pub mod llm_client;
pub mod models;
pub mod persona;
pub mod personality;
pub mod prompt;
pub mod runtime;
pub mod server;
pub mod store;
#[cfg(test)]
mod testing;
