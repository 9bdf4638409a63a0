/// UniMesh Client Library
/// Campus social networking: real-time conversations, student discovery,
/// events and organizations over a hosted Postgres/REST backend

pub mod backend;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod session;
pub mod storage;

pub use client::UniMesh;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use session::Session;
