// OpenAI Responses driver for Neurochat

pub mod client;
pub mod types;

pub use client::OpenAIResponsesClient;
