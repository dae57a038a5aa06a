//! Provider client and the request pipelines built on it

pub mod alt_text;
pub mod openai;
pub mod tts;
