//! Per-dialect JSON wire shapes. Both modules parse a client
//! body into the dialect-independent `RequestTree` the core crate works on.

pub mod claude;
pub mod openai;
