//! Line-based chat protocol.
//!
//! Clients send newline-terminated text, one message per line, at most
//! 1024 bytes each. Every line gets exactly one reply:
//!
//! ```text
//! Request:  hello          Response: Hi there!
//! Request:  bye            Response: Goodbye!          (connection closed)
//! Request:  (empty line)   Response: Say something...
//! Request:  anything else  Response: anything else
//! ```
//!
//! Lines starting with `/` are commands:
//!
//! ```text
//! /time           Server time: HH:MM:SS
//! /echo <words>   <words joined by single spaces>
//! /quit           Goodbye!                            (connection closed)
//! ```
//!
//! Over-long lines are answered with
//! `Message too long. Max 1024 bytes allowed.` and the session continues.

pub mod frame;
pub mod handler;
pub mod parser;

pub use handler::{handle_connection, SessionSettings};
