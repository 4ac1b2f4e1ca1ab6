//! HTTP and WebSocket front end of the polls service.

pub mod poll_logic;
