//! Integration tests for aevo-bot.
//!
//! These tests verify the interaction between components:
//! - WebSocket session lifecycle against a local server
//! - Fill-driven replacement end to end

pub mod common;
