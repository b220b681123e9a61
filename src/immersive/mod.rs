//! Head-mounted display sessions: negotiation, teardown and controller input.

pub mod controllers;
pub mod platform;
pub mod session;
pub mod stub;
