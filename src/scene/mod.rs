//! Scene state engine: entities, rooms, capture sessions, and the actions
//! that mutate them.
//!
//! ARCHITECTURE
//! ============
//! Nothing in this module does I/O or takes a lock. Rooms and sessions are
//! plain values; the service layer wraps each in its own mutex and drives
//! `tick` from the background task.

pub mod action;
pub mod entity;
pub mod room;
pub mod session;
pub mod user;
