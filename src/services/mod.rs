//! Services: coordinator operations behind the websocket dispatcher.
//!
//! ARCHITECTURE
//! ============
//! `editing` and `capture` validate requests and enqueue actions; `tick`
//! is the only code that applies them. `fanout` delivers frames to live
//! connections and `store` is the persistence seam.

pub mod capture;
pub mod editing;
pub mod fanout;
pub mod store;
pub mod tick;
