//! State Management Module
//!
//! Durable acceptor state and the learned value.

mod store;

pub use store::AcceptorStore;
