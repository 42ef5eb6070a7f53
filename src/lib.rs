//! Library crate for golare-back: the round coordinator, its scheduler and the
//! HTTP surface the chat adapter talks to.

pub mod config;
pub mod dao;
pub mod delivery;
pub mod dto;
pub mod error;
pub mod narrative;
pub mod routes;
pub mod services;
pub mod state;
