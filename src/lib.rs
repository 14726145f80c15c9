//! Pagelisting - page listing site with a session-authenticated admin area
//!
//! This library provides the authentication core (password hashing, admin
//! accounts, rotating server-side sessions) and the HTTP host around it.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
