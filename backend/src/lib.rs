//! Family tree backend library
//!
//! Multi-tenant genealogical records, tree sharing and saved views, plus the
//! administrative backup, restore and snapshot orchestration around them.
//! The binary is a thin command-line front end over these services.

pub mod app;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod security;
pub mod services;
