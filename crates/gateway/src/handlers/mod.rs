//! HTTP request handlers

pub mod admin;
pub mod chat;
pub mod documents;
pub mod health;
pub mod query;
