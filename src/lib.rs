//! Library root for the `civic_portal` crate

// Core error handling
pub mod api_errors;
pub mod errors;

// Storage
pub mod document_store;
pub mod document_store_memory;
pub mod document_store_sled;

// Records & validation
pub mod input_validator;
pub mod models;
pub mod role;
pub mod timefmt;

// Event logging
pub mod event_logger;
pub mod log_query;
pub mod log_sink;
pub mod sanitizer;
pub mod session_context;

// Identity & access
pub mod auth;
pub mod identity;
pub mod security;

// Portal workflows
pub mod applications;
pub mod notifications;
pub mod services;
pub mod status_tracker;

// Configuration & CLI
pub mod cli;
pub mod config_loader;

// Web server interface
pub mod app_state;
pub mod portal_web;
