pub mod authorized_client;
pub mod commands;
pub mod session;
pub mod session_controller;
