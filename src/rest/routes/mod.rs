pub mod app;
pub mod commands;
pub mod devices;
pub mod firmware;
pub mod health;
pub mod provisioning;
