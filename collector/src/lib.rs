#![recursion_limit = "256"]

pub mod command;
pub mod core;
pub mod inventory;
pub mod model;
