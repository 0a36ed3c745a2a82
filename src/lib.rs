pub mod action;
pub mod action_handling;
pub mod config;
pub mod console;
pub mod crypto;
pub mod data;
pub mod poll;
pub mod primitive;
pub mod response;
pub mod session;
pub mod time_frame;
pub mod user;
pub mod validation;
