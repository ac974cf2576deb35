pub mod app;
pub mod down;
pub mod login;
