pub mod adapter;
pub mod backend;
pub mod bot;
pub mod cli;
pub mod command;
pub mod config;
pub mod daemon;
pub mod error;
pub mod magnet;
pub mod notify;
pub mod task;
pub mod tracker;
pub mod xunlei;

pub use adapter::MagnetAdapter;
pub use magnet::MagnetLink;
