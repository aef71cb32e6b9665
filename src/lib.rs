//! Instagram relay bot library.
//!
//! A Telegram bot that takes Instagram post links, downloads the post's media
//! and details once, caches them on disk, and sends the files back.

pub mod bot;
pub mod cache;
pub mod config;
pub mod constants;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod fs_utils;
pub mod links;
pub mod post;
