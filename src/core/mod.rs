pub mod cache;
pub mod compress;
pub mod download;
pub mod engine;
pub mod error;
pub mod events;
pub mod idx;
pub mod model;
pub mod pack;
pub mod remote;
pub mod wap;
