pub mod mock;

mod cache;
mod extract;
mod platform;
