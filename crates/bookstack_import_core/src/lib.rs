pub mod cache;
pub mod client;
pub mod config;
pub mod import;
pub mod model;
pub mod rewrite;
pub mod scanner;

#[cfg(test)]
mod testing;
