pub mod config;
pub mod flatten;
pub mod model;
pub mod render;
pub mod search;
pub mod source;
pub mod tree;
pub mod tui;
pub mod viewport;
