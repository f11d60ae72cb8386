//! Library module for document discovery
//!
//! Walks the working tree for documents and staging artifacts.

mod scanner;

pub use scanner::*;
