// TextMate grammar engine - exposes all core modules for testing

// Core modules at root level
pub mod config;
pub mod lines_iter;

// Organized modules
pub mod primitives;

pub use config::{EndPatternPriority, TokenizerConfig};
pub use primitives::grammar::{GrammarDescriptor, GrammarError, GrammarRegistry};
pub use primitives::textmate_engine::TextMateEngine;
pub use primitives::tokenizer::{StateStack, TokenSpan, Tokenizer};
