//! Low-level primitives of the grammar engine
//!
//! Leaves first:
//!
//! | Module | Role |
//! |--------|------|
//! | `matcher` | Oniguruma patterns with `\A`/`\G` anchor handling |
//! | `grammar` | Descriptors, compiled rules and the registry |
//! | `resolver` | Include expansion, one frame at a time |
//! | `tokenizer` | Line tokenizer and its state stack |
//! | `textmate_engine` | Document driver with a per-line cache |

pub mod grammar;
pub mod matcher;
pub mod resolver;
pub mod textmate_engine;
pub mod tokenizer;

pub use grammar::GrammarRegistry;
