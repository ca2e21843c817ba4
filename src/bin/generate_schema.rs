//! Generate JSON Schemas for grammar descriptors and the tokenizer config
//!
//! Usage:
//!   cargo run --features dev-bins --bin generate_schema -- grammar > grammar-schema.json
//!   cargo run --features dev-bins --bin generate_schema -- config > config-schema.json

use fresh_textmate::{GrammarDescriptor, TokenizerConfig};
use schemars::schema_for;

fn main() {
    let which = std::env::args().nth(1).unwrap_or_else(|| "grammar".to_string());
    let schema = match which.as_str() {
        "config" => schema_for!(TokenizerConfig),
        _ => schema_for!(GrammarDescriptor),
    };
    let json = serde_json::to_string_pretty(&schema).expect("Failed to serialize schema");
    println!("{}", json);
}
