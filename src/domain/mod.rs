// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust types describing what the engine works with:
// schemas, shapes, errors and configuration.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// Engine knobs loaded from `--config`
pub mod config;

// Typed errors for construction and execution
pub mod error;

// Typed view over a JSON-Schema document
pub mod schema;

// Labeled-dimension shape metadata
pub mod shape;

// Core abstractions (traits) that other layers implement
pub mod traits;
