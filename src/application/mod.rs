// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Workflows built from the lower layers:
//
//   driver           — line-JSON request loop over one session
//   train_use_case   — dataset → epochs → checkpoints
//   prepare_use_case — dataset → one batch file
//
// Rules for this layer:
//   - No tensor code here (that's Layer 5)
//   - No argument parsing here (that's Layer 1)
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

pub mod driver;

pub mod train_use_case;

pub mod prepare_use_case;
