//! Compiler passes for lowering, layout negotiation, and verification.

mod decomposition;
mod format_negotiation;
mod verification;

pub use decomposition::{DEFAULT_MAX_DECOMPOSITION_DEPTH, DecompositionPass};
pub use format_negotiation::{FormatNegotiationPass, NegotiationOptions};
pub use verification::{VerificationPass, verify_graph};
