// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Pure order rules with no I/O. Repositories, the broker and the stock
// validator live outside this module and depend on it, never the reverse.
//
// ============================================================================

pub mod order;
