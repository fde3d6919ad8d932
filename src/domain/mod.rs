// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Pure order rules: validation, identifiers and the status lifecycle.
// Nothing here touches the store, the queue or the network.
//
// ============================================================================

pub mod order;
