pub mod rest;
pub mod ws;

// =============================================================================
// End-to-end tests over a real socket
// =============================================================================
