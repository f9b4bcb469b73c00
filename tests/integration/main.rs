//! Integration tests: full placement and settlement cycles against
//! in-memory collaborators and a temporary ledger directory.

mod fakes;
mod ledger_flow;
