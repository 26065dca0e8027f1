//! Workspace root crate. Exists to host the cross-crate integration
//! tests under `tests/`; the published crates live in the member
//! directories.
