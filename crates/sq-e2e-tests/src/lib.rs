//! End-to-end tests for sshq live in `tests/`; this library is empty.
