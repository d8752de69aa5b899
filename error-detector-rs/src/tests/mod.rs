//! Engine-level tests for the error detector
//!
//! The unit tests of each component live beside the code; these exercise
//! the detector as a whole and its HTTP collaborators.

pub mod http_mock_tests;
