pub(crate) mod common;

mod installer_tests;
