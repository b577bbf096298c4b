mod common;

mod concurrency_tests;
mod lifecycle_tests;
mod persistence_tests;
