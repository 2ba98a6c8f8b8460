pub(crate) mod support;

mod cancellation_tests;
