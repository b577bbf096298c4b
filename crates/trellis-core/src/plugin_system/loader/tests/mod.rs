mod static_tests;
