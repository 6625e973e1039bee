// Tests that drive the whole subsystem through a mock VM binding.
//
// Each context owns its binding, so tests do not share any global state and may run in
// parallel. All the tests with prefix 'mock_test_' use MockVM.

mod mock_tests;
