mod boundary_tests;
mod property_tests;
mod runtime_tests;
mod scenario_tests;
