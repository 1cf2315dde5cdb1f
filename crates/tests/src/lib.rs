//! End-to-end scenario tests for the relay workspace.

#[cfg(test)]
mod mock_node;

#[cfg(test)]
mod scenario_tests;

#[cfg(test)]
mod router_concurrency_tests;
