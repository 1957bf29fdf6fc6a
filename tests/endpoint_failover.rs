//! Endpoint failover across the RPC pool: demotion after consecutive
//! failures, and recovery gated on consecutive successful probes, driven
//! through the full `EndpointManager` rather than a bare `EndpointPool`.

mod common;

use solana_strategy_engine::endpoint_pool::EndpointManager;

use common::test_config;

#[test]
fn rpc_url_fails_over_to_the_secondary_after_threshold_failures() {
    let cfg = test_config(|c| {
        c.rpc_primary = "https://rpc-primary.example".into();
        c.rpc_secondary = "https://rpc-secondary.example".into();
        c.fail_threshold = 2;
    });
    let manager = EndpointManager::new(&cfg);

    assert_eq!(manager.rpc_url(), "https://rpc-primary.example");

    manager.rpc.report_failure("rpc-primary");
    assert_eq!(manager.rpc_url(), "https://rpc-primary.example", "one failure is below threshold");

    manager.rpc.report_failure("rpc-primary");
    assert_eq!(manager.rpc_url(), "https://rpc-secondary.example", "demoted after the second consecutive failure");
}

#[test]
fn a_success_in_between_resets_the_consecutive_failure_count() {
    let cfg = test_config(|c| {
        c.rpc_primary = "https://rpc-primary.example".into();
        c.rpc_secondary = "https://rpc-secondary.example".into();
        c.fail_threshold = 2;
    });
    let manager = EndpointManager::new(&cfg);

    manager.rpc.report_failure("rpc-primary");
    manager.rpc.report_success("rpc-primary");
    manager.rpc.report_failure("rpc-primary");
    assert_eq!(manager.rpc_url(), "https://rpc-primary.example", "failure count was reset by the success in between");
}
