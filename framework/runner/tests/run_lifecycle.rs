mod common;

use benchfleet_core::prelude::{
    PollPolicy, PreconditionError, ProvisioningError, RuntimeError, ShutdownHandle,
};
use benchfleet_runner::prelude::*;
use benchfleet_summary_model::load_benchmark_result;
use clap::Parser;
use common::{execute_with, successful_console, Fake, Scratch};
use pretty_assertions::assert_eq;

fn assert_ordered(fake: &Fake, names: &[&str]) {
    let positions = names
        .iter()
        .map(|name| {
            fake.first_index(name)
                .unwrap_or_else(|| panic!("{name} was never called"))
        })
        .collect::<Vec<_>>();
    for (pair, names) in positions.windows(2).zip(names.windows(2)) {
        assert!(
            pair[0] < pair[1],
            "{} should come before {}",
            names[0],
            names[1]
        );
    }
}

#[tokio::test]
async fn completed_run_writes_result_and_removes_everything() {
    let fake = Fake::new();
    let scratch = Scratch::new();

    let report = execute_with(&fake, &scratch).await;

    assert_eq!(EXIT_SUCCESS, report.exit_code());
    let RunOutcome::Succeeded(flushed) = &report.outcome else {
        panic!("run did not succeed: {:?}", report.outcome);
    };
    assert_eq!(4, flushed.window_count);
    assert_eq!(RunPhase::TearingDown, report.context.phase());
    assert_eq!(4, report.context.endpoints().len());

    let result = load_benchmark_result(&flushed.result_path).unwrap();
    assert_eq!("3.12.1", result.version);
    assert_eq!(
        format!("{}:3.12.1-caged", common::REPOSITORY_URI),
        result.images.caged
    );
    let window = result.window("caged", "caged-detail", 1).unwrap();
    assert_eq!(Some(812.5), window.summary.requests_per_sec);
    assert_eq!(Some(100.0), window.summary.success_rate);
    assert!(!result.transcript().contains("cloud-init["));
    assert!(!result.transcript().contains("Linux version"));
    assert!(scratch.results_dir().join(RUN_SUMMARY_FILE).is_file());

    assert!(report.teardown.is_clean());
    assert!(report.context.registry().all().iter().all(|h| !h.is_live()));
    assert!(fake.world().live.is_empty(), "left behind: {:?}", fake.world().live);
    assert_eq!(4, fake.count("delete_load_balancer"));
    assert_eq!(2, fake.count("delete_subnet"));
    assert_eq!(1, fake.count("delete_route_table"));
    assert_eq!(1, fake.count("delete_repository"));
    assert_ordered(
        &fake,
        &[
            "terminate_instance",
            "delete_load_balancer",
            "delete_security_group",
            "delete_node_pool",
            "delete_cluster",
            "delete_internet_gateway",
            "delete_subnet",
            "delete_route_table",
            "delete_vpc",
            "delete_role",
            "delete_repository",
        ],
    );
    assert!(
        fake.first_index("detach_internet_gateway") < fake.first_index("delete_internet_gateway")
    );
}

#[tokio::test]
async fn cluster_failure_tears_down_only_what_exists() {
    let fake = Fake::new();
    {
        let mut world = fake.world();
        world.cluster_fails = true;
        world.load_balancers.clear();
    }
    let scratch = Scratch::new();

    let report = execute_with(&fake, &scratch).await;

    assert_eq!(EXIT_FAILURE, report.exit_code());
    let RunOutcome::Failed(e) = &report.outcome else {
        panic!("run did not fail: {:?}", report.outcome);
    };
    assert!(e.is::<ProvisioningError>(), "{e:?}");

    for never in [
        "create_node_pool",
        "run_instance",
        "terminate_instance",
        "delete_load_balancer",
        "delete_node_pool",
        "delete_cluster",
        "delete_security_group",
    ] {
        assert_eq!(0, fake.count(never), "{never}");
    }
    assert_eq!(2, fake.count("delete_subnet"));
    assert_eq!(1, fake.count("delete_vpc"));
    assert_eq!(2, fake.count("delete_role"));
    assert_eq!(1, fake.count("delete_repository"));
    assert!(report.teardown.is_clean());
    assert!(fake.world().live.is_empty(), "left behind: {:?}", fake.world().live);
    assert!(!scratch.results_dir().join(RUN_SUMMARY_FILE).exists());
}

#[tokio::test]
async fn fatal_output_stops_monitoring_at_that_read() {
    let fake = Fake::new();
    {
        let mut world = fake.world();
        let mut console = successful_console();
        console.insert(39, "cloud-init[812]: Segmentation fault (core dumped)".to_string());
        world.console = console;
    }
    let scratch = Scratch::new();

    let report = execute_with(&fake, &scratch).await;

    assert_eq!(EXIT_FAILURE, report.exit_code());
    let RunOutcome::Failed(e) = &report.outcome else {
        panic!("run did not fail: {:?}", report.outcome);
    };
    assert!(e.is::<RuntimeError>(), "{e:?}");
    assert!(format!("{e:?}").contains("Segmentation fault"));
    assert_eq!(40, fake.count("console_output"));
    assert_eq!(1, fake.count("diagnostics"));

    let results = scratch.results_dir();
    let transcript = std::fs::read_to_string(results.join("bench-t1-transcript.log")).unwrap();
    assert!(transcript.contains("Segmentation fault"));
    assert!(results.join("bench-t1-diagnostics.log").is_file());
    assert!(!results.join("bench-t1.json").exists());

    assert!(report.teardown.is_clean());
    assert_eq!(1, fake.count("terminate_instance"));
    assert!(fake.world().live.is_empty());
}

#[tokio::test]
async fn security_group_dependency_violations_are_retried() {
    let fake = Fake::new();
    fake.world().security_group_violations = 4;
    let scratch = Scratch::new();

    let report = execute_with(&fake, &scratch).await;

    assert_eq!(EXIT_SUCCESS, report.exit_code());
    assert_eq!(5, fake.count("delete_security_group"));
    assert_eq!(1, fake.count("delete_vpc"));
    assert!(report.teardown.is_clean());
    assert!(fake.world().live.is_empty());
}

#[tokio::test]
async fn exhausted_retries_are_reported_and_teardown_continues() {
    let fake = Fake::new();
    fake.world().security_group_violations = u32::MAX;
    let scratch = Scratch::new();

    let report = execute_with(&fake, &scratch).await;

    // The security group is still there, so the result stands but cleanup is not clean.
    assert_eq!(EXIT_SUCCESS, report.exit_code());
    assert!(!report.teardown.is_clean());
    assert!(report
        .teardown
        .failed
        .iter()
        .all(|failed| failed.starts_with("security-group")));
    assert_eq!(1, fake.count("delete_vpc"));
    assert_eq!(2, fake.count("delete_role"));
    assert_eq!(1, fake.count("delete_repository"));
}

#[tokio::test]
async fn second_teardown_deletes_nothing() {
    let fake = Fake::new();
    let scratch = Scratch::new();
    let mut report = execute_with(&fake, &scratch).await;
    assert!(!fake.destructive_calls().is_empty());
    fake.world().calls.clear();

    let again = TeardownManager::new(&fake, &scratch.config.timings)
        .teardown(&mut report.context)
        .await;

    assert_eq!(Vec::<String>::new(), fake.destructive_calls());
    assert!(again.deleted.is_empty());
    assert!(again.is_clean());
}

#[tokio::test]
async fn reused_repository_is_kept() {
    let fake = Fake::new();
    fake.world().repository_exists = true;
    let scratch = Scratch::new();

    let report = execute_with(&fake, &scratch).await;

    assert_eq!(EXIT_SUCCESS, report.exit_code());
    assert_eq!(0, fake.count("create_repository"));
    assert_eq!(0, fake.count("delete_repository"));
    let repo = report
        .context
        .registry()
        .all()
        .iter()
        .find(|h| h.kind() == ResourceKind::RegistryRepo)
        .unwrap();
    assert!(!repo.owned());
    assert!(repo.is_live());
}

fn provisioning_failure(report: &RunReport) -> &ProvisioningError {
    assert_eq!(EXIT_FAILURE, report.exit_code());
    let RunOutcome::Failed(e) = &report.outcome else {
        panic!("run did not fail: {:?}", report.outcome);
    };
    e.downcast_ref::<ProvisioningError>()
        .unwrap_or_else(|| panic!("not a provisioning failure: {e:?}"))
}

fn assert_world_empty(fake: &Fake, report: &RunReport) {
    assert!(report.teardown.is_clean(), "{:?}", report.teardown.failed);
    assert!(fake.world().live.is_empty(), "left behind: {:?}", fake.world().live);
}

#[tokio::test]
async fn load_test_that_never_completes_times_out() {
    let fake = Fake::new();
    fake.world().console.pop();
    let mut scratch = Scratch::new();
    scratch.config.timings.console_output = PollPolicy::immediate(30);

    let report = execute_with(&fake, &scratch).await;

    assert_eq!(EXIT_FAILURE, report.exit_code());
    let RunOutcome::Failed(e) = &report.outcome else {
        panic!("run did not fail: {:?}", report.outcome);
    };
    assert!(e.is::<RuntimeError>(), "{e:?}");
    assert!(e.to_string().contains("did not complete within 30 polls"), "{e}");
    assert_eq!(30, fake.count("console_output"));
    assert_eq!(1, fake.count("terminate_instance"));
    assert!(!scratch.results_dir().join("bench-t1.json").exists());
    assert_world_empty(&fake, &report);
}

#[tokio::test]
async fn cluster_that_never_becomes_active_is_deleted() {
    let fake = Fake::new();
    fake.world().cluster_stuck = true;
    let scratch = Scratch::new();

    let report = execute_with(&fake, &scratch).await;

    assert_eq!("cluster", provisioning_failure(&report).step());
    assert_eq!(0, fake.count("create_node_pool"));
    assert_eq!(1, fake.count("delete_cluster"));
    assert_world_empty(&fake, &report);
}

#[tokio::test]
async fn images_missing_from_the_registry_stop_the_run() {
    let fake = Fake::new();
    fake.world().tags_hidden = true;
    let scratch = Scratch::new();

    let report = execute_with(&fake, &scratch).await;

    assert_eq!("images", provisioning_failure(&report).step());
    assert_eq!(2, fake.count("push"));
    assert_eq!(0, fake.count("create_cluster"));
    assert_eq!(1, fake.count("delete_repository"));
    assert_world_empty(&fake, &report);
}

#[tokio::test]
async fn pods_that_never_become_ready_are_dumped() {
    let fake = Fake::new();
    fake.world().pods_pending = true;
    let scratch = Scratch::new();

    let report = execute_with(&fake, &scratch).await;

    assert_eq!("deploy", provisioning_failure(&report).step());
    assert_eq!(1, fake.count("diagnostics"));
    assert_eq!(0, fake.count("run_instance"));
    assert_eq!(1, fake.count("delete_node_pool"));
    assert_eq!(1, fake.count("delete_cluster"));
    assert_world_empty(&fake, &report);
}

#[tokio::test]
async fn load_balancer_without_hostname_stops_the_run() {
    let fake = Fake::new();
    fake.world().hostnames_withheld = true;
    let scratch = Scratch::new();

    let report = execute_with(&fake, &scratch).await;

    assert_eq!("endpoints", provisioning_failure(&report).step());
    assert!(report.context.endpoints().is_empty());
    assert_eq!(0, fake.count("run_instance"));
    assert_eq!(4, fake.count("delete_load_balancer"));
    assert_world_empty(&fake, &report);
}

#[tokio::test]
async fn interrupt_during_cluster_create_still_deletes_the_cluster() {
    let fake = Fake::new();
    fake.world().load_balancers.clear();
    let shutdown = ShutdownHandle::new();
    fake.world().interrupt_on = Some(("create_cluster".to_string(), shutdown.clone()));
    let scratch = Scratch::new();

    let report = execute(&scratch.config, &fake.providers(), &shutdown).await;

    assert_eq!(EXIT_INTERRUPTED, report.exit_code());
    assert!(matches!(report.outcome, RunOutcome::Interrupted));
    assert_eq!(0, fake.count("create_node_pool"));
    assert_eq!(1, fake.count("delete_cluster"));
    assert_eq!(1, fake.count("delete_vpc"));
    assert_eq!(2, fake.count("delete_role"));
    assert_world_empty(&fake, &report);
}

#[tokio::test]
async fn interrupt_during_instance_launch_still_terminates_it() {
    let fake = Fake::new();
    let shutdown = ShutdownHandle::new();
    fake.world().interrupt_on = Some(("run_instance".to_string(), shutdown.clone()));
    let scratch = Scratch::new();

    let report = execute(&scratch.config, &fake.providers(), &shutdown).await;

    assert_eq!(EXIT_INTERRUPTED, report.exit_code());
    assert!(matches!(report.outcome, RunOutcome::Interrupted));
    let instance = report
        .context
        .registry()
        .all()
        .iter()
        .find(|h| h.kind() == ResourceKind::ComputeInstance)
        .cloned()
        .expect("launched instance was registered");
    assert!(!instance.is_live());
    assert_eq!(
        1,
        fake.count("terminate_instance"),
        "{:?}",
        fake.destructive_calls()
    );
    assert_eq!(0, fake.count("console_output"));
    assert_world_empty(&fake, &report);
}

#[tokio::test]
async fn interrupt_while_monitoring_stops_polling() {
    let fake = Fake::new();
    let shutdown = ShutdownHandle::new();
    fake.world().interrupt_on = Some(("console_output".to_string(), shutdown.clone()));
    let scratch = Scratch::new();

    let report = execute(&scratch.config, &fake.providers(), &shutdown).await;

    assert_eq!(EXIT_INTERRUPTED, report.exit_code());
    assert_eq!(1, fake.count("console_output"));
    assert_eq!(0, fake.count("diagnostics"));
    assert_eq!(1, fake.count("terminate_instance"));
    assert!(!scratch.results_dir().join("bench-t1.json").exists());
    assert_world_empty(&fake, &report);
}

#[tokio::test]
async fn missing_manifest_fails_before_any_call() {
    let fake = Fake::new();
    let scratch = Scratch::new();
    std::fs::remove_file(scratch.config.manifest_path()).unwrap();

    let report = execute_with(&fake, &scratch).await;

    assert_eq!(EXIT_FAILURE, report.exit_code());
    let RunOutcome::Failed(e) = &report.outcome else {
        panic!("run did not fail: {:?}", report.outcome);
    };
    assert!(e.is::<PreconditionError>(), "{e:?}");
    assert_eq!(Vec::<String>::new(), fake.calls());
    assert!(report.context.registry().is_empty());
}

#[test]
fn blank_profile_is_refused() {
    let cli = BenchfleetCli::try_parse_from(["benchfleet", "--aws-profile", " "]).unwrap();

    let e = RunConfig::from_cli(&cli).unwrap_err();

    assert!(e.is::<PreconditionError>());
}
