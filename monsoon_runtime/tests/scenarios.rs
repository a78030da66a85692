//! End-to-end scenarios driving the runtime through its public API with
//! stub invokers in place of the external execution adaptors.

mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use monsoon_core::comm::{ExecutionStatus, TransferBackend};
use monsoon_core::errors::ErrorKind;
use monsoon_core::types::{DataLocation, Direction, OnFailure, ResourceSpec};
use monsoon_runtime::data::FileOps;
use monsoon_runtime::scheduler::{ConnectorRegistry, SchedulerRegistry};
use monsoon_runtime::Runtime;

use common::*;

fn start(name: &str, resources: Vec<ResourceSpec>, invoker: Box<dyn monsoon_core::comm::Invoker>)
    -> Runtime {
    let home = scratch(name);
    let mut config = test_config(&home);
    config.resources = resources;
    Runtime::start(config, invoker).unwrap()
}

fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn linear_chain_runs_in_dependency_order() {
    let inv = ManualInvoker::default();
    let rt = start("s1_chain", vec![resource("n1", 4)], Box::new(inv.clone()));
    let app = 1;
    let t1 = rt
        .ap()
        .submit(app, task("writer", vec![param("D", Direction::Out)]))
        .unwrap();
    let t2 = rt
        .ap()
        .submit(app, task("reader", vec![param("D", Direction::In)]))
        .unwrap();

    assert!(inv.wait_started(1, Duration::from_secs(2)));
    std::thread::sleep(Duration::from_millis(100));
    // the reader must not start while the writer runs
    assert_eq!(inv.started_count(), 1);
    let first = inv.complete_next(ExecutionStatus::Completed { exit_code: 0 });
    assert_eq!(first, t1);

    assert!(inv.wait_started(2, Duration::from_secs(2)));
    let second = inv.complete_next(ExecutionStatus::Completed { exit_code: 0 });
    assert_eq!(second, t2);

    rt.ap().barrier(app).unwrap();
    // one write happened, so the reader observed version 1
    let path = rt.ap().open_file(app, "D", Direction::In).unwrap();
    assert!(path.file_name().unwrap().to_str().unwrap().ends_with("_v1"));
    rt.shutdown();
}

#[test]
fn read_write_preserves_the_source_for_live_readers() {
    let inv = ManualInvoker::default();
    let rt = start("s2_preserve", vec![resource("n1", 8)], Box::new(inv.clone()));
    let app = 1;
    let writer = rt
        .ap()
        .submit(app, task("writer", vec![param("D", Direction::Out)]))
        .unwrap();
    assert!(inv.wait_started(1, Duration::from_secs(2)));
    inv.complete_task(writer, ExecutionStatus::Completed { exit_code: 0 });

    let r1 = rt
        .ap()
        .submit(app, task("reader", vec![param("D", Direction::In)]))
        .unwrap();
    let _r2 = rt
        .ap()
        .submit(app, task("reader", vec![param("D", Direction::In)]))
        .unwrap();
    let rw = rt
        .ap()
        .submit(app, task("mutator", vec![param("D", Direction::InOut)]))
        .unwrap();
    assert!(inv.wait_started(4, Duration::from_secs(2)));

    // the readers' replica of version 1
    let v1_path = inv.inputs_of(r1)[0].clone();
    assert!(v1_path.exists());
    let rw_input = inv.inputs_of(rw)[0].clone();
    // the mutator works on a staged copy named after version 2
    assert!(rw_input
        .file_name()
        .unwrap()
        .to_str()
        .unwrap()
        .ends_with("_v2"));
    assert_ne!(v1_path, rw_input);

    inv.complete_task(rw, ExecutionStatus::Completed { exit_code: 0 });
    // readers still observe version 1 while they run
    assert!(v1_path.exists());
    inv.complete_next(ExecutionStatus::Completed { exit_code: 0 });
    inv.complete_next(ExecutionStatus::Completed { exit_code: 0 });

    rt.ap().barrier(app).unwrap();
    let path = rt.ap().open_file(app, "D", Direction::In).unwrap();
    assert!(path.file_name().unwrap().to_str().unwrap().ends_with("_v2"));
    rt.shutdown();
}

static S3_REMOTE_COPIES: AtomicUsize = AtomicUsize::new(0);

fn s3_counting_connector() -> Box<dyn TransferBackend> {
    Box::new(CountingBackend::new(&S3_REMOTE_COPIES))
}

#[test]
fn shared_disk_replica_is_used_without_any_copy() {
    let inv = AutoInvoker::default();
    let home = scratch("s3_shared");
    let shared = home.join("shared");
    fs::create_dir_all(&shared).unwrap();
    fs::write(shared.join("F"), b"payload").unwrap();

    let mut config = test_config(&home);
    config.resources = vec![resource_on("n2", "h2", 4)];
    config.connector = "Counting".to_string();
    config.project.mounts = vec![
        monsoon_runtime::config::SharedDiskMount {
            disk: "S".into(),
            host: "h1".into(),
            mountpoint: shared.clone(),
        },
        monsoon_runtime::config::SharedDiskMount {
            disk: "S".into(),
            host: "h2".into(),
            mountpoint: shared.clone(),
        },
    ];
    let schedulers = SchedulerRegistry::with_defaults();
    let mut connectors = ConnectorRegistry::with_defaults();
    connectors.register("Counting", s3_counting_connector);
    let rt =
        Runtime::start_with(config, Box::new(inv.clone()), &schedulers, &connectors).unwrap();

    let app = 1;
    rt.ap()
        .register_data(
            app,
            "F",
            Some(DataLocation::Shared {
                disk: "S".into(),
                path: PathBuf::from("F"),
            }),
        )
        .unwrap();
    rt.ap()
        .submit(app, task("consume", vec![param("F", Direction::In)]))
        .unwrap();
    rt.ap().barrier(app).unwrap();

    assert_eq!(S3_REMOTE_COPIES.load(Ordering::SeqCst), 0);
    let launches = inv.launches.lock().unwrap();
    assert_eq!(launches.len(), 1);
    // the input resolved to the disk replica as seen from h2
    assert_eq!(launches[0].inputs[0].path, shared.join("F"));
    // nothing new appeared on the disk
    assert_eq!(fs::read_dir(&shared).unwrap().count(), 1);
    drop(launches);
    rt.shutdown();
}

#[test]
fn persistent_objects_resolve_through_the_object_store() {
    let inv = AutoInvoker::default();
    let rt = start("persistent", vec![resource("n1", 2)], Box::new(inv.clone()));
    let app = 1;
    rt.ap()
        .register_data(
            app,
            "P",
            Some(DataLocation::Persistent {
                id: "0bfa-33".into(),
            }),
        )
        .unwrap();
    let path = rt.ap().open_file(app, "P", Direction::In).unwrap();
    assert_eq!(path, PathBuf::from("psco://0bfa-33"));

    // a task reading it dispatches without staging any file
    rt.ap()
        .submit(app, task("consume", vec![param("P", Direction::In)]))
        .unwrap();
    rt.ap().barrier(app).unwrap();
    let launches = inv.launches.lock().unwrap();
    assert_eq!(launches.len(), 1);
    assert!(launches[0].inputs.is_empty());
    drop(launches);
    rt.shutdown();
}

#[test]
fn move_lands_at_target_and_leaves_no_source() {
    let dir = scratch("s4_move");
    let ops = FileOps::new();
    let src = dir.join("src.bin");
    let tgt = dir.join("nested").join("tgt.bin");
    fs::write(&src, b"contents").unwrap();
    ops.move_sync(src.clone(), tgt.clone()).unwrap();
    assert!(!src.exists());
    assert_eq!(fs::read(&tgt).unwrap(), b"contents");
    ops.shutdown();
}

#[test]
fn end_of_app_stalls_until_every_task_completes() {
    let inv = ManualInvoker::default();
    let mut busy = resource("n1", 2);
    busy.software.insert("sim".to_string());
    let idle = resource("n2", 2);
    let rt = Arc::new(start(
        "s5_stall",
        vec![busy, idle],
        Box::new(inv.clone()),
    ));
    let app = 1;
    let total = 10;
    for i in 0..total {
        let mut spec = task("step", vec![param(&format!("d{}", i), Direction::Out)]);
        spec.implementations[0].constraints.app_software = vec!["sim".to_string()];
        rt.ap().submit(app, spec).unwrap();
    }

    let done = Arc::new(AtomicBool::new(false));
    let rt2 = rt.clone();
    let done2 = done.clone();
    let waiter = std::thread::spawn(move || {
        rt2.ap().end_of_app(app).unwrap();
        done2.store(true, Ordering::SeqCst);
    });

    // the wait stalls the app and releases the idle resource
    assert!(wait_until(
        || rt.pool().get("n2").map(|e| e.is_released()).unwrap_or(false),
        Duration::from_secs(2),
    ));
    assert!(!done.load(Ordering::SeqCst));

    for _ in 0..total {
        inv.complete_next(ExecutionStatus::Completed { exit_code: 0 });
    }
    assert!(wait_until(|| done.load(Ordering::SeqCst), Duration::from_secs(2)));
    waiter.join().unwrap();

    // phase two reacquired the released resource
    assert!(!rt.pool().get("n2").unwrap().is_released());

    // after end-of-app no submission succeeds
    let err = rt
        .ap()
        .submit(app, task("late", vec![param("z", Direction::Out)]))
        .unwrap_err();
    assert!(err.to_string().contains("no longer accepts"));

    Arc::try_unwrap(rt).ok().unwrap().shutdown();
}

#[test]
fn unsatisfiable_constraints_surface_as_blocked() {
    let inv = AutoInvoker::default();
    let rt = start("s6_blocked", vec![resource("n1", 4)], Box::new(inv.clone()));

    let mut greedy = task("huge", vec![param("D", Direction::Out)]);
    greedy.implementations[0].constraints.processor_core_count = 999;
    rt.ap().submit(1, greedy).unwrap();
    let err = rt.ap().barrier(1).unwrap_err();
    match *err.kind() {
        ErrorKind::Blocked => {}
        ref other => panic!("unexpected error {:?}", other),
    }

    // an unrelated application is unaffected
    rt.ap()
        .submit(2, task("small", vec![param("E", Direction::Out)]))
        .unwrap();
    rt.ap().barrier(2).unwrap();
    rt.shutdown();
}

#[test]
fn failed_task_is_retried_before_giving_up() {
    let inv = ManualInvoker::default();
    let rt = start("retry", vec![resource("n1", 4)], Box::new(inv.clone()));
    let t = rt
        .ap()
        .submit(1, task("flaky", vec![param("D", Direction::Out)]))
        .unwrap();
    assert!(inv.wait_started(1, Duration::from_secs(2)));
    inv.complete_task(
        t,
        ExecutionStatus::Failed {
            message: "spurious".into(),
        },
    );
    // the retry policy re-dispatches the same task
    assert!(inv.wait_started(2, Duration::from_secs(2)));
    inv.complete_task(t, ExecutionStatus::Completed { exit_code: 0 });
    rt.ap().barrier(1).unwrap();
    rt.shutdown();
}

#[test]
fn exec_failure_with_fail_policy_reaches_the_barrier() {
    let inv = ManualInvoker::default();
    let rt = start("fail_policy", vec![resource("n1", 4)], Box::new(inv.clone()));
    let mut spec = task("fragile", vec![param("D", Direction::Out)]);
    spec.flags.on_failure = OnFailure::Fail;
    let t = rt.ap().submit(1, spec).unwrap();
    assert!(inv.wait_started(1, Duration::from_secs(2)));
    inv.complete_task(
        t,
        ExecutionStatus::Failed {
            message: "kernel panic".into(),
        },
    );
    let err = rt.ap().barrier(1).unwrap_err();
    assert!(err.to_string().contains("kernel panic"));
    rt.shutdown();
}

#[test]
fn timeout_converts_to_the_configured_failure() {
    let inv = ManualInvoker::default();
    let rt = start("timeout", vec![resource("n1", 4)], Box::new(inv.clone()));
    let mut spec = task("slow", vec![param("D", Direction::Out)]);
    spec.flags.timeout_ms = 50;
    spec.flags.on_failure = OnFailure::Fail;
    let t = rt.ap().submit(1, spec).unwrap();
    assert!(inv.wait_started(1, Duration::from_secs(2)));
    // never completed by the stub: the monitor must fire
    let err = rt.ap().barrier(1).unwrap_err();
    assert!(err.to_string().contains("timeout"));
    assert!(wait_until(
        || inv.cancelled.lock().unwrap().contains(&t),
        Duration::from_secs(1),
    ));
    rt.shutdown();
}

#[test]
fn cancel_app_stops_pending_and_running_work() {
    let inv = ManualInvoker::default();
    let rt = start("cancel", vec![resource("n1", 1)], Box::new(inv.clone()));
    let app = 1;
    let running = rt
        .ap()
        .submit(app, task("running", vec![param("A", Direction::Out)]))
        .unwrap();
    // single core: this one stays queued
    rt.ap()
        .submit(app, task("queued", vec![param("B", Direction::Out)]))
        .unwrap();
    assert!(inv.wait_started(1, Duration::from_secs(2)));

    rt.ap().cancel_app(app).unwrap();
    assert!(inv.cancelled.lock().unwrap().contains(&running));
    // the queued task never started
    assert_eq!(inv.started_count(), 1);

    let err = rt.ap().barrier(app).unwrap_err();
    match *err.kind() {
        ErrorKind::AppCancelled(cancelled_app) => assert_eq!(cancelled_app, app),
        ref other => panic!("unexpected error {:?}", other),
    }
    let err = rt
        .ap()
        .submit(app, task("late", vec![param("C", Direction::Out)]))
        .unwrap_err();
    match *err.kind() {
        ErrorKind::AppCancelled(_) => {}
        ref other => panic!("unexpected error {:?}", other),
    }
    rt.shutdown();
}

#[test]
fn reduce_task_expands_into_a_chunked_tree() {
    let inv = AutoInvoker::default();
    let home = scratch("reduce");
    let mut config = test_config(&home);
    config.resources = vec![resource("n1", 8)];
    let rt = Runtime::start(config, Box::new(inv.clone())).unwrap();
    let app = 1;
    let mut params = Vec::new();
    for i in 0..5 {
        let name = format!("i{}", i);
        let path = home.join(&name);
        fs::write(&path, b"x").unwrap();
        rt.ap()
            .register_data(
                app,
                &name,
                Some(DataLocation::Private {
                    host: "localhost".into(),
                    path,
                }),
            )
            .unwrap();
        params.push(param(&name, Direction::In));
    }
    params.push(param("R", Direction::Out));
    let mut spec = task("sum", params);
    spec.flags.is_reduce = true;
    spec.flags.reduce_chunk_size = 2;
    rt.ap().submit(app, spec).unwrap();
    rt.ap().barrier(app).unwrap();

    // 5 leaves chunked by 2: 3 + 2 + 1 sub-tasks
    assert_eq!(inv.launches.lock().unwrap().len(), 6);
    let path = rt.ap().open_file(app, "R", Direction::In).unwrap();
    assert!(path.exists());
    rt.shutdown();
}

#[test]
fn group_barrier_waits_for_the_group_only() {
    let inv = ManualInvoker::default();
    let rt = start("groups", vec![resource("n1", 4)], Box::new(inv.clone()));
    let app = 1;
    let mut grouped = task("grouped", vec![param("G", Direction::Out)]);
    grouped.flags.group = Some("phase1".to_string());
    let g = rt.ap().submit(app, grouped).unwrap();
    let other = rt
        .ap()
        .submit(app, task("other", vec![param("O", Direction::Out)]))
        .unwrap();
    assert!(inv.wait_started(2, Duration::from_secs(2)));

    inv.complete_task(g, ExecutionStatus::Completed { exit_code: 0 });
    // the group barrier passes while the ungrouped task still runs
    rt.ap().barrier_group(app, "phase1").unwrap();
    assert!(inv.pending.lock().unwrap().iter().any(|(l, _)| l.task == other));
    inv.complete_task(other, ExecutionStatus::Completed { exit_code: 0 });
    rt.ap().barrier(app).unwrap();
    rt.shutdown();
}

#[test]
fn shutdown_rejects_later_submissions() {
    let inv = AutoInvoker::default();
    let rt = start("shutdown", vec![resource("n1", 2)], Box::new(inv.clone()));
    rt.ap()
        .submit(1, task("only", vec![param("D", Direction::Out)]))
        .unwrap();
    rt.ap().barrier(1).unwrap();
    rt.ap().shutdown();
    let err = rt
        .ap()
        .submit(1, task("late", vec![param("E", Direction::Out)]))
        .unwrap_err();
    match *err.kind() {
        ErrorKind::ShutdownInProgress => {}
        ref other => panic!("unexpected error {:?}", other),
    }
    rt.shutdown();
}
