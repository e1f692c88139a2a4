//! End-to-end service behavior over a scripted database collaborator.

mod common;

use common::{request, service, table, FakeDatabase};
use queryjobs::{
    Config, JobEvent, JobOutput, JobResponse, JobStatus, MemoryStore, OutputFormat, QueryService,
    ServiceError, SubmitError, SubmitRequest,
};
use std::sync::Arc;
use std::time::Duration;

/// Poll until the job turns terminal and yield its payload
fn fetch_output(service: &QueryService, owner: u64, job_id: &str) -> JobOutput {
    for _ in 0..500 {
        match service.job_response(owner, job_id) {
            Ok(JobResponse::Output(output)) => return output,
            Ok(JobResponse::Status(_)) => std::thread::sleep(Duration::from_millis(5)),
            Err(e) => panic!("job disappeared while polling: {e}"),
        }
    }
    panic!("job did not reach a terminal state in time");
}

#[test]
fn test_submit_poll_retrieve_json() {
    let db = FakeDatabase::new();
    let service = service(&db, 1);

    let descriptor = service.submit(1001, &request("SELECT * FROM contacts")).expect("accepted");
    assert_eq!(descriptor.status, JobStatus::Pending);
    assert_eq!(descriptor.user_id, 1001);

    let output = fetch_output(&service, 1001, &descriptor.job_id);
    assert_eq!(output.status, JobStatus::Complete);
    assert_eq!(output.content_type, "application/json");

    let json: serde_json::Value =
        serde_json::from_slice(&output.body).expect("valid json payload");
    let rows = json["rows"].as_array().expect("rows array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["col1"], "alpha");
}

#[test]
fn test_terminal_result_is_retrieved_at_most_once() {
    let db = FakeDatabase::new();
    let service = service(&db, 1);

    let descriptor = service.submit(1, &request("SELECT * FROM t")).expect("accepted");
    fetch_output(&service, 1, &descriptor.job_id);

    match service.job_response(1, &descriptor.job_id) {
        Err(ServiceError::NotFound) => {}
        other => panic!("expected not-found after retrieval, got {other:?}"),
    }
}

#[test]
fn test_owners_cannot_see_each_others_jobs() {
    let db = FakeDatabase::new().with_query_delay(Duration::from_millis(100));
    let service = service(&db, 1);

    let descriptor = service.submit(1, &request("SELECT * FROM t")).expect("accepted");

    // The job exists for its owner and nobody else, under any operation
    assert!(service.job_response(1, &descriptor.job_id).is_ok());
    assert!(matches!(
        service.job_response(2, &descriptor.job_id),
        Err(ServiceError::NotFound)
    ));
    assert!(matches!(
        service.cancel(2, &descriptor.job_id),
        Err(ServiceError::NotFound)
    ));
    assert_eq!(service.list(1).len(), 1);
    assert!(service.list(2).is_empty());
}

#[test]
fn test_submission_validation() {
    let db = FakeDatabase::new();
    let service = service(&db, 1);

    assert!(matches!(
        service.submit(1, &request("")),
        Err(SubmitError::Validation(_))
    ));
    assert!(matches!(
        service.submit(1, &request("SELECT 1; SELECT 2")),
        Err(SubmitError::Validation(_))
    ));
    assert!(matches!(
        service.submit(1, &request("DELETE FROM t")),
        Err(SubmitError::Unsupported(_))
    ));
    assert!(matches!(
        service.submit(1, &request("CREATE TABLE t (id int)")),
        Err(SubmitError::Unsupported(_))
    ));
}

#[test]
fn test_default_limit_applies_unless_query_has_one() {
    let db = FakeDatabase::new();
    let service = service(&db, 1);

    let a = service.submit(1, &request("SELECT * FROM t")).expect("accepted");
    fetch_output(&service, 1, &a.job_id);

    let b = service.submit(1, &request("SELECT * FROM t LIMIT 7")).expect("accepted");
    fetch_output(&service, 1, &b.job_id);

    let statements = db.statements();
    assert!(statements[0].contains("LIMIT 25"));
    assert!(statements[1].contains("LIMIT 7"));
    assert!(!statements[1].contains("LIMIT 25"));
}

#[test]
fn test_failed_job_yields_error_text() {
    let db = FakeDatabase::new().failing_on("broken_table");
    let service = service(&db, 1);

    let descriptor = service
        .submit(1, &request("SELECT * FROM broken_table"))
        .expect("accepted");
    let output = fetch_output(&service, 1, &descriptor.job_id);
    assert!(output.is_failure());
    assert_eq!(output.content_type, "text/plain");
    assert!(String::from_utf8_lossy(&output.body).contains("broken_table"));

    // Failure payloads obey at-most-once retrieval too
    assert!(matches!(
        service.job_response(1, &descriptor.job_id),
        Err(ServiceError::NotFound)
    ));
}

#[test]
fn test_csv_output_content_type_and_shape() {
    let db = FakeDatabase::new();
    let service = service(&db, 1);

    let mut req = request("SELECT * FROM t");
    req.format = OutputFormat::Csv;
    let descriptor = service.submit(1, &req).expect("accepted");
    let output = fetch_output(&service, 1, &descriptor.job_id);

    assert_eq!(output.content_type, "text/csv");
    let text = String::from_utf8(output.body).expect("utf8");
    assert_eq!(text, "col0,col1\r\n1,alpha\r\n");
}

#[test]
fn test_canceled_pending_job_never_touches_the_database() {
    // One worker, held busy by a slow blocker, so the victim stays queued
    let db = FakeDatabase::new().with_query_delay(Duration::from_millis(300));
    let service = service(&db, 1);

    let blocker = service.submit(1, &request("SELECT * FROM blocker_table")).expect("accepted");
    let victim = service.submit(1, &request("SELECT * FROM victim_table")).expect("accepted");

    let descriptor = service.cancel(1, &victim.job_id).expect("canceled");
    assert_eq!(descriptor.status, JobStatus::Canceled);
    assert!(matches!(
        service.job_response(1, &victim.job_id),
        Err(ServiceError::NotFound)
    ));

    fetch_output(&service, 1, &blocker.job_id);
    assert!(!db.statements().iter().any(|s| s.contains("victim_table")));
}

#[test]
fn test_temp_table_is_created_and_dropped_on_success() {
    let db = FakeDatabase::new();
    let service = service(&db, 1);

    let descriptor = service
        .submit(
            1,
            &request("CREATE TEMP TABLE scratch AS SELECT * FROM src; SELECT * FROM scratch"),
        )
        .expect("accepted");
    let output = fetch_output(&service, 1, &descriptor.job_id);
    assert_eq!(output.status, JobStatus::Complete);

    let statements = db.statements();
    let creates = statements.iter().filter(|s| s.contains("CREATE TEMP TABLE")).count();
    let drops = statements.iter().filter(|s| s.contains("DROP TABLE scratch")).count();
    assert_eq!(creates, 1);
    assert_eq!(drops, 1);
    // The create precedes the SELECT, which precedes the drop
    assert!(statements[0].contains("CREATE TEMP TABLE"));
    assert!(statements[1].contains("FROM scratch"));
    assert!(statements[2].contains("DROP TABLE"));
}

#[test]
fn test_cancel_asks_the_engine_to_abort_the_backend() {
    let db = FakeDatabase::new()
        .with_query_delay(Duration::from_millis(200))
        .with_backend(4242);
    let service = service(&db, 1);

    let descriptor = service.submit(1, &request("SELECT * FROM t")).expect("accepted");
    // Give the worker time to start the query before canceling
    std::thread::sleep(Duration::from_millis(50));
    service.cancel(1, &descriptor.job_id).expect("canceled");

    assert_eq!(db.kills(), vec![4242]);
}

#[test]
fn test_cancel_unknown_job_is_not_found() {
    let db = FakeDatabase::new();
    let service = service(&db, 1);
    assert!(matches!(
        service.cancel(1, "no-such-job"),
        Err(ServiceError::NotFound)
    ));
}

#[test]
fn test_synchronous_submit_blocks_for_the_result() {
    let db = FakeDatabase::new();
    let service = service(&db, 1);

    let output = service
        .submit_sync(1, &request("SELECT * FROM t"))
        .expect("completes");
    assert_eq!(output.status, JobStatus::Complete);
    let json: serde_json::Value = serde_json::from_slice(&output.body).expect("valid json");
    assert_eq!(json["rows"].as_array().expect("rows").len(), 1);

    // Nothing lingers after a synchronous retrieval
    assert!(service.list(1).is_empty());
}

#[test]
fn test_synchronous_submit_times_out() {
    let db = FakeDatabase::new().with_query_delay(Duration::from_millis(1500));
    let config = Config {
        workers: 1,
        sync_wait: 1,
        ..Config::default()
    };
    let service = QueryService::new(config, Arc::new(db.clone()), Arc::new(MemoryStore::new()));

    let err = service
        .submit_sync(1, &request("SELECT * FROM t"))
        .expect_err("times out");
    assert!(matches!(err, ServiceError::WaitTimeout));
}

#[test]
fn test_file_store_backed_service_cleans_up_after_retrieval() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = FakeDatabase::new();
    let config = Config {
        workers: 1,
        output: queryjobs::OutputConfig {
            dir: dir.path().to_path_buf(),
        },
        ..Config::default()
    };
    let service = QueryService::with_file_store(config, Arc::new(db)).expect("store opens");

    let descriptor = service.submit(1, &request("SELECT * FROM t")).expect("accepted");
    let output = fetch_output(&service, 1, &descriptor.job_id);
    assert_eq!(output.status, JobStatus::Complete);

    // Retrieval removed the payload file; only the owner directory remains
    let owner_dir = dir.path().join("1");
    let leftovers = std::fs::read_dir(&owner_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[test]
fn test_count_request_appends_total_rows() {
    let db = FakeDatabase::new();
    let service = service(&db, 1);

    let req = SubmitRequest {
        query: "SELECT * FROM t".to_string(),
        count: true,
        metadata: true,
        ..Default::default()
    };
    let descriptor = service.submit(1, &req).expect("accepted");
    let output = fetch_output(&service, 1, &descriptor.job_id);

    let json: serde_json::Value = serde_json::from_slice(&output.body).expect("valid json");
    assert_eq!(json["total_rows"], 1000);
    assert_eq!(json["metadata"][0]["name"], "col0");
    assert!(db.statements().iter().any(|s| s.contains("count(*)")));
}

#[test]
fn test_tables_filters_system_schemas() {
    let db = FakeDatabase::new().with_tables(vec![
        table("contacts", Some("public")),
        table("pg_class", Some("pg_catalog")),
        table("columns", Some("information_schema")),
        table("standalone", None),
    ]);
    let service = service(&db, 1);

    let json = service.tables().expect("table listing");
    let tables = json["tables"].as_array().expect("tables array");
    let names: Vec<&str> = tables
        .iter()
        .map(|t| t["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["contacts", "standalone"]);
}

#[test]
fn test_lifecycle_events_are_published() {
    let db = FakeDatabase::new();
    let service = service(&db, 1);
    let events = service.subscribe();

    let descriptor = service.submit(1, &request("SELECT * FROM t")).expect("accepted");
    fetch_output(&service, 1, &descriptor.job_id);

    let mut statuses = Vec::new();
    let mut deleted = false;
    while let Ok(event) = events.recv_timeout(Duration::from_millis(200)) {
        match event {
            JobEvent::Created(d) | JobEvent::Updated(d) => statuses.push(d.status),
            JobEvent::Deleted(key) => {
                assert_eq!(key.job_id, descriptor.job_id);
                deleted = true;
            }
        }
    }
    assert_eq!(statuses.first(), Some(&JobStatus::Pending));
    assert!(statuses.contains(&JobStatus::Running));
    assert!(statuses.contains(&JobStatus::Complete));
    assert!(deleted);
}

#[test]
fn test_list_reports_current_statuses() {
    let db = FakeDatabase::new().with_query_delay(Duration::from_millis(200));
    let service = service(&db, 1);

    let a = service.submit(1, &request("SELECT * FROM t")).expect("accepted");
    let b = service.submit(1, &request("SELECT * FROM t")).expect("accepted");
    std::thread::sleep(Duration::from_millis(50));

    let jobs = service.list(1);
    assert_eq!(jobs.len(), 2);
    let status_of = |id: &str| {
        jobs.iter()
            .find(|j| j.job_id == *id)
            .expect("listed")
            .status
    };
    assert_eq!(status_of(&a.job_id), JobStatus::Running);
    assert_eq!(status_of(&b.job_id), JobStatus::Pending);
}
