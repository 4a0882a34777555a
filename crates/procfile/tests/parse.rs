#![forbid(unsafe_code)]

use keel_core::CompileError;
use keel_procfile::Procfile;

#[test]
fn web_is_routable_when_present() {
    let p = Procfile::parse("web: gunicorn app:app\nworker: celery worker").unwrap();
    assert_eq!(p.routable_process, "web");
    assert_eq!(p.names().collect::<Vec<_>>(), vec!["web", "worker"]);
    assert_eq!(p.processes["worker"], vec!["celery worker".to_string()]);
}

#[test]
fn smallest_name_is_routable_without_web() {
    let p = Procfile::parse("worker: celery worker\napi: ./serve\nclock: ./tick\n").unwrap();
    assert_eq!(p.routable_process, "api");
    assert!(p.is_routable("api"));
    assert!(!p.is_routable("worker"));
}

#[test]
fn comments_blanks_and_malformed_lines_are_skipped() {
    let text = "# main procs\n\n  \nweb: ./run\nnot a process line\nbad name!: cmd\n: missing\nweb2 ./nocolon\r\nworker: ./w\r\n";
    let p = Procfile::parse(text).unwrap();
    assert_eq!(p.processes.len(), 2);
    assert_eq!(p.processes["worker"], vec!["./w".to_string()]);
}

#[test]
fn empty_or_all_malformed_fails() {
    for text in ["", "\n\n", "# only comments\n", "nope\nstill nope\n", "bad name: x"] {
        let err = Procfile::parse(text).unwrap_err();
        assert!(matches!(err, CompileError::EmptyDefinition), "text={:?} err={}", text, err);
    }
}

#[test]
fn from_processes_applies_same_rule() {
    let p = Procfile::from_processes([("worker", vec!["w".to_string()]), ("beat", vec!["b".to_string()])]).unwrap();
    assert_eq!(p.routable_process, "beat");

    let empty: Vec<(String, Vec<String>)> = Vec::new();
    assert!(matches!(Procfile::from_processes(empty), Err(CompileError::EmptyDefinition)));
}

#[test]
fn serializes_for_cli_output() {
    let p = Procfile::parse("web: ./run").unwrap();
    let v = serde_json::to_value(&p).unwrap();
    assert_eq!(v["routable_process"], "web");
    assert_eq!(v["processes"]["web"][0], "./run");
}
