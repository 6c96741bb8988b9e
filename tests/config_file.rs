use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use kyrofact::network::StoreNetwork;
use kyrofact::{
    Fact, FactEngine, FactEngineConfig, FactStore, InMemoryFactStore, KyroFactError, PurgeConditions, Specification,
};

#[test]
fn engine_runs_from_a_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"{{
            "observer": {{ "stream_capacity": 8 }},
            "save_queue": {{ "debounce_ms": 10, "max_batch": 2 }}
        }}"#
    )
    .unwrap();

    let cfg = FactEngineConfig::from_json_file(file.path()).unwrap();
    assert_eq!(cfg.observer.stream_capacity, 8);
    assert_eq!(cfg.observer.control_queue_capacity, 1024);
    assert_eq!(cfg.save_queue.max_batch, 2);

    let remote = Arc::new(InMemoryFactStore::new());
    let engine = FactEngine::new(
        Arc::new(InMemoryFactStore::new()),
        Arc::new(StoreNetwork::new(remote.clone())),
        PurgeConditions::new(),
        cfg,
    )
    .unwrap();

    let company = Fact::builder("Company").field("identifier", "contoso").build().unwrap();
    engine.save_facts([company.clone()]).unwrap();
    let spec = Specification::parse(
        "(company: Company) { office: Office [ office->company: Company = company ] } => office.city",
    )
    .unwrap();
    let observer = engine.watch(&[company.reference().clone()], &spec).unwrap();

    let office = Fact::builder("Office")
        .predecessor("company", company.reference())
        .field("city", "Dallas")
        .build()
        .unwrap();
    engine.save_facts([office.clone()]).unwrap();
    assert!(observer.recv_timeout(Duration::from_secs(5)).unwrap().is_added());

    engine.flush().unwrap();
    assert!(remote.get(office.reference()).unwrap().is_some());
}

#[test]
fn malformed_config_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kyrofact.json");
    std::fs::write(&path, "{ \"save_queue\": { \"debounce_ms\": \"soon\" } }").unwrap();

    let err = FactEngineConfig::from_json_file(&path).unwrap_err();
    assert!(matches!(err, KyroFactError::Config { .. }));
    assert!(err.to_string().contains("invalid engine config"));
}
