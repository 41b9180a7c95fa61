//! Exercises the config → port allocation → registry pipeline end-to-end,
//! the way `ServerHandle::start` wires them together, rather than each
//! module's unit tests in isolation.

use std::io::Write;

use appgate::config::Config;
use appgate::registry::Registry;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp config file");
    file.write_all(contents.as_bytes()).expect("write temp config file");
    file
}

#[test]
fn loaded_config_populates_a_queryable_registry() {
    let file = write_config(
        r#"{
            "apps": [
                {"name": "reports", "path": "/srv/reports"},
                {"name": "sales", "path": "/srv/sales", "resident": true}
            ],
            "starting_port": 41500,
            "log_dir": "/tmp/appgate-test-logs"
        }"#,
    );

    let config = Config::load(file.path()).expect("config loads");
    assert_eq!(config.apps.len(), 2);

    let registry = Registry::new(config.apps.clone());

    assert!(registry.app_exists("reports"));
    assert!(registry.app_exists("sales"));
    assert!(!registry.app_exists("unknown"));

    let reports = registry.get_app("reports").expect("reports app present");
    let sales = registry.get_app("sales").expect("sales app present");
    assert_ne!(reports.port, sales.port, "distinct apps get distinct ports");
    assert!(reports.port >= 41500 && sales.port >= 41500);
    assert!(!reports.resident);
    assert!(sales.resident);

    let views = registry.snapshot_apps();
    assert_eq!(views.len(), 2);
    assert!(views.iter().all(|v| v.status_class() == "dormant"));
}

#[test]
fn duplicate_app_names_abort_before_a_registry_is_ever_built() {
    let file = write_config(
        r#"{
            "apps": [
                {"name": "dup", "path": "/srv/a"},
                {"name": "dup", "path": "/srv/b"}
            ],
            "starting_port": 41600,
            "log_dir": "/tmp/appgate-test-logs"
        }"#,
    );

    assert!(Config::load(file.path()).is_err());
}

#[test]
fn reserved_ports_are_never_handed_to_an_app() {
    let file = write_config(
        r#"{
            "apps": [{"name": "reports", "path": "/srv/reports"}],
            "starting_port": 3838,
            "log_dir": "/tmp/appgate-test-logs",
            "proxy_port": 3838,
            "management_port": 3839
        }"#,
    );

    let config = Config::load(file.path()).expect("config loads");
    let registry = Registry::new(config.apps.clone());
    let reports = registry.get_app("reports").unwrap();
    assert_ne!(reports.port, 3838);
    assert_ne!(reports.port, 3839);
}
