// Environment variables are process-wide, so every case runs inside one test
// function in its own test binary.

use rust_datalayer::connect::{BUSY_TIMEOUT_ENV, DB_PATH_ENV};
use rust_datalayer::SqliteConfig;
use std::env;
use std::time::Duration;

#[test]
fn test_config_from_env() {
    env::remove_var(DB_PATH_ENV);
    env::remove_var(BUSY_TIMEOUT_ENV);
    let config = SqliteConfig::from_env();
    assert_eq!(config, SqliteConfig::in_memory());
    assert_eq!(config.busy_timeout, None);

    env::set_var(DB_PATH_ENV, "/tmp/datalayer-app.db");
    env::set_var(BUSY_TIMEOUT_ENV, " 750 ");
    let config = SqliteConfig::from_env();
    assert_eq!(config.db_path, "/tmp/datalayer-app.db");
    assert_eq!(config.busy_timeout, Some(Duration::from_millis(750)));
    assert_eq!(SqliteConfig::default(), config);

    env::set_var(BUSY_TIMEOUT_ENV, "soon");
    let config = SqliteConfig::from_env();
    assert_eq!(config.db_path, "/tmp/datalayer-app.db");
    assert_eq!(config.busy_timeout, None);

    env::remove_var(DB_PATH_ENV);
    env::remove_var(BUSY_TIMEOUT_ENV);
    assert_eq!(SqliteConfig::default(), SqliteConfig::in_memory());
}
