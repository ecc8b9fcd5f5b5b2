#![forbid(unsafe_code)]

//! Smoke tests for the facade: the prelude is enough to drive every list
//! kind, and errors from every layer convert into `keel::Error`.
//!
//! Run:
//!   cargo test -p keel --test facade_smoke

use std::time::Duration;

use keel::prelude::*;
use keel::{CaptureError, CollectionError, EnvironmentSettings, LockError};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn run() -> Result<Vec<&'static str>> {
    let master = ObservableList::from_vec(vec!["a", "b"]);
    let merged = MasterSlaveObservableList::new(master.clone());
    merged.add_slave(ObservableList::from_vec(vec!["z"]))?;
    merged.push("c")?;
    master.undo()?;
    Ok(merged.to_vec()?)
}

#[test]
fn prelude_drives_merged_lists() {
    init_logging();
    assert_eq!(run().unwrap(), vec!["a", "b", "z"]);
}

#[test]
fn errors_convert_into_facade_error() {
    let err: keel::Error = LockError::Disposed.into();
    assert!(matches!(
        err,
        keel::Error::Collection(CollectionError::Disposed)
    ));

    let err: keel::Error = CaptureError::NotCaptured { index: 2 }.into();
    assert!(matches!(
        err,
        keel::Error::Collection(CollectionError::Capture(CaptureError::NotCaptured { index: 2 }))
    ));

    let err: keel::Error = EnvironmentSettings {
        lock_acquisition_timeout_ms: 0,
        ..EnvironmentSettings::default()
    }
    .checked()
    .unwrap_err()
    .into();
    assert!(matches!(err, keel::Error::Settings(_)));
}

#[test]
fn per_list_settings_override_the_default() {
    let config = ListConfig::default().with_lock_settings(LockSettings::new(
        Duration::from_millis(5),
        LockTimeoutPolicy::Fail,
    ));
    let list: ObservableList<u8> = ObservableList::with_config(config);
    assert_eq!(list.lock_settings().timeout, Duration::from_millis(5));
    assert_eq!(
        ObservableList::<u8>::new().lock_settings(),
        EnvironmentSettings::current().lock_settings()
    );
}
