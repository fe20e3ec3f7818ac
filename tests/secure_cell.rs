use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Barrier,
    },
    thread,
};

use proptest::prelude::*;
use secret_cell::{Error, InvalidAccess, SecureCell, REDACTED};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Credentials {
    user: String,
    password: String,
    scopes: Vec<String>,
    expires_at: Option<u64>,
}

#[test]
fn test_password_lifecycle() {
    let cell = SecureCell::<String>::new("correct horse battery staple".to_string())
        .expect("Failed to seal");

    assert_eq!(cell.to_string(), "[SECRET]");
    assert_eq!(cell.expose().unwrap(), "correct horse battery staple");
    assert_eq!(format!("{cell:?}"), "[SECRET]");

    cell.destroy().expect("Failed to destroy");

    assert_eq!(cell.to_string(), "[SECRET]");
    assert!(matches!(
        cell.expose(),
        Err(Error::InvalidAccess(InvalidAccess::Destroyed))
    ));
}

#[test]
fn test_structured_payload() {
    let credentials = Credentials {
        user: "svc-deploy".into(),
        password: "p4ssw0rd!".into(),
        scopes: vec!["repo".into(), "packages:write".into()],
        expires_at: Some(1_900_000_000),
    };
    let cell = SecureCell::<Credentials>::new(credentials.clone()).expect("Failed to seal");

    assert_eq!(cell.expose().unwrap(), credentials);
    assert_eq!(format!("{cell:?}"), REDACTED);
}

#[test]
fn test_large_payload_spans_pages() {
    let keys: BTreeMap<u32, Vec<u8>> = (0..8).map(|i| (i, vec![i as u8; 1024])).collect();
    let cell: SecureCell<_> = SecureCell::new(keys.clone()).expect("Failed to seal");

    assert_eq!(cell.expose().unwrap(), keys);
}

#[test]
fn test_redacted_inside_containers() {
    let cell = SecureCell::<String>::new("sk_live_123".into()).expect("Failed to seal");
    let rendered = format!("{:?}", vec![&cell, &cell]);

    assert_eq!(rendered, "[[SECRET], [SECRET]]");
    assert!(!rendered.contains("sk_live"));
}

#[test]
fn test_concurrent_expose() {
    const READERS: usize = 8;

    let cell = SecureCell::<String>::new("shared-token".into()).expect("Failed to seal");

    thread::scope(|scope| {
        for _ in 0..READERS {
            scope.spawn(|| {
                for _ in 0..100 {
                    assert_eq!(cell.expose().unwrap(), "shared-token");
                }
            });
        }
    });
}

#[test]
fn test_concurrent_destroy_never_tears_reads() {
    const READERS: usize = 8;

    let value = "x".repeat(512);
    let cell = SecureCell::<String>::new(value.clone()).expect("Failed to seal");
    let barrier = Barrier::new(READERS + 1);
    let destroyed = AtomicBool::new(false);

    thread::scope(|scope| {
        for _ in 0..READERS {
            scope.spawn(|| {
                barrier.wait();
                loop {
                    let seen_destroyed = destroyed.load(Ordering::SeqCst);
                    match cell.expose() {
                        Ok(exposed) => assert_eq!(exposed, value),
                        Err(Error::InvalidAccess(InvalidAccess::Destroyed)) => break,
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                    assert!(!seen_destroyed, "read succeeded after destroy returned");
                }
            });
        }

        barrier.wait();
        cell.destroy().expect("Failed to destroy");
        destroyed.store(true, Ordering::SeqCst);
    });

    assert!(cell.is_destroyed());
}

#[test]
fn test_concurrent_double_destroy() {
    let cell = SecureCell::<u64>::new(42).expect("Failed to seal");

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| cell.destroy().expect("destroy should be idempotent"));
        }
    });

    assert!(cell.is_destroyed());
}

#[test]
fn test_cell_moves_across_threads() {
    let cell = SecureCell::<Vec<u8>>::new(vec![0xAA; 32]).expect("Failed to seal");

    let exposed = thread::spawn(move || cell.expose().unwrap())
        .join()
        .expect("Thread panicked");

    assert_eq!(exposed, vec![0xAA; 32]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_string_round_trip(value in ".*") {
        let cell = SecureCell::<String>::new(value.clone()).unwrap();
        prop_assert_eq!(cell.expose().unwrap(), value);
    }

    #[test]
    fn prop_bytes_round_trip(value in prop::collection::vec(any::<u8>(), 0..2048)) {
        let cell = SecureCell::<Vec<u8>>::new(value.clone()).unwrap();
        prop_assert_eq!(cell.expose().unwrap(), value);
    }

    #[test]
    fn prop_tuple_round_trip(value in any::<(u64, i32, bool, Option<char>)>()) {
        let cell: SecureCell<_> = SecureCell::new(value).unwrap();
        prop_assert_eq!(cell.expose().unwrap(), value);
    }

    #[test]
    fn prop_redaction_is_constant(value in ".*") {
        let cell = SecureCell::<String>::new(value).unwrap();
        prop_assert_eq!(cell.to_string(), REDACTED);
        prop_assert_eq!(format!("{cell:?}"), REDACTED);
    }
}
