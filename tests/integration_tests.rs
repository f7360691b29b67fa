//! End-to-end tests through the application-owned cache context.

use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use tiered_blob_cache::{CacheContext, Config, ManualClock};

fn config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.disk.path = dir.path().to_path_buf();
    config.default_max_age_minutes = 15;
    config
}

#[test]
fn test_default_window_applies() {
    let tmp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(1_000_000));
    let ctx = CacheContext::with_clock(config(&tmp), clock.clone()).unwrap();

    ctx.put("user:1", "alice");
    assert_eq!(ctx.get("user:1").as_deref(), Some("alice"));

    clock.advance_minutes(16);
    assert_eq!(ctx.get_with_max_age("user:1", 20).as_deref(), Some("alice"));
    assert_eq!(ctx.get("user:1"), None);
    assert_eq!(ctx.get_with_max_age("user:1", 20), None);
    assert_eq!(ctx.stats().expired, 1);
}

#[test]
fn test_values_persist_across_contexts() {
    let tmp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(1_000_000));

    {
        let ctx = CacheContext::with_clock(config(&tmp), clock.clone()).unwrap();
        for i in 0..100 {
            ctx.put(&format!("k{i}"), &format!("v{i}"));
        }
        ctx.close();
    }

    let ctx = CacheContext::with_clock(config(&tmp), clock).unwrap();
    for i in 0..100 {
        assert_eq!(ctx.get(&format!("k{i}")), Some(format!("v{i}")));
    }
    assert_eq!(ctx.store_stats().unwrap().records, 100);
}

#[test]
fn test_concurrent_readers_and_writers() {
    let tmp = TempDir::new().unwrap();
    let ctx = Arc::new(CacheContext::open(config(&tmp)).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let ctx = ctx.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    let key = format!("t{t}-k{}", i % 20);
                    let value = format!("t{t}-v{i}");
                    ctx.put(&key, &value);
                    let read = ctx.get(&key).expect("own write must be visible");
                    assert!(read.starts_with(&format!("t{t}-v")));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(ctx.store_stats().unwrap().records, 80);
    assert_eq!(ctx.stats().storage_errors, 0);
}

#[test]
fn test_reset_while_others_wait() {
    let tmp = TempDir::new().unwrap();
    let ctx = Arc::new(CacheContext::open(config(&tmp)).unwrap());
    ctx.put("before", "x");

    let writer = {
        let ctx = ctx.clone();
        thread::spawn(move || {
            for i in 0..100 {
                ctx.put(&format!("w{i}"), "y");
            }
        })
    };
    ctx.reset();
    writer.join().unwrap();

    assert_eq!(ctx.get("before"), None);
    ctx.put("after", "z");
    assert_eq!(ctx.get("after").as_deref(), Some("z"));
    assert_eq!(ctx.stats().storage_errors, 0);
}

#[test]
fn test_corrupt_directory_still_opens() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("blobs.dat"), b"\x00\x01garbage garbage garbage").unwrap();

    let ctx = CacheContext::open(config(&tmp)).unwrap();
    assert_eq!(ctx.get("anything"), None);
    ctx.put("k", "v");
    assert_eq!(ctx.get("k").as_deref(), Some("v"));
    assert_eq!(ctx.store_stats().unwrap().records, 1);
}
