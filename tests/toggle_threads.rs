use proxy_bridge::bridge::Bridge;
use proxy_bridge::config::BridgeConfig;
use proxy_bridge::native::{HostObjects, ObjectSystem};
use std::sync::{Arc, Barrier};
use std::thread;

fn bridge(host: &Arc<HostObjects>) -> Bridge {
    Bridge::new(
        host.clone(),
        BridgeConfig {
            collect_threshold: None,
            strict_cache: true,
        },
    )
}

#[test]
fn test_foreign_release_applies_on_next_entry() {
    let host = Arc::new(HostObjects::new());
    let mut bridge = bridge(&host);
    let obj = host.new_instance(host.object_type(), false);

    bridge.enter(|ctx| {
        ctx.native_to_handle(Some(obj), false);
    });
    assert!(bridge.enter(|ctx| ctx.is_strongly_cached(obj)));

    let remote = host.clone();
    thread::spawn(move || remote.unref_object(obj))
        .join()
        .unwrap();

    // nothing changes until the runtime thread comes back
    assert_eq!(bridge.pending_toggles(), 1);
    assert_eq!(bridge.metrics().foreign_toggles, 1);
    assert!(!bridge.enter(|ctx| ctx.is_strongly_cached(obj)));

    bridge.collect();
    assert!(!host.is_alive(obj));
}

#[test]
fn test_foreign_holder_keeps_proxy_alive() {
    let host = Arc::new(HostObjects::new());
    let mut bridge = bridge(&host);
    let obj = host.new_instance(host.object_type(), true);

    bridge.enter(|ctx| {
        let proxy = ctx.proxy_for(obj, false);
        proxy.env().set(ctx.mutation(), "owner", true.into());
    });

    let remote = host.clone();
    thread::spawn(move || remote.ref_object(obj)).join().unwrap();

    // the pending promotion is applied before marking
    bridge.collect();
    assert!(host.is_alive(obj));
    assert!(bridge.enter(|ctx| {
        let proxy = ctx.lookup(obj).unwrap();
        matches!(proxy.env().get("owner"), proxy_bridge::value::Value::Boolean(true))
    }));

    host.unref_object(obj);
    bridge.collect();
    assert!(!host.is_alive(obj));
}

#[test]
fn test_churn_from_many_threads() {
    const OBJECTS: usize = 64;
    const THREADS: usize = 8;
    const ROUNDS: usize = 50;

    let host = Arc::new(HostObjects::new());
    let mut bridge = bridge(&host);
    let objects: Vec<_> = (0..OBJECTS)
        .map(|_| host.new_instance(host.object_type(), false))
        .collect();

    bridge.enter(|ctx| {
        for &obj in &objects {
            ctx.native_to_handle(Some(obj), false);
        }
    });
    // leave the toggle reference as the only one
    for &obj in &objects {
        host.unref_object(obj);
    }

    // each thread owns a share of the objects; even ones end up held
    let barrier = Arc::new(Barrier::new(THREADS));
    thread::scope(|s| {
        for share in objects.chunks(OBJECTS / THREADS) {
            let host = host.clone();
            let barrier = barrier.clone();
            s.spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    for &obj in share {
                        host.ref_object(obj);
                    }
                    for &obj in share {
                        host.unref_object(obj);
                    }
                }
                for &obj in share.iter().step_by(2) {
                    host.ref_object(obj);
                }
            });
        }
    });

    let expected_foreign = (OBJECTS * ROUNDS * 2 + OBJECTS / 2) as u64;
    assert_eq!(bridge.metrics().foreign_toggles, expected_foreign);

    bridge.collect();
    assert_eq!(bridge.pending_toggles(), 0);
    for (i, &obj) in objects.iter().enumerate() {
        assert_eq!(host.is_alive(obj), i % 2 == 0);
    }
    bridge.enter(|ctx| {
        for &obj in objects.iter().step_by(2) {
            assert!(ctx.is_strongly_cached(obj));
        }
    });

    for &obj in objects.iter().step_by(2) {
        host.unref_object(obj);
    }
    bridge.collect();
    assert_eq!(host.live_count(), 0);
    assert_eq!(bridge.metrics().releases, OBJECTS as u64);
}
