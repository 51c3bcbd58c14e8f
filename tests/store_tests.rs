//! End-to-end tests for the memstate store
//!
//! Covers the public surface through the `nodes` / `identities` fixtures:
//! queries, uniqueness, isolation, invalidation, reflection and deferred
//! callbacks.

mod common;

use common::*;
use memstate::{
    by_id, by_identity, by_name, by_namespace, BoxError, ChangeKind, Changes, Error, Query,
    Schema, SchemaError, Store, StoreConfig,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

type StdResult<T, E> = std::result::Result<T, E>;

static_assertions::assert_impl_all!(Store: Send, Sync, Clone);
static_assertions::assert_impl_all!(memstate::Transaction: Send);

fn commit_nodes(store: &Store, nodes: impl IntoIterator<Item = Node>) -> u64 {
    let mut tx = store.write_tx();
    let mut table = tx.table::<Node>(NODES).unwrap();
    for n in nodes {
        table.insert(n).unwrap();
    }
    tx.commit().unwrap()
}

fn sorted(mut v: Vec<String>) -> Vec<String> {
    v.sort();
    v
}

// ============================================================================
// Concrete scenario
// ============================================================================

#[test]
fn test_foo_bar_baz_scenario() {
    let store = store();
    let rev = commit_nodes(
        &store,
        [node("foo", "bar", 1234), node("baz", "quux", 1234)],
    );
    assert_eq!(rev, 1);

    let mut rtx = store.read_tx();
    let nodes = rtx.table::<Node>(NODES).unwrap();
    let bar = nodes.first(&by_name("foo", "bar")).unwrap().unwrap();
    assert_eq!(bar.meta.name, "bar");
    assert_eq!(bar.meta.namespace, "foo");

    let mut iter = nodes.get(&by_namespace("baz")).unwrap();
    let watch = iter.invalidated();
    assert_eq!(iter.next().unwrap().meta.name, "quux");
    assert!(iter.next().is_none());
    assert!(iter.next().is_none());
    assert!(!watch.is_fired());

    commit_nodes(&store, [node("baz", "flup", 1234)]);
    assert!(watch.wait_timeout(Duration::from_secs(1)));

    let mut rtx = store.read_tx();
    let nodes = rtx.table::<Node>(NODES).unwrap();
    let found = sorted(names(nodes.get(&by_namespace("baz")).unwrap()));
    assert_eq!(found, vec!["flup", "quux"]);
    assert_eq!(nodes.get(&by_identity(1234)).unwrap().count(), 3);
}

// ============================================================================
// Uniqueness and updates
// ============================================================================

#[test]
fn test_unique_conflict_leaves_transaction_unchanged() {
    let store = store();
    let mut tx = store.write_tx();
    let mut nodes = tx.table::<Node>(NODES).unwrap();
    nodes.insert(node("foo", "bar", 1)).unwrap();

    let err = nodes.insert(node("foo", "bar", 2)).unwrap_err();
    assert!(
        matches!(err, Error::Conflict { ref table, ref index } if table == "nodes" && index == "name"),
        "unexpected error: {err}"
    );
    assert_eq!(nodes.len().unwrap(), 1);
    assert_eq!(nodes.first(&by_identity(2)).unwrap(), None);
    assert_eq!(tx.changes().len(), 1);
    assert_eq!(tx.commit().unwrap(), 1);

    // Still a conflict against committed data.
    let mut tx = store.write_tx();
    let err = tx
        .table::<Node>(NODES)
        .unwrap()
        .insert(node("foo", "bar", 3))
        .unwrap_err();
    assert!(matches!(err, Error::Conflict { .. }));
}

#[test]
fn test_same_id_replaces_record() {
    let store = store();
    let mut original = node("foo", "bar", 1);
    commit_nodes(&store, [original.clone()]);

    original.meta.name = "renamed".to_string();
    original.identity = 7;
    commit_nodes(&store, [original.clone()]);

    let mut rtx = store.read_tx();
    let nodes = rtx.table::<Node>(NODES).unwrap();
    assert_eq!(nodes.len().unwrap(), 1);
    assert!(nodes.first(&by_name("foo", "bar")).unwrap().is_none());
    assert!(nodes.first(&by_identity(1)).unwrap().is_none());
    let renamed = nodes.first(&by_id(original.meta.id)).unwrap().unwrap();
    assert_eq!(*renamed, original);
    assert_eq!(nodes.first(&by_identity(7)).unwrap().as_deref(), Some(&original));
}

// ============================================================================
// Isolation
// ============================================================================

#[test]
fn test_read_your_writes_and_uncommitted_invisibility() {
    let store = store();
    let mut before = store.read_tx();

    let mut tx = store.write_tx();
    tx.table::<Node>(NODES)
        .unwrap()
        .insert(node("foo", "bar", 1))
        .unwrap();
    let own = tx
        .table::<Node>(NODES)
        .unwrap()
        .first(&by_name("foo", "bar"))
        .unwrap();
    assert!(own.is_some());

    let mut concurrent = store.read_tx();
    assert!(concurrent
        .table::<Node>(NODES)
        .unwrap()
        .first(&by_name("foo", "bar"))
        .unwrap()
        .is_none());

    tx.commit().unwrap();

    assert_eq!(before.revision(), 0);
    assert!(before
        .table::<Node>(NODES)
        .unwrap()
        .first(&by_name("foo", "bar"))
        .unwrap()
        .is_none());
    assert_eq!(store.scan::<Node>(NODES, "id").unwrap().len(), 1);
}

#[test]
fn test_reader_thread_keeps_its_snapshot() {
    let store = store();
    commit_nodes(&store, [node("foo", "a", 1)]);

    let barrier = Arc::new(Barrier::new(2));
    let reader = {
        let store = store.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let mut tx = store.read_tx();
            let first = tx.table::<Node>(NODES).unwrap().len().unwrap();
            barrier.wait();
            barrier.wait();
            let second = tx.table::<Node>(NODES).unwrap().len().unwrap();
            (first, second, tx.revision())
        })
    };

    barrier.wait();
    commit_nodes(&store, [node("foo", "b", 2)]);
    barrier.wait();

    assert_eq!(reader.join().unwrap(), (1, 1, 1));
    assert_eq!(store.scan::<Node>(NODES, "namespace").unwrap().len(), 2);
}

// ============================================================================
// Invalidation
// ============================================================================

#[test]
fn test_watch_silent_without_relevant_commit() {
    let store = store();
    commit_nodes(&store, [node("baz", "quux", 1)]);

    let mut rtx = store.read_tx();
    let mut iter = rtx
        .table::<Node>(NODES)
        .unwrap()
        .get(&by_namespace("baz"))
        .unwrap();
    let watch = iter.invalidated();
    assert!(!watch.wait_timeout(Duration::from_millis(50)));

    // Same table, other namespace.
    commit_nodes(&store, [node("foo", "other", 1)]);
    // Other table, same namespace.
    let mut tx = store.write_tx();
    tx.table::<Identity>(IDENTITIES)
        .unwrap()
        .insert(identity("baz", "id"))
        .unwrap();
    tx.commit().unwrap();
    assert!(!watch.is_fired());

    commit_nodes(&store, [node("baz", "flup", 2)]);
    assert!(watch.wait_timeout(Duration::from_secs(1)));
}

#[test]
fn test_watch_fires_on_delete_and_update() {
    let store = store();
    let victim = node("baz", "quux", 1);
    commit_nodes(&store, [victim.clone()]);

    let mut rtx = store.read_tx();
    let nodes = rtx.table::<Node>(NODES).unwrap();
    let watch_ns = nodes.get(&by_namespace("baz")).unwrap().invalidated();
    let watch_identity = nodes.get(&by_identity(1)).unwrap().invalidated();

    // Moving the record to another identity touches its old identity key.
    let mut moved = victim.clone();
    moved.identity = 2;
    commit_nodes(&store, [moved.clone()]);
    assert!(watch_identity.is_fired());
    assert!(watch_ns.is_fired());

    let mut rtx = store.read_tx();
    let watch = rtx
        .table::<Node>(NODES)
        .unwrap()
        .get(&by_namespace("baz"))
        .unwrap()
        .invalidated();
    let mut tx = store.write_tx();
    assert!(tx.table::<Node>(NODES).unwrap().delete(&moved).unwrap());
    tx.commit().unwrap();
    assert!(watch.is_fired());
}

#[test]
fn test_prefix_query_watch() {
    let store = store();
    commit_nodes(
        &store,
        [
            node("baz", "a", 1),
            node("bazaar", "b", 1),
            node("bar", "c", 1),
        ],
    );
    let mut rtx = store.read_tx();
    let nodes = rtx.table::<Node>(NODES).unwrap();
    let prefix = Query::new("name", ["baz"]).prefix();
    let mut iter = nodes.get(&prefix).unwrap();
    let watch = iter.invalidated();
    assert_eq!(sorted(names(iter)), vec!["a", "b"]);

    let exact_ns = Query::new("name", ["baz", "a"]).prefix();
    assert_eq!(names(nodes.get(&exact_ns).unwrap()), vec!["a"]);

    commit_nodes(&store, [node("bar", "d", 1)]);
    assert!(!watch.is_fired());
    commit_nodes(&store, [node("bazooka", "e", 1)]);
    assert!(watch.is_fired());
}

#[test]
fn test_watch_key_limit_fires_whole_table() {
    let store = store_with(StoreConfig {
        watch_key_limit: 1,
        ..StoreConfig::default()
    });
    let mut rtx = store.read_tx();
    let watch = rtx
        .table::<Node>(NODES)
        .unwrap()
        .get(&by_namespace("baz"))
        .unwrap()
        .invalidated();
    commit_nodes(&store, [node("foo", "x", 1)]);
    assert!(watch.is_fired());
}

// ============================================================================
// Reflector
// ============================================================================

#[test]
fn test_reflector_veto_is_atomic() {
    let store = store();
    store.set_reflector(|changes: &Changes| -> StdResult<(), BoxError> {
        Err(format!("{} changes refused", changes.len()).into())
    });

    let ran = Arc::new(AtomicBool::new(false));
    let mut tx = store.write_tx();
    tx.table::<Node>(NODES)
        .unwrap()
        .insert(node("foo", "bar", 1))
        .unwrap();
    tx.table::<Identity>(IDENTITIES)
        .unwrap()
        .insert(identity("foo", "bar"))
        .unwrap();
    let flag = Arc::clone(&ran);
    tx.defer(move || flag.store(true, Ordering::SeqCst)).unwrap();

    let err = tx.commit().unwrap_err();
    match &err {
        Error::Reflector(source) => assert_eq!(source.to_string(), "2 changes refused"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(std::error::Error::source(&err).is_some());
    assert_eq!(store.revision(), 0);
    assert!(!ran.load(Ordering::SeqCst));
    assert!(store.scan::<Node>(NODES, "id").unwrap().is_empty());
    assert!(store.scan::<Identity>(IDENTITIES, "id").unwrap().is_empty());

    store.clear_reflector();
    assert_eq!(commit_nodes(&store, [node("foo", "bar", 1)]), 1);
}

#[test]
fn test_reflector_sees_coalesced_changes_in_order() {
    let store = store();
    let seen: Arc<Mutex<Vec<Changes>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        store.set_reflector(move |changes: &Changes| -> StdResult<(), BoxError> {
            seen.lock().push(changes.clone());
            Ok(())
        });
    }

    let mut first = node("foo", "a", 1);
    let second = node("foo", "b", 2);
    let ident = identity("foo", "i");

    let mut tx = store.write_tx();
    tx.table::<Node>(NODES).unwrap().insert(first.clone()).unwrap();
    tx.table::<Identity>(IDENTITIES)
        .unwrap()
        .insert(ident.clone())
        .unwrap();
    tx.table::<Node>(NODES).unwrap().insert(second.clone()).unwrap();
    first.identity = 10;
    tx.table::<Node>(NODES).unwrap().insert(first.clone()).unwrap();
    assert!(tx.table::<Node>(NODES).unwrap().delete(&second).unwrap());
    tx.commit().unwrap();

    {
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let kinds: Vec<(&str, ChangeKind)> =
            seen[0].iter().map(|c| (c.table(), c.kind())).collect();
        assert_eq!(
            kinds,
            vec![("nodes", ChangeKind::Created), ("identities", ChangeKind::Created)]
        );
        let node_change = seen[0].for_table("nodes").next().unwrap();
        assert_eq!(node_change.after_as::<Node>().unwrap().identity, 10);
        assert!(node_change.before().is_none());
    }

    let mut tx = store.write_tx();
    assert!(tx.table::<Node>(NODES).unwrap().delete(&first).unwrap());
    let mut renamed = ident.clone();
    renamed.meta.name = "j".to_string();
    tx.table::<Identity>(IDENTITIES)
        .unwrap()
        .insert(renamed)
        .unwrap();
    tx.commit().unwrap();

    let seen = seen.lock();
    let kinds: Vec<ChangeKind> = seen[1].iter().map(|c| c.kind()).collect();
    assert_eq!(kinds, vec![ChangeKind::Deleted, ChangeKind::Updated]);
    let update = seen[1].for_table("identities").next().unwrap();
    assert_eq!(update.before_as::<Identity>().unwrap().meta.name, "i");
    assert_eq!(update.after_as::<Identity>().unwrap().meta.name, "j");
}

#[test]
fn test_reflector_captured_at_begin() {
    let store = store();
    let mut tx = store.write_tx();
    tx.table::<Node>(NODES)
        .unwrap()
        .insert(node("foo", "bar", 1))
        .unwrap();
    // Installed after the transaction began: not consulted by it.
    store.set_reflector(|_: &Changes| -> StdResult<(), BoxError> { Err("late".into()) });
    assert_eq!(tx.commit().unwrap(), 1);

    let mut tx = store.write_tx();
    tx.table::<Node>(NODES)
        .unwrap()
        .insert(node("foo", "baz", 1))
        .unwrap();
    assert!(matches!(tx.commit(), Err(Error::Reflector(_))));
}

#[test]
fn test_slow_reflector_still_commits() {
    let store = store_with(StoreConfig {
        slow_reflector_warn_ms: 0,
        ..StoreConfig::default()
    });
    store.set_reflector(|_: &Changes| -> StdResult<(), BoxError> {
        thread::sleep(Duration::from_millis(2));
        Ok(())
    });
    assert_eq!(commit_nodes(&store, [node("foo", "bar", 1)]), 1);
}

// ============================================================================
// Deferred callbacks
// ============================================================================

#[test]
fn test_deferred_run_in_order_after_release() {
    let store = store();
    let order = Arc::new(Mutex::new(Vec::new()));
    let reentered = Arc::new(AtomicBool::new(false));

    let mut tx = store.write_tx();
    tx.table::<Node>(NODES)
        .unwrap()
        .insert(node("foo", "bar", 1))
        .unwrap();
    for i in 0..3 {
        let order = Arc::clone(&order);
        let store = store.clone();
        tx.defer(move || order.lock().push((i, store.revision())))
            .unwrap();
    }
    {
        // The write gate is already released when callbacks run.
        let store = store.clone();
        let reentered = Arc::clone(&reentered);
        tx.defer(move || {
            store.write_tx().commit().unwrap();
            reentered.store(true, Ordering::SeqCst);
        })
        .unwrap();
    }
    let rev = tx.commit().unwrap();

    assert_eq!(*order.lock(), vec![(0, rev), (1, rev), (2, rev)]);
    assert!(reentered.load(Ordering::SeqCst));
}

#[test]
fn test_deferred_dropped_on_abort() {
    let store = store();
    let ran = Arc::new(AtomicBool::new(false));

    let mut tx = store.write_tx();
    let flag = Arc::clone(&ran);
    tx.defer(move || flag.store(true, Ordering::SeqCst)).unwrap();
    tx.abort();

    {
        let mut tx = store.write_tx();
        let flag = Arc::clone(&ran);
        tx.defer(move || flag.store(true, Ordering::SeqCst)).unwrap();
        // Dropped without commit.
    }
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(store.metrics().total_aborted, 2);
}

// ============================================================================
// Delete
// ============================================================================

#[test]
fn test_delete_absent_is_noop() {
    let store = store();
    let mut tx = store.write_tx();
    let ghost = node("foo", "ghost", 1);
    assert!(!tx.table::<Node>(NODES).unwrap().delete(&ghost).unwrap());
    assert!(tx.changes().is_empty());
    assert_eq!(tx.commit().unwrap(), 1);
    assert_eq!(store.revision(), 1);
}

#[test]
fn test_delete_through_stale_copy() {
    let store = store();
    let original = node("foo", "bar", 1);
    commit_nodes(&store, [original.clone()]);

    let mut stale = original.clone();
    stale.meta.name = "something else".to_string();
    stale.identity = 99;

    let mut tx = store.write_tx();
    assert!(tx.table::<Node>(NODES).unwrap().delete(&stale).unwrap());
    tx.commit().unwrap();

    let mut rtx = store.read_tx();
    let nodes = rtx.table::<Node>(NODES).unwrap();
    assert!(nodes.first(&by_id(original.meta.id)).unwrap().is_none());
    assert!(nodes.first(&by_name("foo", "bar")).unwrap().is_none());
    assert!(nodes.is_empty().unwrap());
}

#[test]
fn test_insert_then_delete_leaves_no_changes() {
    let store = store();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    store.set_reflector(move |changes: &Changes| -> StdResult<(), BoxError> {
        assert!(changes.is_empty());
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let n = node("foo", "bar", 1);
    let mut tx = store.write_tx();
    let mut nodes = tx.table::<Node>(NODES).unwrap();
    nodes.insert(n.clone()).unwrap();
    assert!(nodes.delete(&n).unwrap());
    assert!(tx.changes().is_empty());
    assert_eq!(tx.commit().unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(store.scan::<Node>(NODES, "id").unwrap().is_empty());
}

// ============================================================================
// Ordered queries
// ============================================================================

#[test]
fn test_ordered_queries() {
    let store = store();
    let all: Vec<Node> = (1..=5)
        .map(|i| node("ns", &format!("n{}", i), i * 10))
        .collect();
    commit_nodes(&store, all.clone());

    let mut tx = store.write_tx();
    let mut nodes = tx.table::<Node>(NODES).unwrap();
    let identities = |it: memstate::Iter<Node>| it.map(|n| n.identity).collect::<Vec<_>>();

    assert_eq!(
        identities(nodes.get(&Query::all("identity")).unwrap()),
        vec![10, 20, 30, 40, 50]
    );
    assert_eq!(
        identities(nodes.get_reverse(&Query::all("identity")).unwrap()),
        vec![50, 40, 30, 20, 10]
    );
    assert_eq!(
        identities(nodes.lower_bound(&Query::new("identity", [25u64])).unwrap()),
        vec![30, 40, 50]
    );
    assert_eq!(nodes.last(&Query::all("identity")).unwrap().unwrap().identity, 50);
    assert_eq!(nodes.first(&by_identity(30)).unwrap().unwrap().meta.name, "n3");

    let target = &all[2];
    let hex = target.meta.id.simple().to_string();
    let by_prefix = Query::new("id", [&hex[..8]]).prefix();
    assert!(nodes
        .get(&by_prefix)
        .unwrap()
        .any(|n| n.meta.id == target.meta.id));

    assert_eq!(nodes.delete_all(&by_namespace("ns")).unwrap(), 5);
    assert!(nodes.is_empty().unwrap());
    tx.commit().unwrap();
    assert!(store.scan::<Node>(NODES, "identity").unwrap().is_empty());
}

#[test]
fn test_optional_index_skips_missing_values() {
    let store = store();
    let mut with_address = node("foo", "a", 1);
    with_address.address = "10.0.0.1".to_string();
    commit_nodes(&store, [with_address, node("foo", "b", 2)]);

    let addressed = store.scan::<Node>(NODES, "address").unwrap();
    assert_eq!(addressed.len(), 1);
    assert_eq!(addressed[0].meta.name, "a");
    assert_eq!(store.scan::<Node>(NODES, "id").unwrap().len(), 2);
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_query_errors() {
    let store = store();
    let mut tx = store.read_tx();

    assert!(matches!(
        tx.table::<Node>("nope"),
        Err(Error::TableNotFound(ref t)) if t == "nope"
    ));
    assert!(matches!(
        tx.table::<Identity>(NODES),
        Err(Error::TypeMismatch { .. })
    ));

    let nodes = tx.table::<Node>(NODES).unwrap();
    assert!(matches!(
        nodes.get(&Query::all("nope")),
        Err(Error::IndexNotFound { .. })
    ));
    assert!(matches!(
        nodes.first(&Query::new("name", ["foo"])),
        Err(Error::Argument { ref index, .. }) if index == "name"
    ));
    assert!(matches!(
        nodes.first(&Query::new("identity", ["x"])),
        Err(Error::Argument { .. })
    ));
}

#[test]
fn test_empty_args_are_not_a_scan() {
    let store = store();
    commit_nodes(&store, [node("foo", "a", 1), node("bar", "b", 2)]);

    let mut tx = store.read_tx();
    let nodes = tx.table::<Node>(NODES).unwrap();
    assert!(matches!(
        nodes.get(&Query::new("name", Vec::<&str>::new())),
        Err(Error::Argument { ref index, .. }) if index == "name"
    ));
    assert!(matches!(
        nodes.first(&Query::new("namespace", Vec::<&str>::new()).prefix()),
        Err(Error::Argument { .. })
    ));
    assert_eq!(nodes.get(&Query::all("name")).unwrap().count(), 2);
}

#[test]
fn test_read_transaction_is_read_only() {
    let store = store();
    let mut tx = store.read_tx();
    assert!(!tx.is_write());
    assert!(matches!(
        tx.table::<Node>(NODES).unwrap().insert(node("foo", "bar", 1)),
        Err(Error::ReadOnly)
    ));
    assert!(matches!(tx.defer(|| {}), Err(Error::ReadOnly)));
    assert_eq!(tx.commit().unwrap(), 0);
}

#[test]
fn test_indexing_errors() {
    let store = store();
    let mut tx = store.write_tx();
    let mut nodes = tx.table::<Node>(NODES).unwrap();

    let mut nil_id = node("foo", "bar", 1);
    nil_id.meta.id = uuid::Uuid::nil();
    assert!(matches!(
        nodes.insert(nil_id),
        Err(Error::Indexing { ref index, .. }) if index == "id"
    ));

    let no_namespace = node("", "bar", 1);
    assert!(matches!(
        nodes.insert(no_namespace),
        Err(Error::Indexing { ref index, .. }) if index == "namespace"
    ));

    let nul = node("fo\0o", "bar", 1);
    assert!(matches!(nodes.insert(nul), Err(Error::Indexing { .. })));
    assert!(nodes.is_empty().unwrap());
    assert!(tx.changes().is_empty());
}

#[test]
fn test_invalid_schema_and_config() {
    assert!(matches!(
        Store::new(Schema::new()),
        Err(Error::Schema(SchemaError::NoTables))
    ));
    let err = Store::with_config(
        schema(),
        StoreConfig {
            watch_key_limit: 0,
            ..StoreConfig::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

// ============================================================================
// Metrics
// ============================================================================

#[test]
fn test_metrics() {
    let store = store();
    commit_nodes(&store, [node("foo", "a", 1)]);
    commit_nodes(&store, [node("foo", "b", 1)]);
    store.write_tx().abort();
    let _ = store.read_tx();

    let m = store.metrics();
    assert_eq!(m.total_started, 3);
    assert_eq!(m.total_committed, 2);
    assert_eq!(m.total_aborted, 1);
    assert_eq!(m.total_reads, 1);
    assert_eq!(m.total_completed(), 3);
    assert!((m.commit_rate - 2.0 / 3.0).abs() < 1e-9);
}
