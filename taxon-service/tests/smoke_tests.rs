//! End-to-end smoke tests for the TAXON category service

use std::sync::Arc;
use std::time::Duration;

use taxon_service::{
    CategoryService, DispatchOutcome, InvalidationBus, InvalidationListener, ListenerSummary,
};
use taxon_storage::{CacheStore, CategoryWriter, UpdateOutcome};
use taxon_test_utils::assertions::assert_tree_unavailable;
use taxon_test_utils::*;

fn service_over(storage: &Arc<MockStorage>) -> CategoryService {
    CategoryService::new(
        fixtures::test_config(),
        Arc::new(CacheStore::new()),
        Arc::clone(storage) as Arc<dyn CategorySource>,
        Arc::clone(storage) as Arc<dyn AttributeSource>,
    )
    .expect("valid config")
}

#[tokio::test]
async fn smoke_test_build_resolve_remove() -> TaxonResult<()> {
    let scope = ScopeId::now_v7();
    let tree = fixtures::tree_from_paths(scope, &["/a1/a2"]);
    let storage = tree.storage();
    let service = service_over(&storage);
    let a1 = tree.id_at("/a1");
    let a2 = tree.id_at("/a1/a2");

    let node = service.resolve_path(scope, "/a1/a2").await?.expect("a2 resolves");
    assert_eq!(node.id(), a2);
    assert_eq!(node.depth(), 2);
    let node = service.resolve_identifier(scope, a2).await?.expect("a2 by id");
    assert_eq!(node.full_path(), "/a1/a2");

    let crumbs: Vec<_> = service
        .breadcrumb(scope, a2)
        .await?
        .iter()
        .map(|n| n.id())
        .collect();
    assert_eq!(crumbs, vec![tree.root_id, a1, a2]);

    storage.trash_category(scope, a1).await?;
    let outcome = service
        .notify_local_change(InvalidationEvent::category(scope, a1, EventOrigin::Local))
        .await?;
    assert_eq!(
        outcome,
        DispatchOutcome::Trees(vec![(scope, UpdateOutcome::Removed { count: 2 })])
    );

    assert!(service.resolve_identifier(scope, a1).await?.is_none());
    assert!(service.resolve_identifier(scope, a2).await?.is_none());
    assert!(service.resolve_path(scope, "/a1/a2").await?.is_none());
    assert_eq!(storage.category_fetch_count(), 1);
    Ok(())
}

#[tokio::test]
async fn smoke_test_insert_then_resolve_without_rebuild() -> TaxonResult<()> {
    let scope = ScopeId::now_v7();
    let tree = fixtures::tree_from_paths(scope, &["/fruit"]);
    let storage = tree.storage();
    let service = service_over(&storage);
    service.tree(scope).await?;

    let apple = CategoryId::now_v7();
    storage
        .persist_category(&CategoryRecord::child(scope, apple, tree.id_at("/fruit"), "apple"))
        .await?;
    service
        .notify_local_change(InvalidationEvent::category(scope, apple, EventOrigin::Local))
        .await?;

    let node = service.resolve_path(scope, "fruit/apple/").await?.expect("apple resolves");
    assert_eq!(node.id(), apple);
    assert_eq!(storage.category_fetch_count(), 1);
    Ok(())
}

#[tokio::test]
async fn smoke_test_missing_root_is_unavailable_not_empty() {
    let scope = ScopeId::now_v7();
    let storage = Arc::new(MockStorage::new());
    storage
        .insert_category(CategoryRecord::child(
            scope,
            CategoryId::now_v7(),
            CategoryId::now_v7(),
            "floating",
        ))
        .expect("insert");
    let service = service_over(&storage);

    assert_tree_unavailable(&service.resolve_path(scope, "/floating").await, scope);
    // Never cached: the next call fetches again.
    assert_tree_unavailable(&service.resolve_path(scope, "/").await, scope);
    assert_eq!(storage.category_fetch_count(), 2);
}

#[tokio::test]
async fn smoke_test_slow_source_times_out_and_recovers() -> TaxonResult<()> {
    let scope = ScopeId::now_v7();
    let tree = fixtures::tree_from_paths(scope, &["/a1"]);
    let storage = tree.storage();
    storage.set_fetch_delay(Some(Duration::from_secs(2)))?;
    let service = CategoryService::new(
        fixtures::test_config().with_build_timeout(Duration::from_millis(20)),
        Arc::new(CacheStore::new()),
        Arc::clone(&storage) as Arc<dyn CategorySource>,
        Arc::clone(&storage) as Arc<dyn AttributeSource>,
    )?;

    assertions::assert_build_timeout(&service.resolve_path(scope, "/a1").await);
    assert_eq!(service.stats().entry_count, 0);

    storage.set_fetch_delay(None)?;
    assert!(service.resolve_path(scope, "/a1").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn smoke_test_change_propagates_between_instances() -> TaxonResult<()> {
    let scope = ScopeId::now_v7();
    let tree = fixtures::tree_from_paths(scope, &["/a1/a2", "/b1"]);
    let storage = tree.storage();
    let bus = InvalidationBus::from_config(&fixtures::test_config().with_listener_capacity(16));

    let writer = service_over(&storage).with_bus(bus.clone());
    let reader = Arc::new(service_over(&storage));
    let listener = InvalidationListener::new(Arc::clone(&reader), &bus).spawn();

    writer.tree(scope).await?;
    reader.tree(scope).await?;

    let a1 = tree.id_at("/a1");
    storage
        .persist_category(&CategoryRecord::child(scope, a1, tree.id_at("/b1"), "moved"))
        .await?;
    writer
        .notify_local_change(InvalidationEvent::category(scope, a1, EventOrigin::Local))
        .await?;
    assert!(writer.resolve_path(scope, "/b1/moved/a2").await?.is_some());

    // Payloads the listener cannot decode are counted, not fatal.
    bus.publish_payload("{not json");

    // Closing the bus stops the listener after it drained everything.
    drop(writer);
    drop(bus);
    let summary = listener.await.expect("listener task");
    assert_eq!(
        summary,
        ListenerSummary {
            applied: 1,
            rejected: 1,
            lagged: 0,
        }
    );
    assert!(reader.resolve_path(scope, "/b1/moved/a2").await?.is_some());
    assert!(reader.resolve_path(scope, "/a1").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn smoke_test_lagging_listener_drops_caches() -> TaxonResult<()> {
    let scope = ScopeId::now_v7();
    let tree = fixtures::tree_from_paths(scope, &["/a1"]);
    let storage = tree.storage();
    let bus = InvalidationBus::from_config(&fixtures::test_config().with_listener_capacity(1));
    let reader = Arc::new(service_over(&storage));
    reader.tree(scope).await?;

    // Subscribe first, then overflow the one-slot buffer before draining.
    let listener = InvalidationListener::new(Arc::clone(&reader), &bus);
    for _ in 0..3 {
        bus.publish(&InvalidationEvent::new(
            EntityTag::Metadata,
            tree.id_at("/a1").into(),
            EventOrigin::OriginatedElsewhere,
        ))?;
    }
    drop(bus);
    let summary = listener.run().await;

    assert_eq!(summary.lagged, 1);
    assert_eq!(summary.applied, 1);
    assert!(reader.trees().cached(scope)?.is_none());
    Ok(())
}
