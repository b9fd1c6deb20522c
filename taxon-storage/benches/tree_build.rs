use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use taxon_core::{CategoryId, CategoryRecord, EntityIdType, ScopeId};
use taxon_storage::build_tree;

/// A balanced tree with `fanout` children per node, `depth` levels deep,
/// returned leaves first.
fn balanced_records(scope: ScopeId, fanout: usize, depth: usize) -> Vec<CategoryRecord> {
    let root = CategoryId::now_v7();
    let mut records = vec![CategoryRecord::root(scope, root)];
    let mut level = vec![root];
    for _ in 0..depth {
        let mut next = Vec::with_capacity(level.len() * fanout);
        for parent in &level {
            for i in 0..fanout {
                let id = CategoryId::now_v7();
                records.push(CategoryRecord::child(scope, id, *parent, format!("c{i}")));
                next.push(id);
            }
        }
        level = next;
    }
    records.reverse();
    records
}

fn bench_tree_build(c: &mut Criterion) {
    let scope = ScopeId::now_v7();
    let records = balanced_records(scope, 8, 4);

    c.bench_function("tree/build_4681_nodes", |b| {
        b.iter(|| {
            let tree = build_tree(scope, black_box(records.clone())).expect("build tree");
            black_box(tree.len());
        });
    });

    let tree = build_tree(scope, records).expect("build tree");
    c.bench_function("tree/resolve_path", |b| {
        b.iter(|| black_box(tree.resolve_path(black_box("/c3/c7/c1/c5"))));
    });
}

criterion_group!(benches, bench_tree_build);
criterion_main!(benches);
