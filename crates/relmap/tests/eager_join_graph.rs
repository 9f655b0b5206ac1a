//! Eager join plans and row reconstruction, end to end.

mod common;

use asupersync::runtime::RuntimeBuilder;
use asupersync::Cx;
use relmap::{
    Dialect, GraphTarget, IncludePath, JoinDependency, Preloader, RecordObject, Row, Store,
    StoreSession, Value,
};

use common::*;

fn run_test<F: std::future::Future<Output = ()>>(f: impl FnOnce(Cx) -> F) {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    rt.block_on(f(cx));
}

#[test]
fn through_chain_plan_joins_three_tables_without_collisions() {
    let dependency =
        JoinDependency::build::<Post>(&[IncludePath::new("tags")], Dialect::Postgres).unwrap();

    // taggings plus tags, hanging off the posts root.
    assert_eq!(dependency.join_plan().len(), 2);
    let (sql, _) = dependency.select().build();
    assert!(sql.contains("LEFT JOIN taggings"));
    assert!(sql.contains("LEFT JOIN tags"));

    let mut names: Vec<&str> = vec!["posts"];
    for join in dependency.join_plan() {
        names.push(join.table_reference());
    }
    let distinct: std::collections::HashSet<&str> = names.iter().copied().collect();
    assert_eq!(distinct.len(), names.len());
}

#[test]
fn polymorphic_discriminator_predicate_is_always_bound() {
    let dependency =
        JoinDependency::build::<Post>(&[IncludePath::new("pictures")], Dialect::Postgres)
            .unwrap();
    let (sql, params) = dependency.select().build();
    assert!(sql.contains("imageable_type"));
    assert!(params.contains(&Value::Text("Post".to_string())));
}

#[test]
fn eager_query_round_trips_into_loaded_objects() {
    run_test(|cx| async move {
        let dependency = JoinDependency::build::<Post>(
            &[IncludePath::new("comments")],
            Dialect::Postgres,
        )
        .unwrap();

        let store = RecordingStore::new();
        let eager_row = |post_id: i64, comment: Option<(i64, &str)>| {
            let (cid, cbody, cpost) = match comment {
                Some((id, body)) => (
                    Value::BigInt(id),
                    Value::Text(body.to_string()),
                    Value::BigInt(post_id),
                ),
                None => (Value::Null, Value::Null, Value::Null),
            };
            Row::from_pairs(vec![
                ("posts__id", Value::BigInt(post_id)),
                ("posts__title", Value::Text(format!("post {post_id}"))),
                ("posts__author_id", Value::Null),
                ("comments__id", cid),
                ("comments__body", cbody),
                ("comments__post_id", cpost),
            ])
        };
        store.respond(
            "LEFT JOIN comments",
            vec![
                eager_row(1, Some((10, "first"))),
                eager_row(1, Some((11, "second"))),
                eager_row(2, None),
            ],
        );
        let session = StoreSession::new(&store);

        let (sql, params) = dependency.select().build();
        assert!(sql.starts_with("SELECT posts.id AS posts__id"));
        let rows = unwrap_outcome(store.query(&cx, &sql, &params).await);

        let graphs = dependency.instantiate(&rows).unwrap();
        assert_eq!(graphs.len(), 2);
        match graphs[0].associations.get("comments") {
            Some(GraphTarget::Many(children)) => assert_eq!(children.len(), 2),
            other => panic!("expected two comments, got {other:?}"),
        }

        // Adopting the graph marks the association loaded, so the lazy
        // path issues no redundant query afterwards.
        let mut objects: Vec<RecordObject> = graphs
            .into_iter()
            .map(|graph| RecordObject::from_graph(graph, POST_REFLECTIONS))
            .collect();
        assert!(objects.iter().all(|o| o.association_loaded("comments")));

        let queries_before = store.query_count();
        unwrap_outcome(objects[0].read_many(&cx, &session, "comments").await);
        unwrap_outcome(objects[1].read_many(&cx, &session, "comments").await);
        assert_eq!(store.query_count(), queries_before);

        // And the preloader skips the whole group.
        let report = unwrap_outcome(
            Preloader::new(&session)
                .preload(&cx, &mut objects, &[IncludePath::new("comments")])
                .await,
        );
        assert_eq!(report.queries, 0);
    });
}

#[test]
fn many_to_many_plan_threads_the_join_table() {
    let dependency =
        JoinDependency::build::<Post>(&[IncludePath::new("categories")], Dialect::Postgres)
            .unwrap();
    let (sql, _) = dependency.select().build();
    let join_table_at = sql.find("LEFT JOIN categories_posts").unwrap();
    let target_at = sql.find("LEFT JOIN categories ON").unwrap();
    // The synthesized join-table hop comes before the target join.
    assert!(join_table_at < target_at);
}

#[test]
fn shared_prefix_paths_reuse_one_join() {
    let dependency = JoinDependency::build::<Post>(
        &[
            IncludePath::new("comments"),
            IncludePath::new("comments").nest(IncludePath::new("author")),
        ],
        Dialect::Postgres,
    )
    .unwrap();

    // "comments" appears once; its nested author hangs off the same node.
    assert_eq!(dependency.nodes().len(), 2);
    assert_eq!(dependency.join_plan().len(), 2);
    assert_eq!(dependency.nodes()[1].parent, Some(0));
}
