//! Batch preload behavior: query-count bounds, grouping, idempotence.

mod common;

use asupersync::runtime::RuntimeBuilder;
use asupersync::Cx;
use relmap::{IncludePath, Preloader, StoreSession, TargetRegistry, Value};

use common::*;

fn run_test<F: std::future::Future<Output = ()>>(f: impl FnOnce(Cx) -> F) {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    rt.block_on(f(cx));
}

#[test]
fn preload_attaches_children_with_one_query() {
    run_test(|cx| async move {
        let store = RecordingStore::new();
        store.respond(
            "FROM comments",
            vec![comment_row(1, 7, "first"), comment_row(2, 7, "second")],
        );
        let session = StoreSession::new(&store);

        let mut owners = vec![post_object(7, None)];
        let report = unwrap_outcome(
            Preloader::new(&session)
                .preload(&cx, &mut owners, &[IncludePath::new("comments")])
                .await,
        );

        assert_eq!(report.groups, 1);
        assert_eq!(report.queries, 1);
        assert_eq!(store.query_count(), 1);

        assert!(owners[0].association_loaded("comments"));
        let children = owners[0].collection_target("comments").unwrap();
        assert_eq!(children.len(), 2);
        // Store order is preserved.
        assert_eq!(
            children[0].data().get("body"),
            Some(&Value::Text("first".to_string()))
        );
        assert_eq!(
            children[1].data().get("body"),
            Some(&Value::Text("second".to_string()))
        );
    });
}

#[test]
fn one_query_per_group_regardless_of_owner_count() {
    run_test(|cx| async move {
        let store = RecordingStore::new();
        store.respond(
            "FROM comments",
            vec![
                comment_row(1, 1, "a"),
                comment_row(2, 2, "b"),
                comment_row(3, 3, "c"),
            ],
        );
        store.respond(
            "FROM users",
            vec![
                relmap::Row::from_pairs(vec![
                    ("id", Value::BigInt(5)),
                    ("name", Value::Text("ada".to_string())),
                ]),
                relmap::Row::from_pairs(vec![
                    ("id", Value::BigInt(6)),
                    ("name", Value::Text("grace".to_string())),
                ]),
            ],
        );
        let session = StoreSession::new(&store);

        let mut owners = vec![
            post_object(1, Some(5)),
            post_object(2, Some(5)),
            post_object(3, Some(6)),
        ];
        let report = unwrap_outcome(
            Preloader::new(&session)
                .preload(
                    &cx,
                    &mut owners,
                    &[IncludePath::new("comments"), IncludePath::new("author")],
                )
                .await,
        );

        // Two association names, each one group: exactly two queries for
        // three owners.
        assert_eq!(report.groups, 2);
        assert_eq!(report.queries, 2);
        assert_eq!(store.query_count(), 2);

        // Rows partitioned back onto their owners by foreign key.
        assert_eq!(owners[0].collection_target("comments").unwrap().len(), 1);
        assert_eq!(owners[2].collection_target("comments").unwrap().len(), 1);
        let author = owners[2].singular_target("author").unwrap().unwrap();
        assert_eq!(author.data().get("name"), Some(&Value::Text("grace".to_string())));
        // Two owners share author 5: both attach a copy.
        assert!(owners[0].singular_target("author").unwrap().is_some());
        assert!(owners[1].singular_target("author").unwrap().is_some());
    });
}

#[test]
fn repeated_preload_issues_no_further_queries() {
    run_test(|cx| async move {
        let store = RecordingStore::new();
        store.respond("FROM comments", vec![comment_row(1, 7, "a")]);
        let session = StoreSession::new(&store);
        let paths = [IncludePath::new("comments")];

        let mut owners = vec![post_object(7, None)];
        let preloader = Preloader::new(&session);
        unwrap_outcome(preloader.preload(&cx, &mut owners, &paths).await);
        assert_eq!(store.query_count(), 1);

        let report = unwrap_outcome(preloader.preload(&cx, &mut owners, &paths).await);
        assert_eq!(report.queries, 0);
        assert_eq!(store.query_count(), 1);
    });
}

#[test]
fn empty_owner_set_is_a_no_op() {
    run_test(|cx| async move {
        let store = RecordingStore::new();
        let session = StoreSession::new(&store);
        let mut owners: Vec<relmap::RecordObject> = Vec::new();
        let report = unwrap_outcome(
            Preloader::new(&session)
                .preload(&cx, &mut owners, &[IncludePath::new("comments")])
                .await,
        );
        assert_eq!(report.queries, 0);
        assert!(store.statements().is_empty());
    });
}

#[test]
fn nested_paths_recurse_over_fresh_targets() {
    run_test(|cx| async move {
        let store = RecordingStore::new();
        let authored = |id: i64, body: &str| {
            relmap::Row::from_pairs(vec![
                ("id", Value::BigInt(id)),
                ("body", Value::Text(body.to_string())),
                ("post_id", Value::BigInt(7)),
                ("author_id", Value::BigInt(5)),
            ])
        };
        store.respond("FROM comments", vec![authored(1, "a"), authored(2, "b")]);
        store.respond(
            "FROM users",
            vec![relmap::Row::from_pairs(vec![
                ("id", Value::BigInt(5)),
                ("name", Value::Text("ada".to_string())),
            ])],
        );
        let session = StoreSession::new(&store);

        let mut owners = vec![post_object(7, None)];
        let path = IncludePath::new("comments").nest(IncludePath::new("author"));
        let report = unwrap_outcome(
            Preloader::new(&session)
                .preload(&cx, &mut owners, &[path])
                .await,
        );

        // One query for comments, one batched query for their authors.
        assert_eq!(report.queries, 2);
        let children = owners[0].collection_target("comments").unwrap();
        assert!(children[0].association_loaded("author"));
    });
}

#[test]
fn polymorphic_owners_group_by_concrete_target_type() {
    run_test(|cx| async move {
        let store = RecordingStore::new();
        store.respond(
            "FROM posts",
            vec![relmap::Row::from_pairs(vec![
                ("id", Value::BigInt(7)),
                ("title", Value::Text("a post".to_string())),
                ("author_id", Value::Null),
            ])],
        );
        store.respond(
            "FROM users",
            vec![relmap::Row::from_pairs(vec![
                ("id", Value::BigInt(5)),
                ("name", Value::Text("ada".to_string())),
            ])],
        );
        let registry = TargetRegistry::new().register::<Post>().register::<User>();
        let session = StoreSession::new(&store).with_registry(&registry);

        let mut owners = vec![
            picture_object(1, Some(("Post", 7))),
            picture_object(2, Some(("User", 5))),
            picture_object(3, None),
        ];
        let report = unwrap_outcome(
            Preloader::new(&session)
                .preload(&cx, &mut owners, &[IncludePath::new("imageable")])
                .await,
        );

        // Three discriminator values, two of them queryable.
        assert_eq!(report.groups, 3);
        assert_eq!(report.queries, 2);

        let post_target = owners[0].singular_target("imageable").unwrap().unwrap();
        assert_eq!(post_target.data().table(), "posts");
        let user_target = owners[1].singular_target("imageable").unwrap().unwrap();
        assert_eq!(user_target.data().table(), "users");
        // Null discriminator: loaded with no target, no query.
        assert!(owners[2].association_loaded("imageable"));
        assert!(owners[2].singular_target("imageable").unwrap().is_none());
    });
}

#[test]
fn through_association_preloads_in_one_join_query() {
    run_test(|cx| async move {
        let store = RecordingStore::new();
        store.respond(
            "FROM tags",
            vec![tag_row(1, "rust", 7), tag_row(2, "sql", 7)],
        );
        let session = StoreSession::new(&store);

        let mut owners = vec![post_object(7, None), post_object(8, None)];
        let report = unwrap_outcome(
            Preloader::new(&session)
                .preload(&cx, &mut owners, &[IncludePath::new("tags")])
                .await,
        );

        assert_eq!(report.queries, 1);
        let sql = &store.statements()[0];
        assert!(sql.contains("INNER JOIN taggings"));
        assert!(sql.contains("IN ($1, $2)"));

        let tags = owners[0].collection_target("tags").unwrap();
        assert_eq!(tags.len(), 2);
        // The injected partition key never leaks into attributes.
        assert!(tags[0].data().get("_relmap_owner_key").is_none());
        // Rows for post 7 only; post 8 reads loaded-empty.
        assert!(owners[1].collection_target("tags").unwrap().is_empty());
    });
}

#[test]
fn owners_without_keys_load_empty_without_querying() {
    run_test(|cx| async move {
        let store = RecordingStore::new();
        let session = StoreSession::new(&store);

        // belongs_to with a null foreign key: nothing to fetch.
        let mut owners = vec![post_object(7, None)];
        let report = unwrap_outcome(
            Preloader::new(&session)
                .preload(&cx, &mut owners, &[IncludePath::new("author")])
                .await,
        );
        assert_eq!(report.queries, 0);
        assert!(owners[0].association_loaded("author"));
        assert!(owners[0].singular_target("author").unwrap().is_none());
    });
}
