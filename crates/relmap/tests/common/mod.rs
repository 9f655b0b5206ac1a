//! Shared test support: a scripted store double and a small blog schema.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Mutex;

use relmap::{
    Cx, Dependent, Error, JoinTable, MacroKind, Outcome, Record, RecordData, RecordObject,
    Reflection, Result, Row, Store, Value,
};

/// An in-memory store double. Responses are scripted by SQL substring;
/// every issued statement is logged so tests can assert query counts and
/// shapes.
#[derive(Debug, Default)]
pub struct RecordingStore {
    responses: Mutex<Vec<(String, Vec<Row>)>>,
    log: Mutex<Vec<String>>,
    failures: Mutex<Vec<String>>,
    next_insert_id: Mutex<i64>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            next_insert_id: Mutex::new(1000),
        }
    }

    /// Script rows for any query whose SQL contains `marker`.
    pub fn respond(&self, marker: &str, rows: Vec<Row>) {
        self.responses
            .lock()
            .unwrap()
            .push((marker.to_string(), rows));
    }

    /// Make any execute/insert whose SQL contains `marker` fail.
    pub fn fail_matching(&self, marker: &str) {
        self.failures.lock().unwrap().push(marker.to_string());
    }

    /// Every statement issued, in order.
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Number of SELECT queries issued.
    pub fn query_count(&self) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|sql| sql.starts_with("SELECT"))
            .count()
    }

    fn record(&self, sql: &str) {
        self.log.lock().unwrap().push(sql.to_string());
    }

    fn rows_for(&self, sql: &str) -> Vec<Row> {
        let responses = self.responses.lock().unwrap();
        responses
            .iter()
            .find(|(marker, _)| sql.contains(marker.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default()
    }

    fn failure_for(&self, sql: &str) -> Option<Error> {
        let failures = self.failures.lock().unwrap();
        failures
            .iter()
            .find(|marker| sql.contains(marker.as_str()))
            .map(|_| Error::query(sql.to_string(), "scripted failure"))
    }
}

impl Store for RecordingStore {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        self.record(sql);
        let rows = self.rows_for(sql);
        async move { Outcome::Ok(rows) }
    }

    fn query_one(
        &self,
        _cx: &Cx,
        sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        self.record(sql);
        let row = self.rows_for(sql).into_iter().next();
        async move { Outcome::Ok(row) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        self.record(sql);
        let failure = self.failure_for(sql);
        async move {
            match failure {
                Some(error) => Outcome::Err(error),
                None => Outcome::Ok(1),
            }
        }
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        self.record(sql);
        let failure = self.failure_for(sql);
        let id = {
            let mut next = self.next_insert_id.lock().unwrap();
            *next += 1;
            *next
        };
        async move {
            match failure {
                Some(error) => Outcome::Err(error),
                None => Outcome::Ok(id),
            }
        }
    }
}

/// Unwrap an outcome in tests, panicking on every non-Ok arm.
pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

// ---------------------------------------------------------------------------
// Test schema: posts, comments, users, tags (through taggings), pictures
// (polymorphic imageable).
// ---------------------------------------------------------------------------

fn post_columns() -> &'static [&'static str] {
    &["id", "title", "author_id"]
}

fn comment_columns() -> &'static [&'static str] {
    &["id", "body", "post_id"]
}

fn user_columns() -> &'static [&'static str] {
    &["id", "name"]
}

fn tag_columns() -> &'static [&'static str] {
    &["id", "label"]
}

fn tagging_columns() -> &'static [&'static str] {
    &["id", "post_id", "tag_id"]
}

fn picture_columns() -> &'static [&'static str] {
    &["id", "url", "imageable_id", "imageable_type"]
}

fn category_columns() -> &'static [&'static str] {
    &["id", "name"]
}

fn revision_columns() -> &'static [&'static str] {
    &["id", "post_id", "note"]
}

fn comment_reflections() -> &'static [Reflection] {
    static REFLECTIONS: &[Reflection] = &[Reflection::new(
        "author",
        MacroKind::BelongsTo,
        "comments",
        "users",
        "author_id",
    )
    .columns(user_columns)];
    REFLECTIONS
}

static POST_TAGGINGS: Reflection =
    Reflection::new("taggings", MacroKind::HasMany, "posts", "taggings", "post_id")
        .columns(tagging_columns);
static TAGGING_TAG: Reflection =
    Reflection::new("tag", MacroKind::BelongsTo, "taggings", "tags", "tag_id")
        .columns(tag_columns);
static TAGS_CHAIN: [&Reflection; 2] = [&POST_TAGGINGS, &TAGGING_TAG];

pub static POST_REFLECTIONS: &[Reflection] = &[
    Reflection::new("comments", MacroKind::HasMany, "posts", "comments", "post_id")
        .columns(comment_columns)
        .reflections(comment_reflections),
    Reflection::new("author", MacroKind::BelongsTo, "posts", "users", "author_id")
        .columns(user_columns),
    Reflection::new("tags", MacroKind::HasMany, "posts", "tags", "")
        .through(&TAGS_CHAIN)
        .columns(tag_columns)
        .distinct(),
    Reflection::new("pictures", MacroKind::HasMany, "posts", "pictures", "imageable_id")
        .polymorphic("imageable")
        .owner_type("Post")
        .columns(picture_columns),
    Reflection::new("categories", MacroKind::HasAndBelongsToMany, "posts", "categories", "")
        .join_table(JoinTable::new("categories_posts", "post_id", "category_id"))
        .columns(category_columns),
    Reflection::new("revisions", MacroKind::HasMany, "posts", "revisions", "post_id")
        .dependent(Dependent::Delete)
        .columns(revision_columns),
];

pub static PICTURE_REFLECTIONS: &[Reflection] = &[Reflection::new(
    "imageable",
    MacroKind::BelongsTo,
    "pictures",
    "",
    "imageable_id",
)
.polymorphic("imageable")];

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: Option<i64>,
    pub title: String,
    pub author_id: Option<i64>,
}

impl Record for Post {
    const TABLE_NAME: &'static str = "posts";
    const TYPE_NAME: &'static str = "Post";
    const REFLECTIONS: &'static [Reflection] = POST_REFLECTIONS;

    fn columns() -> &'static [&'static str] {
        post_columns()
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::from(self.id)),
            ("title", Value::from(self.title.clone())),
            ("author_id", Value::from(self.author_id)),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            title: row.get_named("title")?,
            author_id: row.get_named("author_id")?,
        })
    }

    fn primary_key_value(&self) -> Value {
        Value::from(self.id)
    }

    fn is_new(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Option<i64>,
    pub name: String,
}

impl Record for User {
    const TABLE_NAME: &'static str = "users";
    const TYPE_NAME: &'static str = "User";

    fn columns() -> &'static [&'static str] {
        user_columns()
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::from(self.id)),
            ("name", Value::from(self.name.clone())),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            name: row.get_named("name")?,
        })
    }

    fn primary_key_value(&self) -> Value {
        Value::from(self.id)
    }

    fn is_new(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Picture {
    pub id: Option<i64>,
    pub url: String,
    pub imageable_id: Option<i64>,
    pub imageable_type: Option<String>,
}

impl Record for Picture {
    const TABLE_NAME: &'static str = "pictures";
    const TYPE_NAME: &'static str = "Picture";
    const REFLECTIONS: &'static [Reflection] = PICTURE_REFLECTIONS;

    fn columns() -> &'static [&'static str] {
        picture_columns()
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::from(self.id)),
            ("url", Value::from(self.url.clone())),
            ("imageable_id", Value::from(self.imageable_id)),
            ("imageable_type", Value::from(self.imageable_type.clone())),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            url: row.get_named("url")?,
            imageable_id: row.get_named("imageable_id")?,
            imageable_type: row.get_named("imageable_type")?,
        })
    }

    fn primary_key_value(&self) -> Value {
        Value::from(self.id)
    }

    fn is_new(&self) -> bool {
        self.id.is_none()
    }
}

/// A post owner ready for association loading.
pub fn post_object(id: i64, author_id: Option<i64>) -> RecordObject {
    RecordObject::from_data(
        RecordData::from_row(
            "posts",
            "id",
            &Row::from_pairs(vec![
                ("id", Value::BigInt(id)),
                ("title", Value::Text(format!("post {id}"))),
                ("author_id", Value::from(author_id)),
            ]),
        ),
        POST_REFLECTIONS,
    )
}

/// A picture owner pointing at a polymorphic imageable.
pub fn picture_object(id: i64, imageable: Option<(&str, i64)>) -> RecordObject {
    let (type_name, type_id) = match imageable {
        Some((t, i)) => (Value::Text(t.to_string()), Value::BigInt(i)),
        None => (Value::Null, Value::Null),
    };
    RecordObject::from_data(
        RecordData::from_row(
            "pictures",
            "id",
            &Row::from_pairs(vec![
                ("id", Value::BigInt(id)),
                ("url", Value::Text(format!("/pictures/{id}"))),
                ("imageable_id", type_id),
                ("imageable_type", type_name),
            ]),
        ),
        PICTURE_REFLECTIONS,
    )
}

/// A persisted comment row as the store would return it.
pub fn comment_row(id: i64, post_id: i64, body: &str) -> Row {
    Row::from_pairs(vec![
        ("id", Value::BigInt(id)),
        ("body", Value::Text(body.to_string())),
        ("post_id", Value::BigInt(post_id)),
    ])
}

/// A persisted tag row as the store would return it from a through query.
pub fn tag_row(id: i64, label: &str, owner_key: i64) -> Row {
    Row::from_pairs(vec![
        ("id", Value::BigInt(id)),
        ("label", Value::Text(label.to_string())),
        ("_relmap_owner_key", Value::BigInt(owner_key)),
    ])
}

/// A persisted tag as a record object.
pub fn tag_object(id: i64, label: &str) -> RecordObject {
    RecordObject::from_data(
        RecordData::from_row(
            "tags",
            "id",
            &Row::from_pairs(vec![
                ("id", Value::BigInt(id)),
                ("label", Value::Text(label.to_string())),
            ]),
        ),
        &[],
    )
}

/// A persisted category as a record object.
pub fn category_object(id: i64, name: &str) -> RecordObject {
    RecordObject::from_data(
        RecordData::from_row(
            "categories",
            "id",
            &Row::from_pairs(vec![
                ("id", Value::BigInt(id)),
                ("name", Value::Text(name.to_string())),
            ]),
        ),
        &[],
    )
}

/// A comment as a record object (for mutation tests). Without an id the
/// object reads as a new, unsaved record.
pub fn comment_object(id: Option<i64>, post_id: Option<i64>, body: &str) -> RecordObject {
    let data = match id {
        Some(id) => RecordData::from_row(
            "comments",
            "id",
            &Row::from_pairs(vec![
                ("id", Value::BigInt(id)),
                ("body", Value::Text(body.to_string())),
                ("post_id", Value::from(post_id)),
            ]),
        ),
        None => {
            let mut fresh = RecordData::new("comments", "id");
            fresh.set("body", Value::Text(body.to_string()));
            if let Some(post_id) = post_id {
                fresh.set("post_id", Value::BigInt(post_id));
            }
            fresh
        }
    };
    RecordObject::from_data(data, &[])
}
