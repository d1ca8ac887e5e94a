//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{TimeZone, Utc};
use serde_json::json;
use weir_core::{
  collection::CollectionIndexes,
  label::{Label, LabelQuery},
  query::{FacetFilter, Filter, ListQuery, SortKey},
  record::{FacetKind, RecordUri},
  store::{LabelStore, RecordStore},
};

use crate::SqliteStore;

const POSTS: &str = "app.test.post";

async fn store() -> SqliteStore {
  let indexes = CollectionIndexes::new().with(POSTS, ["title", "createdAt"]);
  SqliteStore::open_in_memory(indexes)
    .await
    .expect("in-memory store")
}

fn post_uri(rkey: &str) -> RecordUri {
  RecordUri::new("did:plc:alice", POSTS, rkey)
}

async fn put_post(
  s: &SqliteStore,
  rkey: &str,
  cid: &str,
  title: &str,
  created_at: &str,
) {
  s.put_record(
    &post_uri(rkey),
    cid,
    json!({ "title": title, "createdAt": created_at }),
  )
  .await
  .unwrap();
}

// ─── Put / get / delete ──────────────────────────────────────────────────────

#[tokio::test]
async fn end_to_end_scenario() {
  let s = store().await;
  let uri = RecordUri::parse("at://did:x/app.test.post/abc").unwrap();

  s.put_record(
    &uri,
    "bafyabc",
    json!({ "title": "hi", "createdAt": "2024-01-01T00:00:00Z" }),
  )
  .await
  .unwrap();

  let got = s.get_record(&uri).await.unwrap().unwrap();
  assert_eq!(got.uri, "at://did:x/app.test.post/abc");
  assert_eq!(got.cid, "bafyabc");
  assert_eq!(got.did, "did:x");
  assert_eq!(got.collection, POSTS);
  assert_eq!(got.json["title"], "hi");

  let page = s
    .list_records(POSTS, ListQuery {
      order: vec![SortKey::asc("createdAt")],
      limit: Some(1),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(page.items.len(), 1);
  assert_eq!(page.items[0].json["title"], "hi");
  assert!(page.next_cursor.is_none());

  assert!(s.delete_record(&uri).await.unwrap());
  assert!(s.get_record(&uri).await.unwrap().is_none());
}

#[tokio::test]
async fn get_missing_returns_none() {
  let s = store().await;
  let got = s.get_record(&post_uri("nope")).await.unwrap();
  assert!(got.is_none());
}

#[tokio::test]
async fn delete_missing_returns_false() {
  let s = store().await;
  assert!(!s.delete_record(&post_uri("nope")).await.unwrap());
}

#[tokio::test]
async fn put_is_an_upsert_keyed_on_uri() {
  let s = store().await;
  put_post(&s, "a", "cid1", "first", "2024-01-01T00:00:00Z").await;
  put_post(&s, "a", "cid2", "second", "2024-01-01T00:00:00Z").await;

  let got = s.get_record(&post_uri("a")).await.unwrap().unwrap();
  assert_eq!(got.cid, "cid2");
  assert_eq!(got.json["title"], "second");

  let count = s.count_records(POSTS, None, None).await.unwrap();
  assert_eq!(count, 1);
}

#[tokio::test]
async fn redelivering_the_same_revision_leaves_the_row_unchanged() {
  let s = store().await;
  let body = json!({ "title": "same", "createdAt": "2024-01-01T00:00:00Z" });

  s.put_record(&post_uri("a"), "cid1", body.clone()).await.unwrap();
  let first = s.get_record(&post_uri("a")).await.unwrap().unwrap();

  // Same uri/cid pair again: the row, watermark included, must not move.
  let returned =
    s.put_record(&post_uri("a"), "cid1", body.clone()).await.unwrap();
  let second = s.get_record(&post_uri("a")).await.unwrap().unwrap();
  assert_eq!(first, second);
  assert_eq!(returned, second);

  // A new cid is a real revision and does move the watermark.
  let third = s.put_record(&post_uri("a"), "cid2", body).await.unwrap();
  assert_eq!(third.cid, "cid2");
  assert!(third.indexed_at >= first.indexed_at);
}

#[tokio::test]
async fn put_rejects_non_object_body() {
  let s = store().await;
  let err = s.put_record(&post_uri("a"), "cid1", json!("scalar")).await;
  assert!(err.is_err());
}

// ─── KV index maintenance ────────────────────────────────────────────────────

#[tokio::test]
async fn kv_rows_follow_fields_present_in_body() {
  let s = store().await;
  put_post(&s, "a", "cid1", "hello", "2024-01-01T00:00:00Z").await;

  let by_title = s
    .count_records(POSTS, Some(Filter::equals("title", "hello")), None)
    .await
    .unwrap();
  assert_eq!(by_title, 1);

  // Rewrite the record without `title`: the KV row must be dropped so the
  // index-join filter no longer matches.
  s.put_record(
    &post_uri("a"),
    "cid2",
    json!({ "createdAt": "2024-01-01T00:00:00Z" }),
  )
  .await
  .unwrap();

  let by_title = s
    .count_records(POSTS, Some(Filter::equals("title", "hello")), None)
    .await
    .unwrap();
  assert_eq!(by_title, 0);
}

// ─── Facet index maintenance ─────────────────────────────────────────────────

fn body_with_tag(tag: &str) -> serde_json::Value {
  json!({
    "title": "tagged",
    "createdAt": "2024-01-01T00:00:00Z",
    "facets": [
      { "features": [ { "$type": "app.bsky.richtext.facet#tag", "tag": tag } ] }
    ]
  })
}

#[tokio::test]
async fn facet_filter_matches_extracted_tags() {
  let s = store().await;
  s.put_record(&post_uri("a"), "cid1", body_with_tag("rust"))
    .await
    .unwrap();
  s.put_record(&post_uri("b"), "cid2", body_with_tag("go"))
    .await
    .unwrap();

  let facet = FacetFilter { kind: FacetKind::Tag, value: "rust".into() };
  let page = s
    .list_records(POSTS, ListQuery {
      facet: Some(facet.clone()),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(page.items.len(), 1);
  assert!(page.items[0].uri.ends_with("/a"));

  let count = s.count_records(POSTS, None, Some(facet)).await.unwrap();
  assert_eq!(count, 1);
}

#[tokio::test]
async fn facet_index_is_fully_recomputed_on_rewrite() {
  let s = store().await;
  s.put_record(&post_uri("a"), "cid1", body_with_tag("rust"))
    .await
    .unwrap();
  s.put_record(&post_uri("a"), "cid2", body_with_tag("go"))
    .await
    .unwrap();

  let old = FacetFilter { kind: FacetKind::Tag, value: "rust".into() };
  let new = FacetFilter { kind: FacetKind::Tag, value: "go".into() };
  assert_eq!(s.count_records(POSTS, None, Some(old)).await.unwrap(), 0);
  assert_eq!(s.count_records(POSTS, None, Some(new)).await.unwrap(), 1);
}

// ─── Filters ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn filters_resolve_columns_kv_and_json() {
  let s = store().await;
  s.put_record(
    &post_uri("a"),
    "cid1",
    json!({
      "title": "alpha",
      "createdAt": "2024-01-01T00:00:00Z",
      "body": "long form text",
    }),
  )
  .await
  .unwrap();
  s.put_record(
    &RecordUri::new("did:plc:bob", POSTS, "b"),
    "cid2",
    json!({ "title": "beta", "createdAt": "2024-02-01T00:00:00Z" }),
  )
  .await
  .unwrap();

  // Fixed column.
  let n = s
    .count_records(POSTS, Some(Filter::equals("did", "did:plc:bob")), None)
    .await
    .unwrap();
  assert_eq!(n, 1);

  // Configured (KV-indexed) field.
  let n = s
    .count_records(POSTS, Some(Filter::equals("title", "alpha")), None)
    .await
    .unwrap();
  assert_eq!(n, 1);

  // Unconfigured field via JSON extraction.
  let n = s
    .count_records(
      POSTS,
      Some(Filter::equals("body", "long form text")),
      None,
    )
    .await
    .unwrap();
  assert_eq!(n, 1);
}

#[tokio::test]
async fn compound_filters() {
  let s = store().await;
  put_post(&s, "a", "cid1", "alpha", "2024-01-01T00:00:00Z").await;
  put_post(&s, "b", "cid2", "beta", "2024-02-01T00:00:00Z").await;
  put_post(&s, "c", "cid3", "gamma", "2024-03-01T00:00:00Z").await;

  let n = s
    .count_records(
      POSTS,
      Some(Filter::or([
        Filter::equals("title", "alpha"),
        Filter::equals("title", "beta"),
      ])),
      None,
    )
    .await
    .unwrap();
  assert_eq!(n, 2);

  let n = s
    .count_records(
      POSTS,
      Some(Filter::not(Filter::within("title", ["alpha", "beta"]))),
      None,
    )
    .await
    .unwrap();
  assert_eq!(n, 1);

  let n = s
    .count_records(POSTS, Some(Filter::contains("title", "amm")), None)
    .await
    .unwrap();
  assert_eq!(n, 1);
}

#[tokio::test]
async fn invalid_filter_fragment_degrades_instead_of_failing() {
  let s = store().await;
  put_post(&s, "a", "cid1", "alpha", "2024-01-01T00:00:00Z").await;

  // Empty IN list is skipped; the remaining branch still applies.
  let n = s
    .count_records(
      POSTS,
      Some(Filter::and([
        Filter::within("title", Vec::<String>::new()),
        Filter::equals("title", "alpha"),
      ])),
      None,
    )
    .await
    .unwrap();
  assert_eq!(n, 1);
}

// ─── Pagination ──────────────────────────────────────────────────────────────

async fn seed_five_posts(s: &SqliteStore) {
  for (i, rkey) in ["a", "b", "c", "d", "e"].iter().enumerate() {
    put_post(
      s,
      rkey,
      &format!("cid{i}"),
      &format!("post {i}"),
      &format!("2024-01-0{}T00:00:00Z", i + 1),
    )
    .await;
  }
}

async fn collect_all_pages(
  s: &SqliteStore,
  order: Vec<SortKey>,
  limit: u32,
) -> Vec<String> {
  let mut uris = Vec::new();
  let mut cursor = None;
  loop {
    let page = s
      .list_records(POSTS, ListQuery {
        order: order.clone(),
        cursor,
        limit: Some(limit),
        ..Default::default()
      })
      .await
      .unwrap();
    uris.extend(page.items.iter().map(|r| r.uri.clone()));
    match page.next_cursor {
      Some(next) => cursor = Some(next),
      None => break,
    }
  }
  uris
}

#[tokio::test]
async fn count_equals_sum_of_pages() {
  let s = store().await;
  seed_five_posts(&s).await;

  let uris = collect_all_pages(&s, vec![SortKey::asc("createdAt")], 2).await;
  let count = s.count_records(POSTS, None, None).await.unwrap();
  assert_eq!(uris.len() as u64, count);
  assert_eq!(count, 5);
}

#[tokio::test]
async fn pages_are_ordered_and_disjoint() {
  let s = store().await;
  seed_five_posts(&s).await;

  let uris = collect_all_pages(&s, vec![SortKey::desc("createdAt")], 2).await;
  assert_eq!(uris.len(), 5);
  // Descending createdAt: e, d, c, b, a.
  let rkeys: Vec<&str> =
    uris.iter().map(|u| u.rsplit('/').next().unwrap()).collect();
  assert_eq!(rkeys, ["e", "d", "c", "b", "a"]);
}

#[tokio::test]
async fn pagination_is_stable_under_concurrent_inserts() {
  let s = store().await;
  seed_five_posts(&s).await;

  let order = vec![SortKey::asc("createdAt")];
  let first = s
    .list_records(POSTS, ListQuery {
      order: order.clone(),
      limit: Some(2),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(first.items.len(), 2);
  let cursor = first.next_cursor.clone().unwrap();

  // A record sorting before the cursor lands mid-walk; keyset resume must
  // neither replay already-returned rows nor skip pending ones.
  put_post(&s, "early", "cidX", "late arrival", "2024-01-01T00:00:00Z").await;

  let mut seen: Vec<String> =
    first.items.iter().map(|r| r.uri.clone()).collect();
  let mut cursor = Some(cursor);
  while let Some(c) = cursor {
    let page = s
      .list_records(POSTS, ListQuery {
        order: order.clone(),
        cursor: Some(c),
        limit: Some(2),
        ..Default::default()
      })
      .await
      .unwrap();
    seen.extend(page.items.iter().map(|r| r.uri.clone()));
    cursor = page.next_cursor;
  }

  let mut deduped = seen.clone();
  deduped.sort();
  deduped.dedup();
  assert_eq!(deduped.len(), seen.len(), "duplicate rows across pages");
  for rkey in ["a", "b", "c", "d", "e"] {
    assert!(
      seen.iter().any(|u| u.ends_with(&format!("/{rkey}"))),
      "missing {rkey}"
    );
  }
}

#[tokio::test]
async fn pagination_covers_records_missing_the_sort_field() {
  let s = store().await;
  // Three records without `title` and two with. Title-ordered walking puts
  // a page boundary inside the untitled block; every record must still
  // appear exactly once.
  for (i, rkey) in ["u1", "u2", "u3"].iter().enumerate() {
    s.put_record(
      &post_uri(rkey),
      &format!("cidu{i}"),
      json!({ "createdAt": "2024-01-01T00:00:00Z" }),
    )
    .await
    .unwrap();
  }
  put_post(&s, "t1", "cidt1", "alpha", "2024-01-01T00:00:00Z").await;
  put_post(&s, "t2", "cidt2", "beta", "2024-01-01T00:00:00Z").await;

  let uris = collect_all_pages(&s, vec![SortKey::asc("title")], 2).await;
  assert_eq!(uris.len(), 5);
  let mut deduped = uris.clone();
  deduped.sort();
  deduped.dedup();
  assert_eq!(deduped.len(), 5, "duplicate rows across pages");
}

#[tokio::test]
async fn malformed_cursor_starts_from_beginning() {
  let s = store().await;
  seed_five_posts(&s).await;

  let page = s
    .list_records(POSTS, ListQuery {
      order: vec![SortKey::asc("createdAt")],
      cursor: Some("@@not-a-cursor@@".into()),
      limit: Some(3),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(page.items.len(), 3);
  assert!(page.items[0].uri.ends_with("/a"));
}

#[tokio::test]
async fn default_order_is_indexed_at_ascending() {
  let s = store().await;
  put_post(&s, "first", "cid1", "one", "2024-06-01T00:00:00Z").await;
  put_post(&s, "second", "cid2", "two", "2024-01-01T00:00:00Z").await;

  // Insertion order, not createdAt order.
  let page = s.list_records(POSTS, ListQuery::default()).await.unwrap();
  assert!(page.items[0].uri.ends_with("/first"));
  assert!(page.items[1].uri.ends_with("/second"));
}

// ─── Actors ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ensure_actor_is_lazy_and_refreshes_handle() {
  let s = store().await;

  let actor = s.ensure_actor("did:plc:alice", None).await.unwrap();
  assert_eq!(actor.did, "did:plc:alice");
  assert!(actor.handle.is_none());

  let actor = s
    .ensure_actor("did:plc:alice", Some("alice.example.com"))
    .await
    .unwrap();
  assert_eq!(actor.handle.as_deref(), Some("alice.example.com"));

  // A later observation without a handle keeps the known one.
  let actor = s.ensure_actor("did:plc:alice", None).await.unwrap();
  assert_eq!(actor.handle.as_deref(), Some("alice.example.com"));
}

#[tokio::test]
async fn last_seen_notifs_watermark() {
  let s = store().await;
  s.ensure_actor("did:plc:alice", None).await.unwrap();

  let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
  s.set_last_seen_notifs("did:plc:alice", at).await.unwrap();

  let actor = s.get_actor("did:plc:alice").await.unwrap().unwrap();
  assert_eq!(actor.last_seen_notifs, Some(at));
}

// ─── Labels ──────────────────────────────────────────────────────────────────

fn label_at(cts_hour: u32, neg: bool) -> Label {
  Label {
    src: "did:plc:mod".into(),
    uri: "at://did:plc:a/app.test.post/1".into(),
    cid: "bafy1".into(),
    val: "spam".into(),
    neg,
    cts: Utc.with_ymd_and_hms(2024, 1, 1, cts_hour, 0, 0).unwrap(),
    exp: None,
  }
}

fn subjects() -> LabelQuery {
  LabelQuery {
    subjects: vec!["at://did:plc:a/app.test.post/1".into()],
    issuers:  None,
  }
}

#[tokio::test]
async fn label_latest_wins_in_arrival_order() {
  let s = store().await;
  s.put_label(label_at(1, false)).await.unwrap();
  s.put_label(label_at(2, true)).await.unwrap();

  // The newer write is a negation, so nothing resolves.
  let labels = s.query_labels(&subjects()).await.unwrap();
  assert!(labels.is_empty());
}

#[tokio::test]
async fn label_latest_wins_in_reverse_arrival_order() {
  let s = store().await;
  s.put_label(label_at(2, true)).await.unwrap();
  s.put_label(label_at(1, false)).await.unwrap();

  // Same final state as arrival order: the T2 negation is authoritative.
  let labels = s.query_labels(&subjects()).await.unwrap();
  assert!(labels.is_empty());
}

#[tokio::test]
async fn label_newer_assertion_resolves() {
  let s = store().await;
  s.put_label(label_at(1, true)).await.unwrap();
  s.put_label(label_at(2, false)).await.unwrap();

  let labels = s.query_labels(&subjects()).await.unwrap();
  assert_eq!(labels.len(), 1);
  assert_eq!(labels[0].val, "spam");
  assert_eq!(labels[0].cts.format("%H").to_string(), "02");
}

#[tokio::test]
async fn expired_labels_do_not_resolve() {
  let s = store().await;
  let mut expired = label_at(1, false);
  expired.exp = Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
  s.put_label(expired).await.unwrap();

  let labels = s.query_labels(&subjects()).await.unwrap();
  assert!(labels.is_empty());
}

#[tokio::test]
async fn label_query_with_empty_subjects_is_empty() {
  let s = store().await;
  s.put_label(label_at(1, false)).await.unwrap();

  let labels = s
    .query_labels(&LabelQuery { subjects: vec![], issuers: None })
    .await
    .unwrap();
  assert!(labels.is_empty());
}

#[tokio::test]
async fn label_query_restricted_to_issuers() {
  let s = store().await;
  s.put_label(label_at(1, false)).await.unwrap();
  let mut other = label_at(1, false);
  other.src = "did:plc:othermod".into();
  other.val = "rude".into();
  s.put_label(other).await.unwrap();

  let mut q = subjects();
  q.issuers = Some(vec!["did:plc:othermod".into()]);
  let labels = s.query_labels(&q).await.unwrap();
  assert_eq!(labels.len(), 1);
  assert_eq!(labels[0].val, "rude");
}

#[tokio::test]
async fn clear_labels_wipes_everything() {
  let s = store().await;
  s.put_label(label_at(1, false)).await.unwrap();
  s.clear_labels().await.unwrap();

  let labels = s.query_labels(&subjects()).await.unwrap();
  assert!(labels.is_empty());
}
