use blob_store::{ObjectStoreAdapter, PutObjectOptions, StoreOperation};
use bytes::Bytes;
use futures::future::join_all;

use crate::{
    binding::{BindingOptions, OutputBinding},
    error::BindingError,
    request::*,
    testing::{TestBinding, TEST_MIN_PART_SIZE},
};

const MIB: usize = 1024 * 1024;

fn put_request(key: &str, offset: usize, chunk: &[u8]) -> InvokeRequest {
    InvokeRequest::new(OperationKind::Put)
        .with_metadata(METADATA_KEY_BLOB_NAME, key)
        .with_metadata(METADATA_KEY_OFFSET, offset.to_string())
        .with_metadata(METADATA_KEY_DATA, hex::encode(chunk))
}

fn complete_request(key: &str) -> InvokeRequest {
    InvokeRequest::new(OperationKind::PutBlockList).with_metadata(METADATA_KEY_BLOB_NAME, key)
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[tokio::test]
async fn test_chunks_in_order_are_concatenated() {
    let test = TestBinding::with_default_part_size();
    let first = pattern(5 * MIB, 1);
    let second = pattern(5 * MIB, 2);

    let resp = test.binding.invoke(put_request("f", 0, &first)).await.unwrap();
    assert_eq!(resp.metadata[METADATA_KEY_PART_NUMBER], "1");
    let resp = test
        .binding
        .invoke(put_request("f", 5 * MIB, &second))
        .await
        .unwrap();
    assert_eq!(resp.metadata[METADATA_KEY_PART_NUMBER], "2");

    let resp = test.binding.invoke(complete_request("f")).await.unwrap();
    assert_eq!(resp.metadata[METADATA_KEY_PARTS], "2");
    assert_eq!(resp.metadata[METADATA_KEY_SIZE], (10 * MIB).to_string());

    let object = test.store.object("f").unwrap();
    assert_eq!(object.len(), 10 * MIB);
    assert_eq!(&object[..5 * MIB], &first[..]);
    assert_eq!(&object[5 * MIB..], &second[..]);
    assert_eq!(test.store.calls(StoreOperation::UploadPart), 2);
    assert!(!test.binding.sessions().is_active("f").await);
}

#[tokio::test]
async fn test_out_of_order_chunks_are_committed_by_offset() {
    let test = TestBinding::with_default_part_size();
    let head = pattern(5 * MIB, 3);
    let tail = pattern(5 * MIB, 4);

    test.binding
        .invoke(put_request("f", 5 * MIB, &tail))
        .await
        .unwrap();
    test.binding.invoke(put_request("f", 0, &head)).await.unwrap();
    test.binding.invoke(complete_request("f")).await.unwrap();

    let object = test.store.object("f").unwrap();
    assert_eq!(&object[..5 * MIB], &head[..]);
    assert_eq!(&object[5 * MIB..], &tail[..]);
}

#[tokio::test]
async fn test_failed_part_upload_discards_session() {
    let test = TestBinding::with_small_parts();
    test.store.fail_nth(StoreOperation::UploadPart, 2);

    test.binding
        .invoke(put_request("f", 0, &pattern(TEST_MIN_PART_SIZE, 1)))
        .await
        .unwrap();
    let err = test
        .binding
        .invoke(put_request("f", TEST_MIN_PART_SIZE, &pattern(TEST_MIN_PART_SIZE, 2)))
        .await
        .unwrap_err();
    assert!(matches!(err, BindingError::Store { .. }));

    let err = test.binding.invoke(complete_request("f")).await.unwrap_err();
    assert!(matches!(err, BindingError::NoActiveSession { .. }));
    assert!(test.store.object("f").is_none());
    assert_eq!(test.store.pending_uploads(), 0);
    assert_eq!(test.store.calls(StoreOperation::AbortMultipartUpload), 1);
    assert_eq!(test.store.calls(StoreOperation::CompleteMultipartUpload), 0);
}

#[tokio::test]
async fn test_upload_part_only_on_threshold_crossing() {
    let test = TestBinding::with_small_parts();
    let chunk = pattern(6, 0);

    let resp = test.binding.invoke(put_request("f", 0, &chunk)).await.unwrap();
    assert_eq!(resp.metadata[METADATA_KEY_BUFFERED_BYTES], "6");
    test.binding.invoke(put_request("f", 6, &chunk)).await.unwrap();
    assert_eq!(test.store.calls(StoreOperation::UploadPart), 0);

    // 18 bytes buffered crosses the 16 byte threshold once.
    let resp = test.binding.invoke(put_request("f", 12, &chunk)).await.unwrap();
    assert_eq!(resp.metadata[METADATA_KEY_PART_NUMBER], "1");
    assert_eq!(test.store.calls(StoreOperation::UploadPart), 1);

    test.binding.invoke(put_request("f", 18, &chunk)).await.unwrap();
    assert_eq!(test.store.calls(StoreOperation::UploadPart), 1);
}

#[tokio::test]
async fn test_small_trailing_part_is_committed() {
    let test = TestBinding::with_default_part_size();
    let body = pattern(5 * MIB, 7);
    let trailer = pattern(100, 8);

    test.binding.invoke(put_request("f", 0, &body)).await.unwrap();
    let resp = test
        .binding
        .invoke(put_request("f", 5 * MIB, &trailer))
        .await
        .unwrap();
    assert_eq!(resp.metadata[METADATA_KEY_BUFFERED_BYTES], "100");

    let resp = test.binding.invoke(complete_request("f")).await.unwrap();
    assert_eq!(resp.metadata[METADATA_KEY_PARTS], "2");

    let object = test.store.object("f").unwrap();
    assert_eq!(object.len(), 5 * MIB + 100);
    assert_eq!(&object[5 * MIB..], &trailer[..]);
}

#[tokio::test]
async fn test_buffered_chunks_are_flushed_with_latest_offset() {
    // Chunks buffered together travel as one part, placed at the offset of
    // the call that flushed them.
    let test = TestBinding::with_small_parts();
    test.binding
        .invoke(put_request("f", 100, b"late-0123456789"))
        .await
        .unwrap();
    test.binding
        .invoke(put_request("f", 115, b"late-tail"))
        .await
        .unwrap();
    test.binding.invoke(put_request("f", 0, b"early")).await.unwrap();
    test.binding.invoke(complete_request("f")).await.unwrap();

    assert_eq!(
        test.store.object("f").unwrap(),
        Bytes::from_static(b"earlylate-0123456789late-tail")
    );
}

#[tokio::test]
async fn test_concurrent_puts_are_serialized_per_key() {
    let test = TestBinding::with_small_parts();
    let binding = &test.binding;
    let keys = ["a", "b", "c"];
    // Every chunk fills a whole part, so each put uploads at its own offset.
    let chunks: Vec<(usize, Vec<u8>)> = (0..12)
        .map(|i| (i * TEST_MIN_PART_SIZE, pattern(TEST_MIN_PART_SIZE, i as u8)))
        .collect();

    let puts = keys.iter().flat_map(|key| {
        chunks
            .iter()
            .rev()
            .map(move |(offset, chunk)| binding.invoke(put_request(key, *offset, chunk)))
    });
    for result in join_all(puts).await {
        result.unwrap();
    }

    let completes = keys.iter().map(|key| binding.invoke(complete_request(key)));
    for result in join_all(completes).await {
        result.unwrap();
    }

    let expected: Vec<u8> = chunks.iter().flat_map(|(_, chunk)| chunk.clone()).collect();
    for key in keys {
        assert_eq!(test.store.object(key).unwrap(), Bytes::from(expected.clone()));
    }
    assert_eq!(test.store.calls(StoreOperation::UploadPart), 36);
    assert_eq!(test.store.pending_uploads(), 0);
    assert_eq!(binding.sessions().tracked_keys(), 0);
}

#[tokio::test]
async fn test_duplicate_offset_is_rejected() {
    let test = TestBinding::with_small_parts();
    test.binding.invoke(put_request("f", 0, b"abc")).await.unwrap();
    let err = test
        .binding
        .invoke(put_request("f", 0, b"xyz"))
        .await
        .unwrap_err();
    assert!(matches!(err, BindingError::DuplicateOffset { offset: 0, .. }));

    test.binding.invoke(complete_request("f")).await.unwrap();
    assert_eq!(test.store.object("f").unwrap(), Bytes::from_static(b"abc"));
}

#[tokio::test]
async fn test_abort_discards_buffered_chunks() {
    let test = TestBinding::with_small_parts();
    test.binding.invoke(put_request("f", 0, b"abc")).await.unwrap();

    let abort = |key: &str| {
        InvokeRequest::new(OperationKind::Abort).with_metadata(METADATA_KEY_BLOB_NAME, key)
    };
    let resp = test.binding.invoke(abort("f")).await.unwrap();
    assert_eq!(resp.metadata[METADATA_KEY_ABORTED], "true");
    let resp = test.binding.invoke(abort("f")).await.unwrap();
    assert_eq!(resp.metadata[METADATA_KEY_ABORTED], "false");

    assert!(test.store.object("f").is_none());
    assert_eq!(test.store.pending_uploads(), 0);
}

#[tokio::test]
async fn test_put_validation_happens_before_store_io() {
    let test = TestBinding::with_small_parts();
    let bad_hex = InvokeRequest::new(OperationKind::Put)
        .with_metadata(METADATA_KEY_BLOB_NAME, "f")
        .with_metadata(METADATA_KEY_OFFSET, "0")
        .with_metadata(METADATA_KEY_DATA, "zz");
    let no_offset = InvokeRequest::new(OperationKind::Put)
        .with_metadata(METADATA_KEY_BLOB_NAME, "f")
        .with_metadata(METADATA_KEY_DATA, "00");
    let no_name = InvokeRequest::new(OperationKind::Put)
        .with_metadata(METADATA_KEY_OFFSET, "0")
        .with_metadata(METADATA_KEY_DATA, "00");

    for request in [bad_hex, no_offset, no_name] {
        let err = test.binding.invoke(request).await.unwrap_err();
        assert!(matches!(err, BindingError::Validation { .. }));
    }
    assert_eq!(test.store.calls(StoreOperation::CreateMultipartUpload), 0);
}

#[tokio::test]
async fn test_create_get_head_delete() {
    let test = TestBinding::with_small_parts();
    let create = InvokeRequest::new(OperationKind::Create)
        .with_data(Bytes::from_static(b"hello world"))
        .with_metadata(METADATA_KEY_BLOB_NAME, "docs/hello.txt")
        .with_metadata("ContentType", "text/plain")
        .with_metadata("owner", "ops");
    let resp = test.binding.invoke(create).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&resp.data).unwrap();
    assert_eq!(body["blobURL"], "memory:///docs/hello.txt");
    assert_eq!(resp.metadata[METADATA_KEY_BLOB_NAME], "docs/hello.txt");

    let meta = test.store.head_object("docs/hello.txt").await.unwrap();
    assert_eq!(meta.content_type.as_deref(), Some("text/plain"));
    assert_eq!(meta.user_metadata.get("owner").map(String::as_str), Some("ops"));

    let ranged = InvokeRequest::new(OperationKind::Get)
        .with_metadata(METADATA_KEY_BLOB_NAME, "docs/hello.txt")
        .with_metadata(METADATA_KEY_OFFSET, "6")
        .with_metadata(METADATA_KEY_COUNT, "5")
        .with_metadata(METADATA_KEY_INCLUDE_METADATA, "true");
    let resp = test.binding.invoke(ranged).await.unwrap();
    assert_eq!(resp.data, b"world");
    assert_eq!(resp.metadata["owner"], "ops");

    let unparseable = InvokeRequest::new(OperationKind::Get)
        .with_metadata(METADATA_KEY_BLOB_NAME, "docs/hello.txt")
        .with_metadata(METADATA_KEY_OFFSET, "six");
    let resp = test.binding.invoke(unparseable).await.unwrap();
    assert_eq!(resp.data, b"hello world");

    let head = InvokeRequest::new(OperationKind::Head)
        .with_metadata(METADATA_KEY_BLOB_NAME, "docs/hello.txt");
    let resp = test.binding.invoke(head).await.unwrap();
    assert_eq!(resp.metadata[METADATA_KEY_CONTENT_LENGTH], "11");

    let delete = InvokeRequest::new(OperationKind::Delete)
        .with_metadata(METADATA_KEY_BLOB_NAME, "docs/hello.txt");
    test.binding.invoke(delete).await.unwrap();

    let get = InvokeRequest::new(OperationKind::Get)
        .with_metadata(METADATA_KEY_BLOB_NAME, "docs/hello.txt");
    let err = test.binding.invoke(get).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_create_generates_key_and_rejects_existing() {
    let test = TestBinding::new(BindingOptions {
        reject_existing: true,
        ..Default::default()
    });
    let resp = test
        .binding
        .invoke(InvokeRequest::new(OperationKind::Create).with_data(Bytes::from_static(b"x")))
        .await
        .unwrap();
    let key = resp.metadata[METADATA_KEY_BLOB_NAME].clone();
    assert_eq!(uuid::Uuid::parse_str(&key).unwrap().get_version_num(), 4);

    let again = InvokeRequest::new(OperationKind::Create)
        .with_data(Bytes::from_static(b"y"))
        .with_metadata(METADATA_KEY_BLOB_NAME, key.clone());
    let err = test.binding.invoke(again).await.unwrap_err();
    assert!(matches!(err, BindingError::AlreadyExists { .. }));
    assert_eq!(test.store.object(&key).unwrap(), Bytes::from_static(b"x"));
}

#[tokio::test]
async fn test_create_unquotes_and_decodes_payload() {
    let test = TestBinding::new(BindingOptions {
        unquote_payload: true,
        decode_base64: true,
        ..Default::default()
    });
    let create = InvokeRequest::new(OperationKind::Create)
        .with_data(Bytes::from_static(br#""aGVsbG8=""#))
        .with_metadata(METADATA_KEY_BLOB_NAME, "greeting");
    test.binding.invoke(create).await.unwrap();
    assert_eq!(
        test.store.object("greeting").unwrap(),
        Bytes::from_static(b"hello")
    );
}

#[tokio::test]
async fn test_create_checks_content_md5() {
    let test = TestBinding::with_small_parts();
    let invalid = InvokeRequest::new(OperationKind::Create)
        .with_data(Bytes::new())
        .with_metadata(METADATA_KEY_BLOB_NAME, "empty")
        .with_metadata(METADATA_KEY_CONTENT_MD5, "aGVsbG8=");
    let err = test.binding.invoke(invalid).await.unwrap_err();
    assert!(matches!(err, BindingError::Validation { .. }));
    assert_eq!(test.store.calls(StoreOperation::PutObject), 0);

    let legacy = InvokeRequest::new(OperationKind::Create)
        .with_data(Bytes::new())
        .with_metadata(METADATA_KEY_BLOB_NAME, "empty")
        .with_metadata("ContentMD5", "1B2M2Y8AsgTpgAmY7PhCfg==");
    test.binding.invoke(legacy).await.unwrap();
    let options = test.store.object_options("empty").unwrap();
    assert_eq!(
        options.content_md5.map(hex::encode).as_deref(),
        Some("d41d8cd98f00b204e9800998ecf8427e")
    );
    assert!(options.metadata.is_empty());
}

#[tokio::test]
async fn test_delete_snapshot_options() {
    let test = TestBinding::with_small_parts();
    test.store
        .put_object("doc", Bytes::from_static(b"v1"), PutObjectOptions::default())
        .await
        .unwrap();

    let invalid = InvokeRequest::new(OperationKind::Delete)
        .with_metadata(METADATA_KEY_BLOB_NAME, "doc")
        .with_metadata(METADATA_KEY_DELETE_SNAPSHOTS, "everything");
    let err = test.binding.invoke(invalid).await.unwrap_err();
    assert!(matches!(err, BindingError::Validation { .. }));
    assert_eq!(test.store.calls(StoreOperation::DeleteObject), 0);

    let only = InvokeRequest::new(OperationKind::Delete)
        .with_metadata(METADATA_KEY_BLOB_NAME, "doc")
        .with_metadata("DeleteSnapshotOptions", "only");
    test.binding.invoke(only).await.unwrap();
    assert!(test.store.object("doc").is_some());

    let include = InvokeRequest::new(OperationKind::Delete)
        .with_metadata(METADATA_KEY_BLOB_NAME, "doc")
        .with_metadata(METADATA_KEY_DELETE_SNAPSHOTS, "include");
    test.binding.invoke(include).await.unwrap();
    assert!(test.store.object("doc").is_none());
}

#[tokio::test]
async fn test_list_aggregates_rounds() {
    let test = TestBinding::with_small_parts();
    for i in 0..5003 {
        test.store
            .put_object(
                &format!("logs/{:05}", i),
                Bytes::from_static(b"."),
                PutObjectOptions::default(),
            )
            .await
            .unwrap();
    }
    test.store
        .put_object("other", Bytes::new(), PutObjectOptions::default())
        .await
        .unwrap();

    let list = InvokeRequest::new(OperationKind::List)
        .with_data(r#"{"prefix": "logs/", "maxResults": 5002}"#);
    let resp = test.binding.invoke(list).await.unwrap();
    let blobs: Vec<serde_json::Value> = serde_json::from_slice(&resp.data).unwrap();
    assert_eq!(blobs.len(), 5002);
    assert_eq!(resp.metadata[METADATA_KEY_NUMBER], "5002");
    assert_eq!(resp.metadata[METADATA_KEY_MARKER], "logs/05001");
    assert_eq!(test.store.calls(StoreOperation::ListObjects), 2);

    let rest = InvokeRequest::new(OperationKind::List)
        .with_data(r#"{"prefix": "logs/", "marker": "logs/05001"}"#);
    let resp = test.binding.invoke(rest).await.unwrap();
    let blobs: Vec<serde_json::Value> = serde_json::from_slice(&resp.data).unwrap();
    assert_eq!(blobs.len(), 1);
    assert_eq!(blobs[0]["name"], "logs/05002");
    assert_eq!(resp.metadata[METADATA_KEY_MARKER], "");
}

#[tokio::test]
async fn test_list_with_empty_body_uses_defaults() {
    let test = TestBinding::with_small_parts();
    test.store
        .put_object("a", Bytes::from_static(b"1"), PutObjectOptions::default())
        .await
        .unwrap();
    test.binding.invoke(put_request("pending", 0, b"12")).await.unwrap();

    let resp = test
        .binding
        .invoke(InvokeRequest::new(OperationKind::List))
        .await
        .unwrap();
    assert_eq!(resp.metadata[METADATA_KEY_NUMBER], "1");

    let with_uncommitted = InvokeRequest::new(OperationKind::List)
        .with_data(r#"{"include": {"uncommittedBlobs": true}}"#);
    let resp = test.binding.invoke(with_uncommitted).await.unwrap();
    let blobs: Vec<serde_json::Value> = serde_json::from_slice(&resp.data).unwrap();
    assert_eq!(blobs.len(), 2);
    assert_eq!(blobs[1]["name"], "pending");
    assert_eq!(blobs[1]["uncommitted"], true);
}

#[tokio::test]
async fn test_invalid_include_metadata_flag() {
    let test = TestBinding::with_small_parts();
    let get = InvokeRequest::new(OperationKind::Get)
        .with_metadata(METADATA_KEY_BLOB_NAME, "a")
        .with_metadata(METADATA_KEY_INCLUDE_METADATA, "sometimes");
    let err = test.binding.invoke(get).await.unwrap_err();
    assert!(matches!(err, BindingError::Validation { .. }));
    assert_eq!(test.store.calls(StoreOperation::GetObject), 0);
}
