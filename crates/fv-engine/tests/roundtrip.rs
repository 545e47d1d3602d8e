//! Integration test: upload → download round-trip with in-memory storage
//!
//! Verifies the full pipeline: split → encrypt per fragment → store →
//! fetch → decrypt → reassemble → byte-equal output.

mod common;

use common::{Harness, OWNER};
use fv_core::types::DEFAULT_MIME_TYPE;
use fv_storage::BlobStore;
use std::collections::HashSet;
use std::sync::Arc;

#[tokio::test]
async fn hello_world_five_fragments() {
    let h = Harness::new();
    let content = b"HELLO WORLD!!";

    let receipt = h
        .service
        .upload(OWNER, "hello.txt", "text/plain", content.to_vec())
        .await
        .expect("upload");
    assert_eq!(receipt.original_name, "hello.txt");
    assert_eq!(receipt.size, 13);

    let record = h.record(&receipt.file_id).await;
    assert!(record.is_complete);
    assert_eq!(record.fragment_count, 5);
    let numbers: Vec<u32> = record.fragments.iter().map(|f| f.fragment_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);

    // ciphertext is length-preserving, so stored sizes mirror the split
    let mut sizes = Vec::new();
    for fragment in &record.fragments {
        assert!(fragment.blob_handle.starts_with(&format!("encrypted_files/{OWNER}/{}/", record.id)));
        assert!(fragment.blob_handle.ends_with(&format!("hello_fragment{}.txt", fragment.fragment_number)));
        sizes.push(h.blobs.inner().get(&fragment.blob_handle).await.unwrap().len());
    }
    assert_eq!(sizes, vec![3, 3, 3, 3, 1]);

    let file = h.service.download(OWNER, &receipt.file_id).await.expect("download");
    assert_eq!(file.content, content);
    assert_eq!(file.mime_type, "text/plain");
    assert_eq!(file.original_name, "hello.txt");
    assert_eq!(file.content_disposition(), "attachment; filename=\"hello.txt\"");
}

#[tokio::test]
async fn every_fragment_gets_its_own_key_and_nonce() {
    let h = Harness::new();
    let receipt = h
        .service
        .upload(OWNER, "same.bin", "", vec![0u8; 500])
        .await
        .unwrap();
    let record = h.record(&receipt.file_id).await;

    let keys: HashSet<&str> = record.fragments.iter().map(|f| f.encryption_key.as_str()).collect();
    let ivs: HashSet<&str> = record.fragments.iter().map(|f| f.iv.as_str()).collect();
    assert_eq!(keys.len(), 5);
    assert_eq!(ivs.len(), 5);

    // identical plaintext fragments must not produce identical ciphertext
    let a = h.blobs.inner().get(&record.fragments[0].blob_handle).await.unwrap();
    let b = h.blobs.inner().get(&record.fragments[1].blob_handle).await.unwrap();
    assert_ne!(a, b);
}

#[tokio::test]
async fn blank_mime_type_defaults() {
    let h = Harness::new();
    let receipt = h.service.upload(OWNER, "blob.dat", "  ", b"x".to_vec()).await.unwrap();
    let file = h.service.download(OWNER, &receipt.file_id).await.unwrap();
    assert_eq!(file.mime_type, DEFAULT_MIME_TYPE);
}

#[tokio::test]
async fn tiny_file_with_empty_trailing_fragments() {
    let h = Harness::new();
    let receipt = h.service.upload(OWNER, "abc.txt", "text/plain", b"abc".to_vec()).await.unwrap();

    let record = h.record(&receipt.file_id).await;
    assert_eq!(record.fragments.len(), 5);

    let file = h.service.download(OWNER, &receipt.file_id).await.unwrap();
    assert_eq!(file.content, b"abc");
}

#[tokio::test]
async fn large_file_roundtrip() {
    let h = Harness::new();
    let content: Vec<u8> = (0..1_048_583u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 24) as u8).collect();

    let receipt = h
        .service
        .upload(OWNER, "big.bin", "application/octet-stream", content.clone())
        .await
        .unwrap();
    let file = h.service.download(OWNER, &receipt.file_id).await.unwrap();
    assert_eq!(file.content.len(), content.len());
    assert_eq!(file.content, content);
}

#[tokio::test]
async fn custom_fragment_count() {
    let mut config = common::test_config();
    config.fragments.count = 8;
    config.fragments.upload_concurrency = 3;
    config.download.fetch_concurrency = 2;
    let h = Harness::with_config(config);

    let content = b"fragment count is configurable".to_vec();
    let receipt = h.service.upload(OWNER, "n.txt", "text/plain", content.clone()).await.unwrap();
    assert_eq!(h.record(&receipt.file_id).await.fragments.len(), 8);
    assert_eq!(h.service.download(OWNER, &receipt.file_id).await.unwrap().content, content);
}

#[tokio::test]
async fn memory_backend_has_no_fragment_links() {
    let h = Harness::new();
    let receipt = h.service.upload(OWNER, "l.txt", "text/plain", b"links".to_vec()).await.unwrap();

    let links = h.service.fragment_links(OWNER, &receipt.file_id).await.unwrap();
    let numbers: Vec<u32> = links.iter().map(|l| l.fragment_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    assert!(links.iter().all(|l| l.url.is_none()));

    let err = h.service.fragment_links(common::OTHER_OWNER, &receipt.file_id).await.unwrap_err();
    assert_eq!(err.kind(), fv_core::ErrorKind::NotFound);
}

#[tokio::test]
async fn every_operation_runs_on_a_spawned_task() {
    // tokio::spawn only accepts Send futures, so this fails to build if any
    // service future holds a non-Send borrow across an await
    let h = Harness::new();
    let service = Arc::new(h.service);

    let s = Arc::clone(&service);
    let receipt = tokio::spawn(async move {
        s.upload(OWNER, "spawned.txt", "text/plain", b"on a task".to_vec())
            .await
    })
    .await
    .unwrap()
    .unwrap();
    let id = receipt.file_id;

    let (s, file_id) = (Arc::clone(&service), id.clone());
    let file = tokio::spawn(async move { s.download(OWNER, &file_id).await })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(file.content, b"on a task");

    let (s, file_id) = (Arc::clone(&service), id.clone());
    let links = tokio::spawn(async move { s.fragment_links(OWNER, &file_id).await })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(links.len(), 5);

    let s = Arc::clone(&service);
    let listed = tokio::spawn(async move { s.list(OWNER).await })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(listed.len(), 1);

    let s = Arc::clone(&service);
    let report = tokio::spawn(async move { s.validate(OWNER).await })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.valid_files.len(), 1);

    let s = Arc::clone(&service);
    let cleaned = tokio::spawn(async move { s.cleanup(OWNER).await })
        .await
        .unwrap()
        .unwrap();
    assert!(cleaned.deleted_files.is_empty());

    let (s, file_id) = (Arc::clone(&service), id.clone());
    let deleted = tokio::spawn(async move { s.delete(OWNER, &file_id).await })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deleted.file_id, id);
    assert!(h.records.is_empty().await);
}

mod properties {
    use super::common::{self, Harness, OWNER};
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn any_content_and_count_roundtrips(
            content in proptest::collection::vec(any::<u8>(), 1..=4096),
            count in 1u32..=9,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let restored = rt.block_on(async {
                let mut config = common::test_config();
                config.fragments.count = count;
                let h = Harness::with_config(config);
                let receipt = h
                    .service
                    .upload(OWNER, "prop.bin", "", content.clone())
                    .await
                    .unwrap();
                h.service.download(OWNER, &receipt.file_id).await.unwrap().content
            });
            prop_assert_eq!(restored, content);
        }
    }
}
