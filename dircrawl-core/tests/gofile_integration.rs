use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dircrawl_core::contract::{HttpResponse, MockTransport, Populate};
use dircrawl_core::crawl::Crawler;
use dircrawl_core::error::CrawlError;
use dircrawl_core::providers::gofile::{GoFileProvider, ACCOUNT_TOKEN_KEY};
use dircrawl_core::providers::{ProviderRegistry, ProviderTag};
use dircrawl_core::session::CrawlSession;
use dircrawl_core::tree::DirectoryNode;
use serde_json::json;

fn account(token: &str) -> HttpResponse {
    HttpResponse::ok(json!({ "status": "ok", "data": { "token": token } }).to_string())
}

fn contents(entries: serde_json::Value) -> HttpResponse {
    HttpResponse::ok(json!({ "status": "ok", "data": { "contents": entries } }).to_string())
}

fn root() -> Arc<DirectoryNode> {
    DirectoryNode::root("https://gofile.io/d/root", "root", Some(ProviderTag::GoFile))
}

#[tokio::test]
async fn creates_account_once_then_lists_folder() {
    let mut transport = MockTransport::new();
    transport
        .expect_get()
        .withf(|url| url == "https://api.gofile.io/createAccount")
        .times(1)
        .returning(|_| Ok(account("tok")));
    transport
        .expect_get()
        .withf(|url| {
            url == "https://api.gofile.io/getContent?contentId=root&token=tok&websiteToken=12345"
        })
        .times(1)
        .returning(|_| {
            Ok(contents(json!({
                "f1": { "type": "folder", "id": "f1", "name": "Sub" },
                "x9": {
                    "type": "file",
                    "id": "x9",
                    "name": "notes.txt",
                    "size": 42,
                    "directLink": "https://store1.gofile.io/download/x9/notes.txt"
                }
            })))
        });

    let provider = GoFileProvider::new(Arc::new(transport));
    let session = CrawlSession::new();
    let node = root();

    provider.populate(&node, &session).await.unwrap();

    let children = node.children();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].url(), "https://gofile.io/d/f1");
    assert_eq!(children[0].name(), "Sub");
    assert_eq!(children[0].provider(), Some(ProviderTag::GoFile));

    let files = node.files();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name, "notes.txt");
    assert_eq!(files[0].size_bytes, 42);
    assert_eq!(session.credential(ACCOUNT_TOKEN_KEY).as_deref(), Some("tok"));
}

#[tokio::test]
async fn seeded_token_skips_account_creation() {
    let mut transport = MockTransport::new();
    transport
        .expect_get()
        .withf(|url| url.contains("createAccount"))
        .never();
    transport
        .expect_get()
        .withf(|url| url.contains("getContent") && url.contains("token=seeded"))
        .times(1)
        .returning(|_| Ok(contents(json!({}))));

    let provider = GoFileProvider::new(Arc::new(transport));
    let session = CrawlSession::new();
    assert!(session.seed_credential(ACCOUNT_TOKEN_KEY, "seeded"));

    provider.populate(&root(), &session).await.unwrap();
}

#[tokio::test]
async fn rejected_account_fails_the_node() {
    let mut transport = MockTransport::new();
    transport
        .expect_get()
        .withf(|url| url.contains("createAccount"))
        .times(1)
        .returning(|_| Ok(HttpResponse::ok(json!({ "status": "error-rateLimit" }).to_string())));
    transport
        .expect_get()
        .withf(|url| url.contains("getContent"))
        .never();

    let provider = GoFileProvider::new(Arc::new(transport));
    let session = CrawlSession::new();
    let node = root();

    let err = provider.populate(&node, &session).await.unwrap_err();

    assert!(matches!(err, CrawlError::CredentialAcquisitionFailed { .. }));
    assert!(node.is_failed());
    assert_eq!(session.error_urls(), vec!["https://gofile.io/d/root".to_string()]);
}

#[tokio::test]
async fn unparseable_address_makes_no_requests() {
    let mut transport = MockTransport::new();
    transport.expect_get().never();

    let provider = GoFileProvider::new(Arc::new(transport));
    let session = CrawlSession::new();
    let node = DirectoryNode::root("https://gofile.io/welcome", "x", Some(ProviderTag::GoFile));

    let err = provider.populate(&node, &session).await.unwrap_err();
    assert!(matches!(err, CrawlError::AddressUnparseable { .. }));
    assert_eq!(session.error_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sibling_folders_share_one_account() {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();

    let mut transport = MockTransport::new();
    transport
        .expect_get()
        .withf(|url| url.contains("createAccount"))
        .returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(account("tok"))
        });
    transport
        .expect_get()
        .withf(|url| url.contains("contentId=root&"))
        .returning(|_| {
            Ok(contents(json!({
                "a": { "type": "folder", "id": "a", "name": "A" },
                "b": { "type": "folder", "id": "b", "name": "B" },
                "c": { "type": "folder", "id": "c", "name": "C" },
                "d": { "type": "folder", "id": "d", "name": "D" }
            })))
        });
    transport
        .expect_get()
        .withf(|url| url.contains("getContent") && !url.contains("contentId=root&"))
        .times(4)
        .returning(|_| Ok(contents(json!({}))));

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(GoFileProvider::new(Arc::new(transport))));
    let crawler = Crawler::new(registry).with_max_concurrent_nodes(4);
    let session = CrawlSession::new();

    let report = crawler.crawl(&root(), &session).await;

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(report.directories, 5);
    assert_eq!(report.error_count, 0);
}
