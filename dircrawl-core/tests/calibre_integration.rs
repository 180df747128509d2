use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dircrawl_core::contract::{HttpResponse, MockTransport, Populate, PopulateOutcome, Transport};
use dircrawl_core::error::CrawlError;
use dircrawl_core::providers::calibre::CalibreProvider;
use dircrawl_core::providers::ProviderTag;
use dircrawl_core::session::CrawlSession;
use dircrawl_core::tree::DirectoryNode;
use serde_json::json;
use tokio::sync::Notify;

const ROOT: &str = "http://books.local:8080/";
const BOOKS: usize = 250;

fn books_body(count: usize) -> String {
    let metadata: serde_json::Map<String, serde_json::Value> = (1..=count)
        .map(|id| {
            (
                id.to_string(),
                json!({
                    "title": format!("Book {id}"),
                    "author_sort": "Author, Some",
                    "formats": ["EPUB", "pdf"],
                    "format_sizes": { "EPUB": id, "PDF": id * 10 }
                }),
            )
        })
        .collect();
    json!({ "metadata": metadata }).to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn books_beyond_the_pool_size_are_all_attached() {
    let mut transport = MockTransport::new();
    transport
        .expect_get()
        .withf(|url| url.ends_with("interface-data/update"))
        .times(1)
        .returning(|_| {
            Ok(HttpResponse::ok(
                json!({ "library_map": { "Main": "Main Library" } }).to_string(),
            ))
        });
    transport
        .expect_get()
        .withf(|url| url.contains("books-init?library_id=Main"))
        .times(1)
        .returning(|_| Ok(HttpResponse::ok(books_body(BOOKS))));

    let provider = CalibreProvider::new(Arc::new(transport))
        .with_max_concurrency(4)
        .with_version(Some("calibre 5.12.0".to_string()));
    let session = CrawlSession::new();
    let root = DirectoryNode::root(ROOT, "books", Some(ProviderTag::Calibre));

    let outcome = provider.populate(&root, &session).await.unwrap();
    assert_eq!(outcome, PopulateOutcome::Populated { failed_passes: 0 });

    let library = &root.children()[0];
    let mut books = library.children();
    assert_eq!(books.len(), BOOKS);
    books.sort_by_key(|book| {
        book.name()
            .trim_start_matches("Book ")
            .parse::<usize>()
            .unwrap()
    });

    for (index, book) in books.iter().enumerate() {
        let id = index + 1;
        assert!(book.is_complete());
        assert!(!book.is_failed());
        assert_eq!(
            book.url(),
            format!("{ROOT}#book_id={id}&library_id=Main&panel=book_list")
        );
        let files = book.files();
        assert_eq!(files.len(), 3);
        assert_eq!(files[0].file_name, "cover.jpg");
        assert_eq!(files[0].url, format!("{ROOT}get/cover/{id}/Main"));
        assert_eq!(files[1].file_name, format!("Book {id} - Author, Some.epub"));
        assert_eq!(files[1].url, format!("{ROOT}get/EPUB/{id}/Main"));
        assert_eq!(files[1].size_bytes, id as u64);
        assert_eq!(files[2].file_name, format!("Book {id} - Author, Some.pdf"));
        assert_eq!(files[2].url, format!("{ROOT}get/PDF/{id}/Main"));
        assert_eq!(files[2].size_bytes, (id * 10) as u64);
    }

    assert_eq!(session.error_count(), 0);
    assert!(session.error_urls().is_empty());
}

/// Answers nothing until dropped, after telling the test a request is in flight.
struct StalledTransport {
    in_flight: Arc<Notify>,
}

#[async_trait]
impl Transport for StalledTransport {
    async fn get(&self, _url: &str) -> Result<HttpResponse, CrawlError> {
        self.in_flight.notify_one();
        std::future::pending().await
    }
}

#[tokio::test]
async fn cancellation_interrupts_request_in_flight() {
    let in_flight = Arc::new(Notify::new());
    let provider = CalibreProvider::new(Arc::new(StalledTransport {
        in_flight: in_flight.clone(),
    }))
    .with_version(Some("5.0".to_string()));
    let session = CrawlSession::new();
    let root = DirectoryNode::root(ROOT, "books", Some(ProviderTag::Calibre));

    let cancel_once_in_flight = async {
        in_flight.notified().await;
        session.cancel();
    };
    let (outcome, ()) = tokio::time::timeout(
        Duration::from_secs(5),
        async { tokio::join!(provider.populate(&root, &session), cancel_once_in_flight) },
    )
    .await
    .expect("populate should return promptly after cancellation");

    assert_eq!(outcome, Err(CrawlError::Cancelled));
    assert!(!root.is_failed());
    assert!(!root.is_complete());
    assert_eq!(session.error_count(), 0);
}
