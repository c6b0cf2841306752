use std::env;
use std::sync::Arc;

use docdb_client::{
    CancellationToken, ClientConfig, DocDbClient, FeedOptions, RequestOptions, ResourceType,
    collect_all,
};
use docdb_gateway::{GatewayConfig, ReqwestGateway};
use serde_json::json;

fn load_dotenv() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
}

fn live_tests_enabled(flag_name: &str) -> bool {
    load_dotenv();
    match env::var(flag_name) {
        Ok(value) => {
            let normalized = value.trim().to_ascii_lowercase();
            normalized == "1" || normalized == "true" || normalized == "yes"
        }
        Err(_) => false,
    }
}

fn live_client() -> Option<DocDbClient> {
    if env::var("DOCDB_ENDPOINT").map(|v| v.trim().is_empty()).unwrap_or(true) {
        eprintln!("skipping: DOCDB_ENDPOINT is not set");
        return None;
    }
    let gateway = ReqwestGateway::new(GatewayConfig::from_env()).expect("gateway config should be valid");
    Some(DocDbClient::new(Arc::new(gateway), ClientConfig::from_env()))
}

#[tokio::test(flavor = "current_thread")]
#[ignore = "requires RUN_LIVE_DOCDB_TESTS=1 and DOCDB_ENDPOINT (env or .env)"]
async fn live_read_database_feed_against_running_gateway() {
    if !live_tests_enabled("RUN_LIVE_DOCDB_TESTS") {
        return;
    }
    let Some(client) = live_client() else {
        return;
    };

    let mut feed = client.read_feed(
        "",
        ResourceType::Database,
        &FeedOptions::default().with_page_size(10),
        CancellationToken::new(),
    );
    let databases = collect_all(&mut feed).await.expect("database feed should drain");
    assert!(databases.iter().all(|db| db.get("id").is_some()));
}

#[tokio::test(flavor = "current_thread")]
#[ignore = "requires RUN_LIVE_DOCDB_TESTS=1, DOCDB_ENDPOINT and DOCDB_LIVE_COLLECTION (env or .env)"]
async fn live_create_then_read_document_carries_session_token() {
    if !live_tests_enabled("RUN_LIVE_DOCDB_TESTS") {
        return;
    }
    let Some(client) = live_client() else {
        return;
    };
    let Ok(collection) = env::var("DOCDB_LIVE_COLLECTION") else {
        eprintln!("skipping: DOCDB_LIVE_COLLECTION is not set");
        return;
    };
    let cancel = CancellationToken::new();

    let created = client
        .create_document(
            &collection,
            json!({"kind": "live-smoke"}),
            &RequestOptions::default(),
            false,
            &cancel,
        )
        .await
        .expect("create should succeed");
    let id = created.body["id"].as_str().expect("created document has an id").to_string();

    let link = format!("{}/docs/{id}", collection.trim_matches('/'));
    let read = client
        .read_resource(ResourceType::Document, &link, &RequestOptions::default(), &cancel)
        .await
        .expect("read should succeed");
    assert_eq!(read.body["id"], json!(id));
    assert!(client.session_store().get(&collection).is_some());

    client
        .delete_resource(ResourceType::Document, &link, &RequestOptions::default(), &cancel)
        .await
        .expect("delete should succeed");
}
