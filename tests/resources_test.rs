// Integration tests for the project and product clients
//
// These tests cover CRUD calls, error mapping and the per-project product cache.

use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use projecthub_client::auth::token::unsigned_expiring_in;
use projecthub_client::auth::{MemoryTokenStore, SessionManager};
use projecthub_client::config::DebugMode;
use projecthub_client::error::SessionError;
use projecthub_client::http_client::ApiClient;
use projecthub_client::resources::{Draft, ProductsApi, ProjectsApi};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

async fn api_client(server: &ServerGuard) -> Arc<ApiClient> {
    let store = Arc::new(MemoryTokenStore::with_token(unsigned_expiring_in(3600, "ada")));
    let session = Arc::new(
        SessionManager::new(format!("{}/api", server.url()), store, 300, 5, 10)
            .expect("Failed to create session manager"),
    );
    assert!(session.initialize().await);

    Arc::new(ApiClient::new(session, 5, 10, DebugMode::Off).expect("Failed to create API client"))
}

// ==================================================================================================
// Project Tests
// ==================================================================================================

#[tokio::test]
async fn test_list_projects() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/projects")
        .match_header("authorization", Matcher::Regex("^Bearer .+".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"[{"id": 1, "name": "Apollo", "description": "Moon"},
                {"id": "b7", "name": "Gemini", "owner_id": 3}]"#,
        )
        .expect(1)
        .create_async()
        .await;

    let projects = ProjectsApi::new(api_client(&server).await);
    let list = projects.list().await.unwrap();

    assert_eq!(list.len(), 2);
    assert_eq!(list[0].id, "1");
    assert_eq!(list[0].description.as_deref(), Some("Moon"));
    assert_eq!(list[1].id, "b7");
    assert_eq!(list[1].extra["owner_id"], 3);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_project_crud() {
    let mut server = Server::new_async().await;

    let create = server
        .mock("POST", "/api/projects")
        .match_body(Matcher::Json(json!({"name": "Apollo", "description": "Moon"})))
        .with_status(201)
        .with_body(r#"{"id": 3, "name": "Apollo", "description": "Moon"}"#)
        .expect(1)
        .create_async()
        .await;
    let get = server
        .mock("GET", "/api/projects/3")
        .with_status(200)
        .with_body(r#"{"id": 3, "name": "Apollo", "description": "Moon"}"#)
        .expect(1)
        .create_async()
        .await;
    let update = server
        .mock("PUT", "/api/projects/3")
        .match_body(Matcher::Json(json!({"description": "Mars"})))
        .with_status(200)
        .with_body(r#"{"id": 3, "name": "Apollo", "description": "Mars"}"#)
        .expect(1)
        .create_async()
        .await;
    let delete = server
        .mock("DELETE", "/api/projects/3")
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let projects = ProjectsApi::new(api_client(&server).await);

    let created = projects
        .create(&Draft::named("Apollo").description("Moon"))
        .await
        .unwrap();
    assert_eq!(created.id, "3");

    assert_eq!(projects.get("3").await.unwrap().name, "Apollo");

    let updated = projects
        .update("3", &Draft::default().description("Mars"))
        .await
        .unwrap();
    assert_eq!(updated.description.as_deref(), Some("Mars"));

    projects.delete("3").await.unwrap();

    create.assert_async().await;
    get.assert_async().await;
    update.assert_async().await;
    delete.assert_async().await;
}

// ==================================================================================================
// Error Mapping Tests
// ==================================================================================================

#[tokio::test]
async fn test_forbidden_maps_to_forbidden() {
    let mut server = Server::new_async().await;
    server
        .mock("DELETE", "/api/projects/9")
        .with_status(403)
        .with_body(r#"{"detail": "Not the project owner"}"#)
        .create_async()
        .await;

    let projects = ProjectsApi::new(api_client(&server).await);
    let err = projects.delete("9").await.unwrap_err();

    assert!(matches!(err, SessionError::Forbidden(ref m) if m == "Not the project owner"));
    assert_eq!(
        err.user_message(),
        "You do not have permission to perform this action."
    );
}

#[tokio::test]
async fn test_not_found_maps_to_api_error() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/projects/404")
        .with_status(404)
        .with_body(r#"{"detail": "Project not found"}"#)
        .create_async()
        .await;

    let projects = ProjectsApi::new(api_client(&server).await);
    let err = projects.get("404").await.unwrap_err();

    match err {
        SessionError::Api { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "Project not found");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_rejected_session_maps_to_session_expired() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/projects")
        .with_status(401)
        .create_async()
        .await;
    server
        .mock("POST", "/api/auth/token")
        .with_status(401)
        .create_async()
        .await;

    let client = api_client(&server).await;
    let projects = ProjectsApi::new(client.clone());
    let err = projects.list().await.unwrap_err();

    assert!(matches!(err, SessionError::SessionExpired));
    assert!(err.requires_sign_in());
    assert!(!client.session().is_authenticated().await);
}

#[tokio::test]
async fn test_undecodable_body_is_reported() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/projects")
        .with_status(200)
        .with_body("<html>maintenance</html>")
        .create_async()
        .await;

    let projects = ProjectsApi::new(api_client(&server).await);
    let err = projects.list().await.unwrap_err();

    assert!(!err.is_network());
    match err {
        SessionError::Api { status, ref message } => {
            assert_eq!(status, 200);
            assert!(message.starts_with("Invalid response body"), "{}", message);
        }
        ref other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.user_message().starts_with("Invalid response body"));
}

// ==================================================================================================
// Product Tests
// ==================================================================================================

#[tokio::test]
async fn test_product_list_is_cached_and_tagged() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/projects/1/products")
        .with_status(200)
        .with_body(r#"[{"id": 10, "name": "Lander"}, {"id": 11, "name": "Rover", "project_id": 99}]"#)
        .expect(2)
        .create_async()
        .await;

    let products = ProductsApi::new(api_client(&server).await);

    let first = products.list("1", false).await.unwrap();
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|p| p.project_id.as_deref() == Some("1")));
    assert!(products.cache().is_fresh("1"));

    // Served from cache
    let second = products.list("1", false).await.unwrap();
    assert_eq!(second, first);

    // Forced reload
    products.list("1", true).await.unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_product_mutations_invalidate_cache() {
    let mut server = Server::new_async().await;
    let list = server
        .mock("GET", "/api/projects/1/products")
        .with_status(200)
        .with_body(r#"[{"id": 10, "name": "Lander"}]"#)
        .expect(3)
        .create_async()
        .await;
    let create = server
        .mock("POST", "/api/projects/1/products")
        .match_body(Matcher::Json(json!({"name": "Rover"})))
        .with_status(201)
        .with_body(r#"{"id": 11, "name": "Rover", "project_id": 1}"#)
        .expect(1)
        .create_async()
        .await;
    let update = server
        .mock("PUT", "/api/projects/1/products/11")
        .match_body(Matcher::Json(json!({"name": "Rover II"})))
        .with_status(200)
        .with_body(r#"{"id": 11, "name": "Rover II"}"#)
        .expect(1)
        .create_async()
        .await;
    let delete = server
        .mock("DELETE", "/api/projects/1/products/11")
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let products = ProductsApi::new(api_client(&server).await);

    products.list("1", false).await.unwrap();
    let created = products.create("1", &Draft::named("Rover")).await.unwrap();
    assert_eq!(created.project_id.as_deref(), Some("1"));
    assert!(!products.cache().is_fresh("1"));

    products.list("1", false).await.unwrap();
    products
        .update("1", "11", &Draft::named("Rover II"))
        .await
        .unwrap();
    assert!(!products.cache().is_fresh("1"));

    products.list("1", false).await.unwrap();
    products.delete("1", "11").await.unwrap();
    assert!(!products.cache().is_fresh("1"));

    list.assert_async().await;
    create.assert_async().await;
    update.assert_async().await;
    delete.assert_async().await;
}

#[tokio::test]
async fn test_product_cache_expires() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/projects/1/products")
        .with_status(200)
        .with_body("[]")
        .expect(2)
        .create_async()
        .await;

    let products = ProductsApi::with_ttl(api_client(&server).await, Duration::ZERO);
    products.list("1", false).await.unwrap();
    products.list("1", false).await.unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_list_many_combines_projects_in_order() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/projects/1/products")
        .with_status(200)
        .with_body(r#"[{"id": 10, "name": "Lander"}]"#)
        .create_async()
        .await;
    server
        .mock("GET", "/api/projects/2/products")
        .with_status(200)
        .with_body(r#"[{"id": 20, "name": "Capsule"}, {"id": 21, "name": "Booster"}]"#)
        .create_async()
        .await;

    let products = ProductsApi::new(api_client(&server).await);
    let all = products
        .list_many(&["1".to_string(), "2".to_string()])
        .await
        .unwrap();

    let tagged: Vec<(&str, &str)> = all
        .iter()
        .map(|p| (p.project_id.as_deref().unwrap(), p.id.as_str()))
        .collect();
    assert_eq!(tagged, vec![("1", "10"), ("2", "20"), ("2", "21")]);

    assert!(products.list_many(&[]).await.unwrap().is_empty());

    products.clear_project_cache("1");
    assert!(!products.cache().is_fresh("1"));
    assert!(products.cache().is_fresh("2"));
    products.clear_all();
    assert!(products.cache().is_empty());
}

#[tokio::test]
async fn test_list_many_fails_when_one_project_fails() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/projects/1/products")
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;
    server
        .mock("GET", "/api/projects/2/products")
        .with_status(500)
        .with_body("oops")
        .create_async()
        .await;

    let products = ProductsApi::new(api_client(&server).await);
    let err = products
        .list_many(&["1".to_string(), "2".to_string()])
        .await
        .unwrap_err();

    match err {
        SessionError::Api { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "Failed to fetch products for project 2");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}
