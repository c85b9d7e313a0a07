//! Integration tests for Cartwright.
//!
//! # Running Tests
//!
//! ```bash
//! # In-process server over in-memory storage
//! cargo test -p cartwright-integration-tests
//!
//! # Also exercise PostgreSQL (migrated database required)
//! STOREFRONT_DATABASE_URL=postgres://... cargo test -p cartwright-integration-tests -- --ignored
//! ```
//!
//! # Test Categories
//!
//! - `cart_api` - HTTP behavior of `/cart` through a real socket
//! - `cart_postgres` - Cart engine against `PostgreSQL`

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tokio::task::JoinHandle;

use cartwright_core::{ProductId, UserId, VariantId};
use cartwright_storefront::cart::identity::{ANONYMOUS_COOKIE_NAME, AUTH_COOKIE_NAME};
use cartwright_storefront::config::StorefrontConfig;
use cartwright_storefront::memory::{MemoryCartStore, MemoryCatalog, MemorySessionValidator};
use cartwright_storefront::routes;
use cartwright_storefront::state::AppState;

/// Product with sized variants.
pub const TEE: ProductId = ProductId::new(1);
pub const TEE_SMALL: VariantId = VariantId::new(11);
pub const TEE_LARGE: VariantId = VariantId::new(12);

/// Single-variant product.
pub const STICKER: ProductId = ProductId::new(2);
pub const STICKER_DEFAULT: VariantId = VariantId::new(21);

/// Session token accepted for [`ALICE`].
pub const ALICE_TOKEN: &str = "session-alice";
pub const ALICE: UserId = UserId::new(7);

/// Catalog every test server starts with.
#[must_use]
pub fn test_catalog() -> MemoryCatalog {
    MemoryCatalog::new()
        .with_product(
            TEE,
            "pineapple-tee",
            "Pineapple Tee",
            &[(TEE_SMALL, "Small"), (TEE_LARGE, "Large")],
        )
        .with_image(TEE, "https://cdn.example.com/tee.png")
        .with_product(
            STICKER,
            "sticker",
            "Sticker",
            &[(STICKER_DEFAULT, "Default Title")],
        )
}

/// Configuration for tests; the database URL is never dialed.
///
/// # Panics
///
/// Panics if the built-in variables fail to load.
#[must_use]
pub fn test_config() -> StorefrontConfig {
    StorefrontConfig::from_lookup(|key| match key {
        "STOREFRONT_DATABASE_URL" => Some("postgres://localhost/cartwright_test".to_string()),
        "STOREFRONT_BASE_URL" => Some("http://localhost:3000".to_string()),
        _ => None,
    })
    .expect("test configuration should load")
}

/// A storefront served on an ephemeral port over in-memory backends.
pub struct TestServer {
    pub base_url: String,
    pub store: MemoryCartStore,
    client: Client,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a server that knows [`ALICE_TOKEN`].
    pub async fn start() -> Self {
        Self::start_with(MemorySessionValidator::new().with_session(ALICE_TOKEN, ALICE)).await
    }

    /// Start a server with the given session backend.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be bound.
    pub async fn start_with(sessions: MemorySessionValidator) -> Self {
        let store = MemoryCartStore::new();
        let state = AppState::with_backends(
            test_config(),
            Arc::new(store.clone()),
            Arc::new(test_catalog()),
            Arc::new(sessions),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("listener has an address");

        let app = routes::app(state);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("test server failed");
        });

        Self {
            base_url: format!("http://{addr}"),
            store,
            client: Client::new(),
            handle,
        }
    }

    /// A browser with an empty cookie jar.
    #[must_use]
    pub fn browser(&self) -> Browser {
        Browser {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            cookies: BTreeMap::new(),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A response as the tests inspect it.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    /// Raw `Set-Cookie` header, if any.
    pub set_cookie: Option<String>,
    /// `x-request-id` response header.
    pub request_id: Option<String>,
    /// JSON body, or `Value::Null` when the body is not JSON.
    pub body: Value,
    pub text: String,
}

impl TestResponse {
    /// `error.kind` of an error body.
    #[must_use]
    pub fn error_kind(&self) -> Option<&str> {
        self.body["error"]["kind"].as_str()
    }

    /// Quantity of the `(product, variant)` line in a cart body, or zero.
    #[must_use]
    pub fn quantity_of(&self, product: ProductId, variant: Option<VariantId>) -> u64 {
        self.body["items"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|item| {
                item["product_id"].as_i64() == Some(i64::from(product.as_i32()))
                    && item["variant_id"].as_i64() == variant.map(|v| i64::from(v.as_i32()))
            })
            .and_then(|item| item["quantity"].as_u64())
            .unwrap_or(0)
    }

    /// Id of the first line in a cart body.
    ///
    /// # Panics
    ///
    /// Panics if the cart has no lines.
    #[must_use]
    pub fn first_line_id(&self) -> i64 {
        self.body["items"][0]["id"]
            .as_i64()
            .expect("cart should have a line")
    }
}

/// A cookie-keeping HTTP client, standing in for one browser.
pub struct Browser {
    client: Client,
    base_url: String,
    cookies: BTreeMap<String, String>,
}

impl Browser {
    /// Present a session token from now on.
    pub fn log_in(&mut self, token: &str) {
        self.cookies
            .insert(AUTH_COOKIE_NAME.to_string(), token.to_string());
    }

    /// Stop presenting the session token; the anonymous cookie stays.
    pub fn log_out(&mut self) {
        self.cookies.remove(AUTH_COOKIE_NAME);
    }

    /// The anonymous cart cookie value held by this browser.
    #[must_use]
    pub fn anonymous_id(&self) -> Option<&str> {
        self.cookies.get(ANONYMOUS_COOKIE_NAME).map(String::as_str)
    }

    pub async fn get(&mut self, path: &str) -> TestResponse {
        self.send(Method::GET, path, None).await
    }

    pub async fn post(&mut self, path: &str, body: Value) -> TestResponse {
        self.send(Method::POST, path, Some(body.to_string())).await
    }

    pub async fn put(&mut self, path: &str, body: Value) -> TestResponse {
        self.send(Method::PUT, path, Some(body.to_string())).await
    }

    pub async fn delete(&mut self, path: &str, body: Value) -> TestResponse {
        self.send(Method::DELETE, path, Some(body.to_string())).await
    }

    /// Send `body` verbatim as `application/json`.
    ///
    /// # Panics
    ///
    /// Panics if the server cannot be reached.
    pub async fn send(&mut self, method: Method, path: &str, body: Option<String>) -> TestResponse {
        let mut request = self
            .client
            .request(method, format!("{}{path}", self.base_url));

        if !self.cookies.is_empty() {
            let header = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.header(COOKIE, header);
        }
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = request.send().await.expect("request should reach server");
        let status = response.status();
        let set_cookie = header_string(&response, SET_COOKIE.as_str());
        let request_id = header_string(&response, "x-request-id");
        let text = response.text().await.expect("response body");
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);

        if let Some(raw) = &set_cookie {
            self.remember(raw);
        }

        TestResponse {
            status,
            set_cookie,
            request_id,
            body,
            text,
        }
    }

    fn remember(&mut self, set_cookie: &str) {
        let pair = set_cookie.split(';').next().unwrap_or_default();
        if let Some((name, value)) = pair.split_once('=') {
            self.cookies
                .insert(name.trim().to_string(), value.trim().to_string());
        }
    }
}

fn header_string(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(String::from)
}
