//! Cart route handlers.
//!
//! Every handler resolves the request identity first; a logged-in request
//! merges the browser's anonymous cart before anything else happens. All
//! responses, errors included, carry the `Set-Cookie` header when this
//! request minted the anonymous id.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    response::{AppendHeaders, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use cartwright_core::LineItemId;

use crate::cart::AddItem;
use crate::error::{AppError, Result, add_breadcrumb};
use crate::middleware::CartIdentity;
use crate::state::AppState;

/// Set-quantity request body.
#[derive(Debug, Deserialize)]
pub struct UpdateCartRequest {
    pub line_item_id: LineItemId,
    pub quantity: i64,
}

/// Remove-line request body.
#[derive(Debug, Deserialize)]
pub struct RemoveFromCartRequest {
    pub line_item_id: LineItemId,
}

/// Cart count response body.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CartCount {
    pub count: u64,
}

/// Render `result` as JSON, attaching the identity cookie either way.
fn respond<T: Serialize>(identity: &CartIdentity, result: Result<T>) -> Response {
    let cookie = AppendHeaders(identity.set_cookie());
    match result {
        Ok(body) => (cookie, Json(body)).into_response(),
        Err(err) => (cookie, err).into_response(),
    }
}

/// Display the cart.
#[instrument(skip(state, identity))]
pub async fn show(State(state): State<AppState>, identity: CartIdentity) -> Response {
    let result = state.carts().view(identity.identity()).await;
    respond(&identity, result.map_err(AppError::from))
}

/// Add an item to the cart, creating the cart if needed.
#[instrument(skip(state, identity, payload))]
pub async fn add(
    State(state): State<AppState>,
    identity: CartIdentity,
    payload: std::result::Result<Json<AddItem>, JsonRejection>,
) -> Response {
    let result = match payload {
        Ok(Json(item)) => {
            let product_id = item.product_id.to_string();
            add_breadcrumb(
                "cart",
                "Added item",
                Some(&[("product_id", product_id.as_str())][..]),
            );
            state
                .carts()
                .add(identity.identity(), &item)
                .await
                .map_err(AppError::from)
        }
        Err(rejection) => Err(rejection.into()),
    };
    respond(&identity, result)
}

/// Overwrite a line's quantity; zero removes it.
#[instrument(skip(state, identity, payload))]
pub async fn update(
    State(state): State<AppState>,
    identity: CartIdentity,
    payload: std::result::Result<Json<UpdateCartRequest>, JsonRejection>,
) -> Response {
    let result = match payload {
        Ok(Json(request)) => state
            .carts()
            .set_quantity(identity.identity(), request.line_item_id, request.quantity)
            .await
            .map_err(AppError::from),
        Err(rejection) => Err(rejection.into()),
    };
    respond(&identity, result)
}

/// Remove a line from the cart.
#[instrument(skip(state, identity, payload))]
pub async fn remove(
    State(state): State<AppState>,
    identity: CartIdentity,
    payload: std::result::Result<Json<RemoveFromCartRequest>, JsonRejection>,
) -> Response {
    let result = match payload {
        Ok(Json(request)) => state
            .carts()
            .remove(identity.identity(), request.line_item_id)
            .await
            .map_err(AppError::from),
        Err(rejection) => Err(rejection.into()),
    };
    respond(&identity, result)
}

/// Total quantity in the cart (for the header badge).
#[instrument(skip(state, identity))]
pub async fn count(State(state): State<AppState>, identity: CartIdentity) -> Response {
    let result = state
        .carts()
        .item_count(identity.identity())
        .await
        .map(|count| CartCount { count });
    respond(&identity, result.map_err(AppError::from))
}
