//! JSON adapter over one storefront session.
//!
//! Amounts cross this boundary as decimal strings (`"23.50"`); everything
//! behind it works in cents.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{AuthProvider, AuthService, Session};
use crate::domain::aggregates::{CatalogItem, CatalogItemPatch, LineItem, NewCatalogItem, OrderAggregate, OrderStatus};
use crate::domain::value_objects::{Money, OrderId, ProductId, UserId};
use crate::error::HerbError;
use crate::services::{CartState, CatalogLookup};
use crate::Storefront;

#[derive(Clone)]
pub struct AppState {
    pub storefront: Arc<Storefront>,
    pub auth: Arc<AuthService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "herbverse"})) }))
        .route("/session", post(sign_in).delete(sign_out))
        .route("/catalog", get(list_catalog))
        .route("/catalog/:id", get(get_catalog_item))
        .route("/cart", get(get_cart))
        .route("/cart/items", post(add_cart_item))
        .route("/cart/items/:id", put(update_cart_item).delete(remove_cart_item))
        .route("/checkout", post(checkout))
        .route("/orders", get(list_orders))
        .route("/vendor/orders", get(list_vendor_orders))
        .route("/vendor/orders/:id/status", put(update_order_status))
        .route("/vendor/items", get(list_vendor_items).post(create_vendor_item))
        .route("/vendor/items/:id", put(update_vendor_item))
        .route("/vendor/items/:id/active", put(set_vendor_item_active))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for HerbError {
    fn into_response(self) -> Response {
        let status = match &self {
            HerbError::Unauthenticated => StatusCode::UNAUTHORIZED,
            HerbError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            HerbError::NotFound { .. } => StatusCode::NOT_FOUND,
            HerbError::EmptyCart => StatusCode::CONFLICT,
            HerbError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, HerbError>;

// =============================================================================
// Views
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineView {
    pub product_id: ProductId,
    pub name: String,
    pub price: Decimal,
    pub quantity: u32,
    pub line_total: Decimal,
    pub image_url: Option<String>,
    pub category: Option<String>,
}

impl From<&LineItem> for LineView {
    fn from(line: &LineItem) -> Self {
        Self {
            product_id: line.product_id.clone(),
            name: line.name.clone(),
            price: line.price.to_decimal(),
            quantity: line.quantity.value(),
            line_total: line.line_total().to_decimal(),
            image_url: line.image_url.clone(),
            category: line.category.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub owner_id: Option<UserId>,
    pub items: Vec<LineView>,
    pub total_price: Decimal,
    pub total_quantity: u64,
}

impl From<&CartState> for CartView {
    fn from(state: &CartState) -> Self {
        let totals = state.totals();
        Self {
            owner_id: state.owner().cloned(),
            items: state.cart.as_ref().map(|c| c.items().iter().map(LineView::from).collect()).unwrap_or_default(),
            total_price: totals.total_price.to_decimal(),
            total_quantity: totals.total_quantity,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: OrderId,
    pub order_number: String,
    pub owner_id: UserId,
    pub items: Vec<LineView>,
    pub total_price: Decimal,
    pub total_quantity: u64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&OrderAggregate> for OrderView {
    fn from(order: &OrderAggregate) -> Self {
        Self {
            id: order.id().clone(),
            order_number: order.order_number().to_string(),
            owner_id: order.owner_id().clone(),
            items: order.items().iter().map(LineView::from).collect(),
            total_price: order.total_price().to_decimal(),
            total_quantity: order.total_quantity(),
            status: order.status(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub is_active: bool,
    pub vendor_id: Option<UserId>,
}

impl From<&CatalogItem> for ItemView {
    fn from(item: &CatalogItem) -> Self {
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            description: item.description.clone(),
            price: item.price.to_decimal(),
            image_url: item.image_url.clone(),
            category: item.category.clone(),
            is_active: item.is_active,
            vendor_id: item.vendor_id.clone(),
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

fn money(amount: Decimal) -> ApiResult<Money> {
    Money::from_decimal(amount).map_err(|e| HerbError::Validation(e.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCartItemRequest { pub product_id: ProductId, pub quantity: i64 }

#[derive(Debug, Deserialize)]
pub struct QuantityRequest { pub quantity: i64 }

#[derive(Debug, Deserialize)]
pub struct StatusRequest { pub status: String }

#[derive(Debug, Deserialize)]
pub struct StatusFilter { pub status: Option<String> }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRequest { pub is_active: bool }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateItemRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
}

impl TryFrom<CreateItemRequest> for NewCatalogItem {
    type Error = HerbError;
    fn try_from(r: CreateItemRequest) -> ApiResult<Self> {
        Ok(NewCatalogItem {
            name: r.name, description: r.description, price: money(r.price)?,
            image_url: r.image_url, category: r.category, is_active: r.is_active,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateItemRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
}

impl TryFrom<UpdateItemRequest> for CatalogItemPatch {
    type Error = HerbError;
    fn try_from(r: UpdateItemRequest) -> ApiResult<Self> {
        Ok(CatalogItemPatch {
            name: r.name, description: r.description, price: r.price.map(money).transpose()?,
            image_url: r.image_url, category: r.category, is_active: r.is_active,
        })
    }
}

// =============================================================================
// Handlers
// =============================================================================

fn require_session(s: &AppState) -> ApiResult<Session> {
    s.auth.current_session().ok_or(HerbError::Unauthenticated)
}

async fn sign_in(State(s): State<AppState>, Json(session): Json<Session>) -> ApiResult<Json<Session>> {
    s.auth.sign_in(session.clone());
    s.storefront.apply_session(Some(&session)).await?;
    Ok(Json(session))
}

async fn sign_out(State(s): State<AppState>) -> ApiResult<StatusCode> {
    s.auth.sign_out();
    s.storefront.apply_session(None).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_catalog(State(s): State<AppState>) -> ApiResult<Json<Vec<ItemView>>> {
    s.storefront.catalog.refresh().await?;
    Ok(Json(s.storefront.catalog.get_active_items().iter().map(ItemView::from).collect()))
}

async fn get_catalog_item(State(s): State<AppState>, Path(id): Path<ProductId>) -> ApiResult<Json<ItemView>> {
    if s.storefront.catalog.get_item_by_id(&id).is_none() {
        s.storefront.catalog.refresh().await?;
    }
    s.storefront.catalog.get_item_by_id(&id)
        .map(|item| Json(ItemView::from(&item)))
        .ok_or_else(|| HerbError::not_found("Item", &id))
}

async fn cart_view(s: &AppState) -> ApiResult<Json<CartView>> {
    let session = require_session(s)?;
    if s.storefront.cart.state().cart.is_none() {
        s.storefront.cart.load_and_subscribe(&session.user_id).await?;
    }
    Ok(Json(CartView::from(&s.storefront.cart.state())))
}

async fn get_cart(State(s): State<AppState>) -> ApiResult<Json<CartView>> { cart_view(&s).await }

async fn add_cart_item(State(s): State<AppState>, Json(r): Json<AddCartItemRequest>) -> ApiResult<Json<CartView>> {
    if s.storefront.catalog.get_item_by_id(&r.product_id).is_none() {
        s.storefront.catalog.refresh().await?;
    }
    s.storefront.add_to_cart(&r.product_id, r.quantity).await?;
    cart_view(&s).await
}

async fn update_cart_item(
    State(s): State<AppState>,
    Path(id): Path<ProductId>,
    Json(r): Json<QuantityRequest>,
) -> ApiResult<Json<CartView>> {
    s.storefront.cart.update_quantity(&id, r.quantity).await?;
    cart_view(&s).await
}

async fn remove_cart_item(State(s): State<AppState>, Path(id): Path<ProductId>) -> ApiResult<Json<CartView>> {
    s.storefront.cart.remove_item(&id).await?;
    cart_view(&s).await
}

async fn checkout(State(s): State<AppState>) -> ApiResult<(StatusCode, Json<OrderView>)> {
    s.storefront.checkout().await?;
    let order = s.storefront.orders.state().current_order
        .ok_or_else(|| HerbError::Validation("checkout produced no order".into()))?;
    Ok((StatusCode::CREATED, Json(OrderView::from(&order))))
}

async fn list_orders(State(s): State<AppState>) -> ApiResult<Json<Vec<OrderView>>> {
    require_session(&s)?;
    s.storefront.orders.fetch_user_orders().await?;
    Ok(Json(s.storefront.orders.state().orders.iter().map(OrderView::from).collect()))
}

async fn list_vendor_orders(State(s): State<AppState>, Query(f): Query<StatusFilter>) -> ApiResult<Json<Vec<OrderView>>> {
    let status = f.status.as_deref().map(str::parse::<OrderStatus>).transpose()?;
    s.storefront.vendor_orders.fetch_vendor_orders().await?;
    Ok(Json(s.storefront.vendor_orders.orders_with_status(status).iter().map(OrderView::from).collect()))
}

async fn update_order_status(
    State(s): State<AppState>,
    Path(id): Path<OrderId>,
    Json(r): Json<StatusRequest>,
) -> ApiResult<Json<OrderView>> {
    let status: OrderStatus = r.status.parse()?;
    let order = s.storefront.vendor_orders.update_order_status(&id, status).await?;
    Ok(Json(OrderView::from(&order)))
}

async fn list_vendor_items(State(s): State<AppState>) -> ApiResult<Json<Vec<ItemView>>> {
    s.storefront.vendor_items.fetch_vendor_items().await?;
    Ok(Json(s.storefront.vendor_items.state().items.iter().map(ItemView::from).collect()))
}

async fn create_vendor_item(
    State(s): State<AppState>,
    Json(r): Json<CreateItemRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let id = s.storefront.vendor_items.add_item(r.try_into()?).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

fn vendor_item(s: &AppState, id: &ProductId) -> ApiResult<Json<ItemView>> {
    s.storefront.vendor_items.state().items.iter()
        .find(|i| &i.id == id)
        .map(|i| Json(ItemView::from(i)))
        .ok_or_else(|| HerbError::not_found("Item", id))
}

async fn update_vendor_item(
    State(s): State<AppState>,
    Path(id): Path<ProductId>,
    Json(r): Json<UpdateItemRequest>,
) -> ApiResult<Json<ItemView>> {
    s.storefront.vendor_items.update_item(&id, r.try_into()?).await?;
    vendor_item(&s, &id)
}

async fn set_vendor_item_active(
    State(s): State<AppState>,
    Path(id): Path<ProductId>,
    Json(r): Json<ActiveRequest>,
) -> ApiResult<Json<ItemView>> {
    s.storefront.vendor_items.toggle_item_active(&id, r.is_active).await?;
    vendor_item(&s, &id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::aggregates::catalog_item::tests::catalog_item;
    use crate::services::testing::seed_item;
    use crate::store::InMemoryDocumentStore;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn app() -> Router {
        let store = Arc::new(InMemoryDocumentStore::new());
        seed_item(&store, &catalog_item("p1", 1000)).await;
        seed_item(&store, &catalog_item("p2", 350)).await;
        let auth = Arc::new(AuthService::new());
        let storefront = Arc::new(Storefront::new(store, auth.clone(), Config::default()));
        router(AppState { storefront, auth })
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
        let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let app = app().await;
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_cart_requires_session() {
        let app = app().await;
        let (status, body) = call(&app, "GET", "/cart", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "User not authenticated");
    }

    #[tokio::test]
    async fn test_shopping_and_checkout() {
        let app = app().await;
        call(&app, "POST", "/session", Some(json!({"userId": "CUST001"}))).await;

        let (status, catalog) = call(&app, "GET", "/catalog", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(catalog.as_array().unwrap().len(), 2);

        call(&app, "POST", "/cart/items", Some(json!({"productId": "p1", "quantity": 2}))).await;
        let (status, cart) = call(&app, "POST", "/cart/items", Some(json!({"productId": "p2", "quantity": 1}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cart["totalPrice"], "23.50");
        assert_eq!(cart["totalQuantity"], 3);

        let (status, _) = call(&app, "POST", "/cart/items", Some(json!({"productId": "p1", "quantity": 0}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let (status, _) = call(&app, "PUT", "/cart/items/ghost", Some(json!({"quantity": 2}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, order) = call(&app, "POST", "/checkout", None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(order["orderNumber"], "ORD-000001");
        assert_eq!(order["status"], "pending");
        assert_eq!(order["totalPrice"], "23.50");

        let (_, cart) = call(&app, "GET", "/cart", None).await;
        assert_eq!(cart["totalQuantity"], 0);
        let (status, _) = call(&app, "POST", "/checkout", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, orders) = call(&app, "GET", "/orders", None).await;
        assert_eq!(orders.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_vendor_manages_orders_and_items() {
        let app = app().await;
        call(&app, "POST", "/session", Some(json!({"userId": "u1"}))).await;
        call(&app, "POST", "/cart/items", Some(json!({"productId": "p1", "quantity": 1}))).await;
        let (_, order) = call(&app, "POST", "/checkout", None).await;
        let order_id = order["id"].as_str().unwrap().to_string();

        let (status, _) = call(&app, "GET", "/vendor/orders", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        call(&app, "POST", "/session", Some(json!({"userId": "vendor-1", "isVendor": true}))).await;
        let uri = format!("/vendor/orders/{order_id}/status");
        let (status, _) = call(&app, "PUT", &uri, Some(json!({"status": "lost"}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let (status, shipped) = call(&app, "PUT", &uri, Some(json!({"status": "shipped"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(shipped["status"], "shipped");
        assert_eq!(shipped["totalPrice"], "10.00");

        let (_, pending) = call(&app, "GET", "/vendor/orders?status=pending", None).await;
        assert!(pending.as_array().unwrap().is_empty());
        let (_, all) = call(&app, "GET", "/vendor/orders", None).await;
        assert_eq!(all.as_array().unwrap().len(), 1);
        let (status, _) = call(&app, "PUT", "/vendor/orders/missing/status", Some(json!({"status": "shipped"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, created) = call(&app, "POST", "/vendor/items",
            Some(json!({"name": "Nettle", "price": "4.25", "category": "tea"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();
        let (status, _) = call(&app, "POST", "/vendor/items", Some(json!({"name": "", "price": "1.00"}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, item) = call(&app, "PUT", &format!("/vendor/items/{id}"), Some(json!({"price": "5.10"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(item["price"], "5.10");
        let (_, item) = call(&app, "PUT", &format!("/vendor/items/{id}/active"), Some(json!({"isActive": false}))).await;
        assert_eq!(item["isActive"], false);

        let (_, items) = call(&app, "GET", "/vendor/items", None).await;
        assert_eq!(items.as_array().unwrap().len(), 3);
        let (_, catalog) = call(&app, "GET", "/catalog", None).await;
        assert_eq!(catalog.as_array().unwrap().len(), 2);
    }
}
