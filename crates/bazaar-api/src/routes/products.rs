//! # Product Catalogue API
//!
//! - `GET    /products`              — search, filter and paginate
//! - `GET    /products/{id}`         — single product
//! - `POST   /admin/products`        — create (admin)
//! - `PUT    /admin/products/{id}`   — partial update (admin)
//! - `DELETE /admin/products/{id}`   — delete (admin)

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::extractors::{
    extract_path, extract_query, extract_validated_json, AdminUser, Validate,
};
use crate::state::{AppState, ProductImage, ProductRecord, PRODUCT_CATEGORIES};

/// Page size for product listings.
pub const RESULTS_PER_PAGE: usize = 8;

const MAX_NAME_CHARS: usize = 100;
const MAX_PRICE_CENTS: u64 = 99_999_999;
const MAX_STOCK: u32 = 9_999;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products))
        .route("/products/{id}", get(get_product))
        .route("/admin/products", post(create_product))
        .route("/admin/products/{id}", put(update_product).delete(delete_product))
}

// -- Request / response types -------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    pub keyword: Option<String>,
    pub category: Option<String>,
    pub page: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProductListResponse {
    pub filtered_count: usize,
    pub res_per_page: usize,
    pub products: Vec<ProductRecord>,
}

#[derive(Debug, Deserialize)]
pub struct NewProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price_cents: u64,
    pub category: String,
    #[serde(default)]
    pub seller: String,
    #[serde(default)]
    pub stock: u32,
    #[serde(default)]
    pub images: Vec<ProductImage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<u64>,
    pub category: Option<String>,
    pub seller: Option<String>,
    pub stock: Option<u32>,
    pub images: Option<Vec<ProductImage>>,
}

fn check_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Please enter product name".into());
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(format!("Product name cannot exceed {MAX_NAME_CHARS} characters"));
    }
    Ok(())
}

fn check_price(price_cents: u64) -> Result<(), String> {
    if price_cents > MAX_PRICE_CENTS {
        return Err(format!("Product price cannot exceed {MAX_PRICE_CENTS} cents"));
    }
    Ok(())
}

fn check_category(category: &str) -> Result<(), String> {
    if PRODUCT_CATEGORIES.contains(&category) {
        Ok(())
    } else {
        Err(format!("Please select correct category, got '{category}'"))
    }
}

fn check_stock(stock: u32) -> Result<(), String> {
    if stock > MAX_STOCK {
        return Err(format!("Product stock cannot exceed {MAX_STOCK}"));
    }
    Ok(())
}

impl Validate for NewProductRequest {
    fn validate(&self) -> Result<(), String> {
        check_name(&self.name)?;
        check_price(self.price_cents)?;
        check_category(&self.category)?;
        check_stock(self.stock)
    }
}

impl Validate for UpdateProductRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.name {
            check_name(name)?;
        }
        if let Some(price) = self.price_cents {
            check_price(price)?;
        }
        if let Some(category) = &self.category {
            check_category(category)?;
        }
        if let Some(stock) = self.stock {
            check_stock(stock)?;
        }
        Ok(())
    }
}

// -- Search -------------------------------------------------------------------

fn matches(product: &ProductRecord, query: &ProductQuery) -> bool {
    let keyword_ok = match query.keyword.as_deref().map(str::trim) {
        Some(k) if !k.is_empty() => product
            .name
            .to_lowercase()
            .contains(&k.to_lowercase()),
        _ => true,
    };
    let category_ok = match query.category.as_deref() {
        Some(c) if !c.is_empty() => product.category == c,
        _ => true,
    };
    keyword_ok && category_ok
}

/// Filter, order by creation time, and cut one page out of `products`.
pub fn search(mut products: Vec<ProductRecord>, query: &ProductQuery) -> ProductListResponse {
    products.retain(|p| matches(p, query));
    products.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    let filtered_count = products.len();
    let page = query.page.unwrap_or(1).max(1);
    let products = products
        .into_iter()
        .skip((page - 1).saturating_mul(RESULTS_PER_PAGE))
        .take(RESULTS_PER_PAGE)
        .collect();
    ProductListResponse {
        filtered_count,
        res_per_page: RESULTS_PER_PAGE,
        products,
    }
}

// -- Handlers -----------------------------------------------------------------

async fn list_products(
    State(state): State<AppState>,
    query: Result<Query<ProductQuery>, QueryRejection>,
) -> Result<Json<ProductListResponse>, AppError> {
    let query = extract_query(query)?;
    Ok(Json(search(state.products.list(), &query)))
}

async fn get_product(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ProductRecord>, AppError> {
    let id = extract_path(id)?;
    state
        .products
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("product {id}")))
}

async fn create_product(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    body: Result<Json<NewProductRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = extract_validated_json(body)?;
    let now = Utc::now();
    let product = ProductRecord {
        id: Uuid::new_v4(),
        name: req.name.trim().to_string(),
        description: req.description,
        price_cents: req.price_cents,
        category: req.category,
        seller: req.seller,
        stock: req.stock,
        images: req.images,
        created_by: admin.id,
        created_at: now,
        updated_at: now,
    };
    state.products.insert(product.id, product.clone());
    tracing::info!(product_id = %product.id, admin = %admin.id, "product created");
    Ok((StatusCode::CREATED, Json(product)))
}

async fn update_product(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<UpdateProductRequest>, JsonRejection>,
) -> Result<Json<ProductRecord>, AppError> {
    let id = extract_path(id)?;
    let req = extract_validated_json(body)?;
    state
        .products
        .try_update(&id, |product| {
            if let Some(name) = req.name {
                product.name = name.trim().to_string();
            }
            if let Some(description) = req.description {
                product.description = description;
            }
            if let Some(price) = req.price_cents {
                product.price_cents = price;
            }
            if let Some(category) = req.category {
                product.category = category;
            }
            if let Some(seller) = req.seller {
                product.seller = seller;
            }
            if let Some(stock) = req.stock {
                product.stock = stock;
            }
            if let Some(images) = req.images {
                product.images = images;
            }
            product.updated_at = Utc::now();
            Ok::<_, AppError>(product.clone())
        })
        .ok_or_else(|| AppError::NotFound(format!("product {id}")))?
        .map(Json)
}

async fn delete_product(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = extract_path(id)?;
    state
        .products
        .remove(&id)
        .ok_or_else(|| AppError::NotFound(format!("product {id}")))?;
    tracing::info!(product_id = %id, admin = %admin.id, "product deleted");
    Ok(Json(serde_json::json!({ "message": "Product deleted" })))
}
