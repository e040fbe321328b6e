//! Product business logic - catalogue management and stock.
//!
//! Products are created and edited by administrators. Stock is optional: a
//! product without stock is unlimited. Reserving stock happens when a payment
//! is approved, never when a charge is merely created.

use crate::{
    core::store,
    errors::{Error, Result},
    models::{Product, TimeUnit},
};
use chrono::Utc;
use sea_orm::{ConnectionTrait, TransactionTrait};
use tracing::{info, warn};

/// Fields accepted when creating a product
#[derive(Debug, Clone, Default)]
pub struct NewProduct {
    /// Unique id
    pub id: String,
    /// Display name
    pub name: String,
    /// Description
    pub description: String,
    /// Price in BRL
    pub price: f64,
    /// Image URL
    pub image: Option<String>,
    /// Initial stock, `None` for unlimited
    pub stock: Option<u32>,
    /// Grant length
    pub time_amount: Option<u32>,
    /// Grant unit
    pub time_unit: Option<TimeUnit>,
    /// Never expires
    pub infinito: bool,
    /// Delivery console command template
    pub delivery_command: Option<String>,
    /// Removal console command template
    pub removal_command: Option<String>,
    /// `{quantity}` value
    pub quantity: Option<u32>,
}

/// Partial edit of a product; `None` leaves the field unchanged
#[derive(Debug, Clone, Default)]
pub struct ProductPatch {
    /// New name
    pub name: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New price
    pub price: Option<f64>,
    /// New image URL
    pub image: Option<String>,
    /// New stock
    pub stock: Option<u32>,
    /// New grant length
    pub time_amount: Option<u32>,
    /// New grant unit
    pub time_unit: Option<TimeUnit>,
    /// New permanence flag
    pub infinito: Option<bool>,
    /// New delivery command
    pub delivery_command: Option<String>,
    /// New removal command
    pub removal_command: Option<String>,
}

fn validate_price(price: f64) -> Result<()> {
    if !price.is_finite() || price < 0.0 {
        return Err(Error::InvalidAmount { amount: price });
    }
    Ok(())
}

fn validate_duration(time_amount: Option<u32>, time_unit: Option<TimeUnit>) -> Result<()> {
    match (time_amount, time_unit) {
        (Some(0), _) => Err(Error::InvalidInput {
            message: "Duration must be greater than zero.".to_string(),
        }),
        (Some(_), None) => Err(Error::InvalidInput {
            message: "A duration needs a time unit (min, h or d).".to_string(),
        }),
        _ => Ok(()),
    }
}

/// Returns all products ordered by name.
pub async fn list_products<C: ConnectionTrait>(db: &C) -> Result<Vec<Product>> {
    let mut products: Vec<Product> = store::find(db, |_: &Product| true).await?;
    products.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(products)
}

/// Finds a product by id.
pub async fn get_product<C: ConnectionTrait>(db: &C, id: &str) -> Result<Option<Product>> {
    store::get(db, id).await
}

/// Finds a product by id, failing with [`Error::ProductNotFound`].
pub async fn require_product<C: ConnectionTrait>(db: &C, id: &str) -> Result<Product> {
    get_product(db, id)
        .await?
        .ok_or_else(|| Error::ProductNotFound { id: id.to_string() })
}

/// Creates a new product after validating its fields.
///
/// # Errors
/// - empty id or name
/// - negative or non-finite price
/// - duration without unit, or zero duration
/// - a product with the same id already exists
pub async fn create_product<C: ConnectionTrait>(db: &C, new: NewProduct) -> Result<Product> {
    let id = new.id.trim().to_string();
    let name = new.name.trim().to_string();
    if id.is_empty() || name.is_empty() {
        return Err(Error::InvalidInput {
            message: "Product id and name cannot be empty.".to_string(),
        });
    }
    validate_price(new.price)?;
    validate_duration(new.time_amount, new.time_unit)?;

    let now = Utc::now();
    let product = Product {
        id: id.clone(),
        name,
        description: new.description.trim().to_string(),
        price: new.price,
        image: new.image,
        stock: new.stock,
        time_amount: new.time_amount,
        time_unit: new.time_unit,
        infinito: new.infinito,
        delivery_command: new.delivery_command,
        removal_command: new.removal_command,
        quantity: new.quantity,
        created_at: Some(now),
        updated_at: Some(now),
    };

    if !store::insert_if_absent(db, &product).await? {
        return Err(Error::InvalidInput {
            message: format!("A product with id `{id}` already exists."),
        });
    }

    info!(product_id = %product.id, "Product created");
    Ok(product)
}

/// Applies a partial edit to a product.
pub async fn update_product<C: ConnectionTrait + TransactionTrait>(
    db: &C,
    id: &str,
    patch: ProductPatch,
) -> Result<Product> {
    if let Some(price) = patch.price {
        validate_price(price)?;
    }
    if let Some(name) = &patch.name {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput {
                message: "Product name cannot be empty.".to_string(),
            });
        }
    }

    let current = require_product(db, id).await?;
    validate_duration(
        patch.time_amount.or(current.time_amount),
        patch.time_unit.or(current.time_unit),
    )?;

    let updated = store::update::<Product, _, _>(db, id, |p| {
        if let Some(name) = patch.name {
            p.name = name.trim().to_string();
        }
        if let Some(description) = patch.description {
            p.description = description;
        }
        if let Some(price) = patch.price {
            p.price = price;
        }
        if patch.image.is_some() {
            p.image = patch.image;
        }
        if patch.stock.is_some() {
            p.stock = patch.stock;
        }
        if patch.time_amount.is_some() {
            p.time_amount = patch.time_amount;
        }
        if patch.time_unit.is_some() {
            p.time_unit = patch.time_unit;
        }
        if let Some(infinito) = patch.infinito {
            p.infinito = infinito;
        }
        if patch.delivery_command.is_some() {
            p.delivery_command = patch.delivery_command;
        }
        if patch.removal_command.is_some() {
            p.removal_command = patch.removal_command;
        }
        p.updated_at = Some(Utc::now());
    })
    .await?;

    updated.ok_or_else(|| Error::ProductNotFound { id: id.to_string() })
}

/// Deletes a product. Existing payments and purchases keep their copy of the name.
pub async fn delete_product<C: ConnectionTrait>(db: &C, id: &str) -> Result<Product> {
    let product = require_product(db, id).await?;
    store::remove::<Product, _>(db, id).await?;
    info!(product_id = %id, "Product deleted");
    Ok(product)
}

/// Fails with [`Error::OutOfStock`] when the product has a finite stock of zero.
pub fn ensure_in_stock(product: &Product) -> Result<()> {
    if product.stock == Some(0) {
        return Err(Error::OutOfStock {
            name: product.name.clone(),
        });
    }
    Ok(())
}

/// Takes one unit of stock. Unlimited products are untouched; stock never goes below zero.
///
/// Returns the remaining stock, or `None` for unlimited or deleted products.
pub async fn reserve_stock<C: ConnectionTrait + TransactionTrait>(
    db: &C,
    id: &str,
) -> Result<Option<u32>> {
    let updated = store::update::<Product, _, _>(db, id, |p| {
        if let Some(stock) = p.stock {
            p.stock = Some(stock.saturating_sub(1));
        }
    })
    .await?;

    let remaining = updated.and_then(|p| p.stock);
    if remaining == Some(0) {
        warn!(product_id = %id, "Product is now out of stock");
    }
    Ok(remaining)
}

/// Products whose finite stock is at or below `threshold`.
pub async fn check_low_stock<C: ConnectionTrait>(db: &C, threshold: u32) -> Result<Vec<Product>> {
    let low: Vec<Product> =
        store::find(db, |p: &Product| p.stock.is_some_and(|s| s <= threshold)).await?;
    for product in &low {
        warn!(
            product_id = %product.id,
            stock = product.stock.unwrap_or_default(),
            "Low stock"
        );
    }
    Ok(low)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_create_product_validation() -> Result<()> {
        let db = setup_test_db().await?;

        let result = create_product(
            &db,
            NewProduct {
                id: "  ".to_string(),
                name: "VIP".to_string(),
                price: 10.0,
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));

        let result = create_product(
            &db,
            NewProduct {
                id: "vip".to_string(),
                name: "VIP".to_string(),
                price: -1.0,
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidAmount { amount }) if amount == -1.0));

        let result = create_product(
            &db,
            NewProduct {
                id: "vip".to_string(),
                name: "VIP".to_string(),
                price: f64::NAN,
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidAmount { .. })));

        let result = create_product(
            &db,
            NewProduct {
                id: "vip".to_string(),
                name: "VIP".to_string(),
                price: 10.0,
                time_amount: Some(30),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_create_product_rejects_duplicate_id() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_product(&db, "vip").await?;

        let result = create_test_product(&db, "vip").await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_products_sorted_by_name() -> Result<()> {
        let db = setup_test_db().await?;
        create_custom_product(&db, "b", "Zeta", 5.0).await?;
        create_custom_product(&db, "a", "alpha", 5.0).await?;

        let products = list_products(&db).await?;
        let names: Vec<_> = products.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "Zeta"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_product_patch() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_product(&db, "vip").await?;

        let updated = update_product(
            &db,
            "vip",
            ProductPatch {
                price: Some(42.0),
                stock: Some(3),
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(updated.price, 42.0);
        assert_eq!(updated.stock, Some(3));
        assert_eq!(updated.name, "Test Product vip");

        let missing = update_product(&db, "nope", ProductPatch::default()).await;
        assert!(matches!(missing, Err(Error::ProductNotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_product() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_product(&db, "vip").await?;

        let deleted = delete_product(&db, "vip").await?;
        assert_eq!(deleted.id, "vip");
        assert!(get_product(&db, "vip").await?.is_none());

        let again = delete_product(&db, "vip").await;
        assert!(matches!(again, Err(Error::ProductNotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_reserve_stock_never_goes_negative() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_product(&db, "vip").await?;
        update_product(
            &db,
            "vip",
            ProductPatch {
                stock: Some(1),
                ..Default::default()
            },
        )
        .await?;

        assert_eq!(reserve_stock(&db, "vip").await?, Some(0));
        assert_eq!(reserve_stock(&db, "vip").await?, Some(0));

        let product = require_product(&db, "vip").await?;
        assert!(matches!(ensure_in_stock(&product), Err(Error::OutOfStock { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_unlimited_stock_is_untouched() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_product(&db, "vip").await?;

        assert_eq!(reserve_stock(&db, "vip").await?, None);
        let product = require_product(&db, "vip").await?;
        assert!(ensure_in_stock(&product).is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_check_low_stock() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_product(&db, "a").await?;
        create_test_product(&db, "b").await?;
        create_test_product(&db, "c").await?;
        for (id, stock) in [("a", 2), ("b", 50)] {
            update_product(
                &db,
                id,
                ProductPatch {
                    stock: Some(stock),
                    ..Default::default()
                },
            )
            .await?;
        }

        let low = check_low_stock(&db, 5).await?;
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].id, "a");
        Ok(())
    }
}
