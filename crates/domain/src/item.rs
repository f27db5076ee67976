//! Item catalog: stock-checked grants and reclaim on compensation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::TransactionId;

use crate::codes;
use crate::error::{DomainError, Result};

/// A catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemInfo {
    pub item_id: String,
    pub name: String,
    pub price: u32,
    pub stock: u32,
    pub is_available: bool,
}

/// Before/after pair captured around a stock or inventory mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub before: u32,
    pub after: u32,
}

/// Parameters for a grant call.
#[derive(Debug, Clone)]
pub struct GrantRequest {
    pub user_id: String,
    pub item_id: String,
    pub quantity: u32,
    pub transaction_id: TransactionId,
}

/// Outcome of a grant call, with stock/inventory snapshots for auditing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemGrant {
    pub success: bool,
    pub user_id: String,
    pub item_id: String,
    pub quantity: u32,
    pub granted_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub error_code: Option<String>,
    pub stock: StockDelta,
    pub owned: StockDelta,
}

impl ItemGrant {
    fn rejected(request: &GrantRequest, stock: u32, owned: u32, reason: &str, code: &str) -> Self {
        Self {
            success: false,
            user_id: request.user_id.clone(),
            item_id: request.item_id.clone(),
            quantity: 0,
            granted_at: Utc::now(),
            reason: Some(reason.to_string()),
            error_code: Some(code.to_string()),
            stock: StockDelta {
                before: stock,
                after: stock,
            },
            owned: StockDelta {
                before: owned,
                after: owned,
            },
        }
    }
}

/// Grants purchased items into a user's inventory.
#[async_trait]
pub trait ItemCatalog: Send + Sync {
    /// Deducts stock and credits the user's inventory in one step,
    /// returning before/after snapshots of both sides.
    async fn grant_item(&self, request: GrantRequest) -> Result<ItemGrant>;

    /// Compensating call: restores stock and removes the granted
    /// quantity from the user's inventory.
    async fn reclaim_item(
        &self,
        user_id: &str,
        item_id: &str,
        quantity: u32,
        transaction_id: TransactionId,
    ) -> Result<()>;

    /// Returns catalog information for an item, if it exists.
    async fn item_info(&self, item_id: &str) -> Option<ItemInfo>;
}

#[derive(Debug, Default)]
struct CatalogState {
    items: HashMap<String, ItemInfo>,
    // user id -> item id -> owned quantity
    inventories: HashMap<String, HashMap<String, u32>>,
    fail_on_grant: bool,
    fail_on_reclaim: bool,
}

/// In-memory item catalog with seeded fixture items.
#[derive(Debug, Clone)]
pub struct InMemoryItemCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl Default for InMemoryItemCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryItemCatalog {
    /// Creates a catalog seeded with the fixture items.
    pub fn new() -> Self {
        let mut items = HashMap::new();
        for item in [
            ItemInfo {
                item_id: "item-sword".to_string(),
                name: "Magic Sword".to_string(),
                price: 100,
                stock: 50,
                is_available: true,
            },
            ItemInfo {
                item_id: "item-potion".to_string(),
                name: "Health Potion".to_string(),
                price: 20,
                stock: 100,
                is_available: true,
            },
            ItemInfo {
                item_id: "item-out-of-stock".to_string(),
                name: "Rare Gem".to_string(),
                price: 500,
                stock: 0,
                is_available: true,
            },
            ItemInfo {
                item_id: "item-disabled".to_string(),
                name: "Disabled Item".to_string(),
                price: 50,
                stock: 10,
                is_available: false,
            },
        ] {
            items.insert(item.item_id.clone(), item);
        }

        Self {
            state: Arc::new(RwLock::new(CatalogState {
                items,
                inventories: HashMap::new(),
                fail_on_grant: false,
                fail_on_reclaim: false,
            })),
        }
    }

    /// Forces grant calls to fail with a service error.
    pub fn set_fail_on_grant(&self, fail: bool) {
        self.state.write().unwrap().fail_on_grant = fail;
    }

    /// Forces reclaim calls to fail, simulating a broken compensation.
    pub fn set_fail_on_reclaim(&self, fail: bool) {
        self.state.write().unwrap().fail_on_reclaim = fail;
    }

    /// Returns an item's current stock, if the item exists.
    pub fn stock_of(&self, item_id: &str) -> Option<u32> {
        self.state
            .read()
            .unwrap()
            .items
            .get(item_id)
            .map(|i| i.stock)
    }

    /// Resets an item's stock to a known value.
    pub fn set_stock(&self, item_id: &str, stock: u32) {
        if let Some(item) = self.state.write().unwrap().items.get_mut(item_id) {
            item.stock = stock;
        }
    }

    /// Returns the quantity of an item a user currently owns.
    pub fn owned_quantity(&self, user_id: &str, item_id: &str) -> u32 {
        self.state
            .read()
            .unwrap()
            .inventories
            .get(user_id)
            .and_then(|inv| inv.get(item_id))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ItemCatalog for InMemoryItemCatalog {
    async fn grant_item(&self, request: GrantRequest) -> Result<ItemGrant> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_grant {
            return Err(DomainError::ItemService(
                "item catalog unavailable".to_string(),
            ));
        }

        let owned_before = state
            .inventories
            .get(&request.user_id)
            .and_then(|inv| inv.get(&request.item_id))
            .copied()
            .unwrap_or(0);

        let Some(item) = state.items.get_mut(&request.item_id) else {
            tracing::warn!(item_id = %request.item_id, "item not found");
            return Ok(ItemGrant::rejected(
                &request,
                0,
                owned_before,
                "Item not found",
                codes::ITEM_NOT_FOUND,
            ));
        };

        if !item.is_available {
            tracing::warn!(item_id = %request.item_id, "item not available");
            let stock = item.stock;
            return Ok(ItemGrant::rejected(
                &request,
                stock,
                owned_before,
                "Item is not available",
                codes::ITEM_NOT_AVAILABLE,
            ));
        }

        if item.stock < request.quantity {
            tracing::warn!(
                item_id = %request.item_id,
                requested = request.quantity,
                available = item.stock,
                "insufficient stock"
            );
            let stock = item.stock;
            return Ok(ItemGrant::rejected(
                &request,
                stock,
                owned_before,
                "Insufficient stock",
                codes::INSUFFICIENT_STOCK,
            ));
        }

        let stock_before = item.stock;
        item.stock -= request.quantity;
        let stock_after = item.stock;

        let owned = state
            .inventories
            .entry(request.user_id.clone())
            .or_default()
            .entry(request.item_id.clone())
            .or_insert(0);
        *owned += request.quantity;
        let owned_after = *owned;

        tracing::debug!(
            item_id = %request.item_id,
            user_id = %request.user_id,
            quantity = request.quantity,
            transaction_id = %request.transaction_id,
            stock_after,
            "item granted"
        );

        Ok(ItemGrant {
            success: true,
            user_id: request.user_id,
            item_id: request.item_id,
            quantity: request.quantity,
            granted_at: Utc::now(),
            reason: None,
            error_code: None,
            stock: StockDelta {
                before: stock_before,
                after: stock_after,
            },
            owned: StockDelta {
                before: owned_before,
                after: owned_after,
            },
        })
    }

    async fn reclaim_item(
        &self,
        user_id: &str,
        item_id: &str,
        quantity: u32,
        transaction_id: TransactionId,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_reclaim {
            return Err(DomainError::ItemService(
                "reclaim channel unavailable".to_string(),
            ));
        }

        let Some(item) = state.items.get_mut(item_id) else {
            return Err(DomainError::CompensationTargetMissing(format!(
                "item {item_id}"
            )));
        };

        item.stock += quantity;

        if let Some(inventory) = state.inventories.get_mut(user_id)
            && let Some(owned) = inventory.get_mut(item_id)
        {
            *owned = owned.saturating_sub(quantity);
            if *owned == 0 {
                inventory.remove(item_id);
            }
        }

        tracing::debug!(
            item_id,
            user_id,
            quantity,
            %transaction_id,
            "item grant reclaimed"
        );
        Ok(())
    }

    async fn item_info(&self, item_id: &str) -> Option<ItemInfo> {
        self.state.read().unwrap().items.get(item_id).cloned()
    }
}
