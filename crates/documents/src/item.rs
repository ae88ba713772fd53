use serde::{Deserialize, Serialize};

use partybook_core::{DomainError, DomainResult, ItemId, Money};

/// One line of a document or invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Stock item, when the line refers to tracked inventory.
    pub item_id: Option<ItemId>,
    pub name: String,
    pub quantity: i64,
    /// Unit price in minor units.
    pub rate: Money,
    /// Must equal `quantity * rate`.
    pub amount: Money,
}

impl LineItem {
    pub fn new(
        item_id: Option<ItemId>,
        name: impl Into<String>,
        quantity: i64,
        rate: Money,
    ) -> DomainResult<Self> {
        let amount = rate.checked_mul(quantity)?;
        let line = Self {
            item_id,
            name: name.into(),
            quantity,
            rate,
            amount,
        };
        line.validate()?;
        Ok(line)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("line item name is required"));
        }
        if self.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if !self.rate.is_positive() {
            return Err(DomainError::validation("rate must be positive"));
        }
        if self.rate.checked_mul(self.quantity)? != self.amount {
            return Err(DomainError::validation(format!(
                "line '{}' amount {} does not equal quantity {} x rate {}",
                self.name, self.amount, self.quantity, self.rate
            )));
        }
        Ok(())
    }
}

/// Validate every line and return their total.
pub fn items_total(items: &[LineItem]) -> DomainResult<Money> {
    for item in items {
        item.validate()?;
    }
    Money::try_sum(items.iter().map(|i| i.amount))
}
