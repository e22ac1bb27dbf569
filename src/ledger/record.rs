use serde::{Deserialize, Serialize};

/// A procurement entry, `"<node>:<item>:<quantity>:<price>"`. Parsing is
/// lenient: missing or non-numeric quantity and price come back as `None`.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ProcurementRecord {
    pub node_id: String,
    pub item_id: Option<String>,
    pub quantity: Option<i64>,
    pub price: Option<i64>,
}

impl ProcurementRecord {
    pub fn new(node_id: &str, item_id: &str, quantity: i64, price: i64) -> Self {
        ProcurementRecord {
            node_id: node_id.to_string(),
            item_id: Some(item_id.to_string()),
            quantity: Some(quantity),
            price: Some(price),
        }
    }

    pub fn parse(raw: &str) -> Self {
        let mut fields = raw.split(':');
        let node_id = fields.next().unwrap_or_default().to_string();
        let item_id = fields.next().map(str::to_string);
        let quantity = fields.next().and_then(|f| f.trim().parse().ok());
        let price = fields.next().and_then(|f| f.trim().parse().ok());
        ProcurementRecord {
            node_id,
            item_id,
            quantity,
            price,
        }
    }

    pub fn is_item(&self, item_id: &str) -> bool {
        self.item_id.as_deref() == Some(item_id)
    }

    /// Wire form; absent trailing fields are left out.
    pub fn encode(&self) -> String {
        let mut fields = vec![self.node_id.clone()];
        if let Some(item) = &self.item_id {
            fields.push(item.clone());
            if let Some(quantity) = self.quantity {
                fields.push(quantity.to_string());
                if let Some(price) = self.price {
                    fields.push(price.to_string());
                }
            }
        }
        fields.join(":")
    }
}
