use std::collections::BTreeMap;

use chrono::Utc;
use tracing::debug;

use shared_config::AppConfig;
use shared_database::{PostgrestQuery, SupabaseClient};

use crate::models::{AdminError, DashboardSummary, LowStockItem};

const CONSULTATION_STATUSES: &[&str] = &[
    "pending",
    "assigned",
    "in_review",
    "completed",
    "cancelled",
    "rejected",
];

const ORDER_STATUSES: &[&str] = &[
    "pending",
    "paid",
    "processing",
    "shipped",
    "delivered",
    "cancelled",
    "refunded",
];

pub struct DashboardService {
    supabase: SupabaseClient,
}

impl DashboardService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn summary(&self, auth_token: &str) -> Result<DashboardSummary, AdminError> {
        debug!("Building admin dashboard");
        let token = Some(auth_token);

        let (consultations, orders, subscriptions, reviews, inventory) = tokio::try_join!(
            self.count_by_status("consultations", CONSULTATION_STATUSES, auth_token),
            self.count_by_status("orders", ORDER_STATUSES, auth_token),
            self.count_where("subscriptions", "active", auth_token),
            self.count_where("refill_check_ins", "pending_review", auth_token),
            async {
                self.supabase
                    .select::<LowStockItem>(
                        "inventory",
                        &PostgrestQuery::new()
                            .select("id,sku,name,quantity_on_hand,reorder_threshold")
                            .eq("active", true)
                            .order("quantity_on_hand", true),
                        token,
                    )
                    .await
                    .map_err(AdminError::from)
            },
        )?;

        Ok(DashboardSummary {
            consultations_by_status: consultations,
            orders_by_status: orders,
            active_subscriptions: subscriptions,
            pending_refill_reviews: reviews,
            low_stock: low_stock(inventory),
            generated_at: Utc::now(),
        })
    }

    async fn count_where(&self, table: &str, status: &str, auth_token: &str) -> Result<usize, AdminError> {
        let total = self
            .supabase
            .count(table, &PostgrestQuery::new().eq("status", status), Some(auth_token))
            .await?;
        Ok(total)
    }

    /// Statuses with no rows are left out.
    async fn count_by_status(
        &self,
        table: &str,
        statuses: &[&str],
        auth_token: &str,
    ) -> Result<BTreeMap<String, usize>, AdminError> {
        let mut counts = BTreeMap::new();
        for status in statuses {
            let total = self.count_where(table, status, auth_token).await?;
            if total > 0 {
                counts.insert(status.to_string(), total);
            }
        }
        Ok(counts)
    }
}

/// PostgREST cannot compare two columns, so the threshold check happens here.
fn low_stock(items: Vec<LowStockItem>) -> Vec<LowStockItem> {
    let mut low: Vec<LowStockItem> = items
        .into_iter()
        .filter(|item| item.quantity_on_hand <= item.reorder_threshold)
        .collect();
    low.sort_by_key(|item| item.quantity_on_hand);
    low
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn item(sku: &str, on_hand: i32, threshold: i32) -> LowStockItem {
        LowStockItem {
            id: Uuid::new_v4(),
            sku: sku.to_string(),
            name: sku.to_string(),
            quantity_on_hand: on_hand,
            reorder_threshold: threshold,
        }
    }

    #[test]
    fn low_stock_includes_items_at_threshold() {
        let low = low_stock(vec![item("A", 10, 5), item("B", 5, 5), item("C", 0, 3)]);
        let skus: Vec<&str> = low.iter().map(|i| i.sku.as_str()).collect();
        assert_eq!(skus, vec!["C", "B"]);
    }
}
