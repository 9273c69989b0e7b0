use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use billing_cell::StripeClient;
use prescription_cell::{PrescriptionError, PrescriptionService, PrescriptionStatus};
use shared_config::AppConfig;
use shared_database::{PostgrestQuery, SupabaseClient};
use shared_models::auth::{Role, User};

use crate::models::{
    CheckoutItem, CheckoutReceipt, CheckoutRequest, InventoryItem, Order, OrderDetail, OrderError, OrderItem,
    OrderListQuery, OrderStatus, OrderStatusUpdate, PriceBreakdown, PricedLine, QuoteRequest,
    MAX_ITEM_QUANTITY,
};
use crate::services::{CheckoutCalculator, InventoryService};

pub struct OrderService {
    supabase: SupabaseClient,
    inventory: InventoryService,
    prescriptions: PrescriptionService,
    stripe: StripeClient,
    calculator: CheckoutCalculator,
}

impl OrderService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            inventory: InventoryService::new(config),
            prescriptions: PrescriptionService::new(config),
            stripe: StripeClient::new(config),
            calculator: CheckoutCalculator::new(config.tax_rate_bps),
        }
    }

    /// Prices a cart without reserving stock or charging.
    pub async fn quote(&self, request: QuoteRequest, auth_token: &str) -> Result<PriceBreakdown, OrderError> {
        validate_items(&request.items)?;
        let (_, lines) = self.load_lines(&request.items, auth_token).await?;
        self.calculator
            .price(lines, request.promo_code.as_deref(), request.shipping_method)
    }

    pub async fn checkout(
        &self,
        user: &User,
        request: CheckoutRequest,
        auth_token: &str,
    ) -> Result<CheckoutReceipt, OrderError> {
        validate_items(&request.items)?;
        if !request.shipping_address.is_object() {
            return Err(OrderError::Validation(
                "shipping_address: must be an object".to_string(),
            ));
        }

        let (items, lines) = self.load_lines(&request.items, auth_token).await?;
        if items.iter().any(|item| item.requires_prescription) {
            self.ensure_prescription(user, request.prescription_id, auth_token)
                .await?;
        }

        let breakdown = self.calculator.price(
            lines,
            request.promo_code.as_deref(),
            request.shipping_method,
        )?;

        let intent = self
            .stripe
            .create_payment_intent(
                breakdown.total_cents,
                None,
                request.payment_method_id.as_deref(),
                &[("patient_id", user.id.clone())],
            )
            .await?;
        let status = if intent.succeeded() {
            OrderStatus::Paid
        } else {
            OrderStatus::Pending
        };
        debug!(
            "Payment intent {} for {} cents is {}",
            intent.id, breakdown.total_cents, intent.status
        );

        let now = Utc::now().to_rfc3339();
        let inserted: Result<Order, _> = self
            .supabase
            .insert(
                "orders",
                json!({
                    "patient_id": user.id,
                    "prescription_id": request.prescription_id,
                    "status": status,
                    "subtotal_cents": breakdown.subtotal_cents,
                    "discount_cents": breakdown.discount_cents,
                    "shipping_cents": breakdown.shipping_cents,
                    "tax_cents": breakdown.tax_cents,
                    "total_cents": breakdown.total_cents,
                    "promo_code": breakdown.promo_code,
                    "shipping_method": breakdown.shipping_method,
                    "shipping_address": request.shipping_address,
                    "payment_intent_id": intent.id,
                    "created_at": now,
                    "updated_at": now,
                }),
                Some(auth_token),
            )
            .await;
        let order = match inserted {
            Ok(order) => order,
            Err(e) => {
                self.release_payment(&intent.id, status).await;
                return Err(e.into());
            }
        };

        let rows: Vec<Value> = breakdown
            .lines
            .iter()
            .map(|line| {
                json!({
                    "order_id": order.id,
                    "inventory_id": line.inventory_id,
                    "quantity": line.quantity,
                    "unit_price_cents": line.unit_price_cents,
                    "line_total_cents": line.line_total_cents,
                })
            })
            .collect();
        let order_items: Vec<OrderItem> = match self
            .supabase
            .insert_many("order_items", rows, Some(auth_token))
            .await
        {
            Ok(items) => items,
            Err(e) => {
                self.release_payment(&intent.id, status).await;
                if let Err(delete_err) = self
                    .supabase
                    .delete("orders", &PostgrestQuery::new().eq("id", order.id), Some(auth_token))
                    .await
                {
                    error!("Failed to remove order {} after item insert failed: {}", order.id, delete_err);
                }
                return Err(e.into());
            }
        };

        // Payment is already taken, so stock failures are logged rather than returned.
        for line in &breakdown.lines {
            if let Err(e) = self
                .inventory
                .adjust(&line.inventory_id.to_string(), -line.quantity, auth_token)
                .await
            {
                error!(
                    "Failed to decrement stock for {} on order {}: {}",
                    line.inventory_id, order.id, e
                );
            }
        }

        info!("Order {} placed for {} cents ({})", order.id, order.total_cents, order.status);
        Ok(CheckoutReceipt {
            detail: OrderDetail {
                order,
                items: order_items,
            },
            client_secret: intent.client_secret,
        })
    }

    pub async fn list_for(
        &self,
        user: &User,
        query: OrderListQuery,
        auth_token: &str,
    ) -> Result<Vec<Order>, OrderError> {
        let mut filter = match user.role() {
            Role::Patient => PostgrestQuery::new().eq("patient_id", &user.id),
            Role::Admin => PostgrestQuery::new(),
            Role::Provider => {
                return Err(OrderError::Forbidden(
                    "Providers cannot list orders".to_string(),
                ))
            }
        };
        if let Some(status) = query.status {
            filter = filter.eq("status", status);
        }
        filter = filter.order("created_at", false);

        let orders = self.supabase.select("orders", &filter, Some(auth_token)).await?;
        Ok(orders)
    }

    pub async fn get(&self, order_id: &str, auth_token: &str) -> Result<Order, OrderError> {
        let order = self
            .supabase
            .select_one("orders", &PostgrestQuery::new().eq("id", order_id), Some(auth_token))
            .await?;
        Ok(order)
    }

    /// Owner or admin, with line items.
    pub async fn detail_for(&self, user: &User, order_id: &str, auth_token: &str) -> Result<OrderDetail, OrderError> {
        let order = self.get(order_id, auth_token).await?;
        ensure_owner_or_admin(user, &order)?;
        let items = self.items(order.id, auth_token).await?;
        Ok(OrderDetail { order, items })
    }

    pub async fn update_status(
        &self,
        order_id: &str,
        update: OrderStatusUpdate,
        auth_token: &str,
    ) -> Result<Order, OrderError> {
        let order = self.get(order_id, auth_token).await?;
        if !order.status.can_transition_to(update.status) {
            warn!("Invalid order transition {} -> {}", order.status, update.status);
            return Err(OrderError::InvalidStatusTransition {
                from: order.status,
                to: update.status,
            });
        }
        if update.status.is_closing() {
            return self.close(order, auth_token).await;
        }

        let mut changes = json!({
            "status": update.status,
            "updated_at": Utc::now().to_rfc3339(),
        });
        if update.status == OrderStatus::Shipped {
            let tracking = update
                .tracking_number
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    OrderError::Validation("tracking_number: is required when shipping".to_string())
                })?;
            changes["tracking_number"] = json!(tracking);
        }

        let updated = self
            .guarded_update(order.id, order.status, changes, auth_token)
            .await?;
        info!("Order {} moved {} -> {}", updated.id, order.status, updated.status);
        Ok(updated)
    }

    /// Owner or admin, before fulfilment starts.
    pub async fn cancel(&self, user: &User, order_id: &str, auth_token: &str) -> Result<Order, OrderError> {
        let order = self.get(order_id, auth_token).await?;
        ensure_owner_or_admin(user, &order)?;
        if !order.status.is_cancellable() {
            return Err(OrderError::InvalidStatusTransition {
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }

        let closed = self.close(order, auth_token).await?;
        info!("Order {} {} by {}", closed.id, closed.status, user.id);
        Ok(closed)
    }

    /// Every way into `cancelled` or `refunded` ends here. The status is claimed
    /// first, captured money is then refunded (the claim is rolled back if Stripe
    /// refuses), and undelivered stock goes back on the shelf.
    async fn close(&self, order: Order, auth_token: &str) -> Result<Order, OrderError> {
        let refund_intent = order
            .payment_intent_id
            .as_deref()
            .filter(|_| order.status.has_captured_payment());
        let target = if refund_intent.is_some() {
            OrderStatus::Refunded
        } else {
            OrderStatus::Cancelled
        };

        let claimed = self
            .guarded_update(
                order.id,
                order.status,
                json!({ "status": target, "updated_at": Utc::now().to_rfc3339() }),
                auth_token,
            )
            .await?;

        if let Some(payment_intent_id) = refund_intent {
            match self.stripe.create_refund(payment_intent_id).await {
                Ok(refund) => {
                    debug!("Refund {} for order {} is {}", refund.id, order.id, refund.status)
                }
                Err(e) => {
                    error!("Refund for order {} failed, restoring {}: {}", order.id, order.status, e);
                    if let Err(revert_err) = self
                        .guarded_update(
                            order.id,
                            target,
                            json!({ "status": order.status, "updated_at": Utc::now().to_rfc3339() }),
                            auth_token,
                        )
                        .await
                    {
                        error!("Failed to restore order {} to {}: {}", order.id, order.status, revert_err);
                    }
                    return Err(e.into());
                }
            }
        }

        if order.status.holds_stock() {
            for item in self.items(order.id, auth_token).await? {
                if let Err(e) = self
                    .inventory
                    .adjust(&item.inventory_id.to_string(), item.quantity, auth_token)
                    .await
                {
                    error!(
                        "Failed to restock {} for closed order {}: {}",
                        item.inventory_id, order.id, e
                    );
                }
            }
        }

        info!("Order {} closed {} -> {}", claimed.id, order.status, claimed.status);
        Ok(claimed)
    }

    /// Undoes a charge whose order could not be recorded.
    async fn release_payment(&self, payment_intent_id: &str, status: OrderStatus) {
        let released = if status == OrderStatus::Paid {
            self.stripe.create_refund(payment_intent_id).await.map(|_| ())
        } else {
            self.stripe.cancel_payment_intent(payment_intent_id).await.map(|_| ())
        };
        match released {
            Ok(()) => warn!("Released payment {} after the order failed to save", payment_intent_id),
            Err(e) => error!(
                "Payment {} could not be released after the order failed to save: {}",
                payment_intent_id, e
            ),
        }
    }

    async fn items(&self, order_id: Uuid, auth_token: &str) -> Result<Vec<OrderItem>, OrderError> {
        let items = self
            .supabase
            .select(
                "order_items",
                &PostgrestQuery::new().eq("order_id", order_id),
                Some(auth_token),
            )
            .await?;
        Ok(items)
    }

    /// Resolves requested items against inventory, in request order.
    async fn load_lines(
        &self,
        requested: &[CheckoutItem],
        auth_token: &str,
    ) -> Result<(Vec<InventoryItem>, Vec<PricedLine>), OrderError> {
        let ids: Vec<Uuid> = requested.iter().map(|item| item.inventory_id).collect();
        let mut found: HashMap<Uuid, InventoryItem> = self
            .inventory
            .get_many(&ids, auth_token)
            .await?
            .into_iter()
            .map(|item| (item.id, item))
            .collect();

        let mut items = Vec::with_capacity(requested.len());
        let mut lines = Vec::with_capacity(requested.len());
        for wanted in requested {
            let item = found
                .remove(&wanted.inventory_id)
                .ok_or(OrderError::ItemNotFound)?;
            if !item.active {
                return Err(OrderError::ItemUnavailable { name: item.name });
            }
            if item.quantity_on_hand < wanted.quantity {
                return Err(OrderError::InsufficientStock {
                    name: item.name,
                    available: item.quantity_on_hand,
                });
            }
            lines.push(PricedLine::new(&item, wanted.quantity));
            items.push(item);
        }
        Ok((items, lines))
    }

    async fn ensure_prescription(
        &self,
        user: &User,
        prescription_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<(), OrderError> {
        let prescription_id = prescription_id.ok_or_else(|| {
            OrderError::PrescriptionRequired(
                "prescription_id is required for prescription-only items".to_string(),
            )
        })?;

        let prescription = match self
            .prescriptions
            .get(&prescription_id.to_string(), auth_token)
            .await
        {
            Ok(prescription) => prescription,
            Err(PrescriptionError::NotFound) => {
                return Err(OrderError::PrescriptionRequired(
                    "Prescription not found".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };

        if !prescription.is_owned_by(&user.id) {
            return Err(OrderError::Forbidden(
                "Prescription belongs to another patient".to_string(),
            ));
        }
        if prescription.status != PrescriptionStatus::Active || prescription.is_expired_at(Utc::now()) {
            return Err(OrderError::PrescriptionRequired(format!(
                "Prescription is {}; an active prescription is required",
                prescription.status
            )));
        }
        Ok(())
    }

    async fn guarded_update(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        changes: Value,
        auth_token: &str,
    ) -> Result<Order, OrderError> {
        let rows: Vec<Order> = self
            .supabase
            .update(
                "orders",
                &PostgrestQuery::new()
                    .eq("id", order_id)
                    .eq("status", expected),
                changes,
                Some(auth_token),
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or(OrderError::ConcurrentModification)
    }
}

fn ensure_owner_or_admin(user: &User, order: &Order) -> Result<(), OrderError> {
    if order.patient_id.to_string() == user.id || user.is_admin() {
        Ok(())
    } else {
        Err(OrderError::Forbidden(
            "Not authorized to access this order".to_string(),
        ))
    }
}

pub fn validate_items(items: &[CheckoutItem]) -> Result<(), OrderError> {
    if items.is_empty() {
        return Err(OrderError::Validation("items: must not be empty".to_string()));
    }
    let mut seen = HashSet::new();
    for item in items {
        if !(1..=MAX_ITEM_QUANTITY).contains(&item.quantity) {
            return Err(OrderError::Validation(format!(
                "items: quantity must be between 1 and {}",
                MAX_ITEM_QUANTITY
            )));
        }
        if !seen.insert(item.inventory_id) {
            return Err(OrderError::Validation(format!(
                "items: {} is listed more than once",
                item.inventory_id
            )));
        }
    }
    Ok(())
}
