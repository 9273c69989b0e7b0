pub mod inventory;
pub mod order;
pub mod pricing;

pub use inventory::InventoryService;
pub use order::OrderService;
pub use pricing::CheckoutCalculator;
