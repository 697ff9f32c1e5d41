//! Entity-scoped consumers of the real-time client.

mod customer_orders;
mod order_tracking;
mod scoped;
mod vendor_orders;

pub use customer_orders::{CustomerOrder, CustomerOrderFeed, CustomerOrdersState};
pub use order_tracking::{DelayInfo, OrderTracker, OrderTrackingState};
pub use scoped::{ScopedHook, ScopedState, FINISHED_ORDERS_KEPT};
pub use vendor_orders::{VendorOrder, VendorOrderFeed, VendorOrdersState};
