mod cart;
mod checkout;
mod orders;
mod payments;
mod refunds;

pub use cart::cart_routes;
pub use checkout::checkout_routes;
pub use orders::order_routes;
pub use payments::payment_routes;
pub use refunds::refund_routes;
