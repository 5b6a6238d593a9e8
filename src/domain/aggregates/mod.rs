//! Aggregates module
pub mod product;
pub mod cart;
pub mod order;
pub mod payment;

pub use product::{Category, Pagination, Product, ProductCard, ProductVariant, StockLevel};
pub use cart::{AddDecision, CartError, CartItem, CartLine, CartTotals, CartView, MergeStep, QuantityLimit, HOARDING_LIMIT};
pub use order::{CheckoutForm, DeliveryMethod, Order, OrderError, OrderProduct, OrderStatus, Payment, PaymentStatus};
pub use payment::{CallbackAck, CallbackError, CallbackOutcome, MpesaTransaction, PaymentProgress, TransactionStatus};
