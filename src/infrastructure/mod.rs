//! Postgres-backed services.
//!
//! Every mutating operation runs in one transaction; cart writes for one owner
//! are serialised with a transaction-scoped advisory lock.

pub mod carts;
pub mod catalog;
pub mod events;
pub mod orders;
pub mod payments;

use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::value_objects::CartOwner;

pub use carts::PgCartService;
pub use catalog::CatalogRepository;
pub use events::EventPublisher;
pub use orders::PgOrderService;
pub use payments::PgPaymentService;

/// Block until no other transaction holds the owner's cart lock.
pub(crate) async fn lock_owner(conn: &mut PgConnection, owner: &CartOwner) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(owner.lock_key())
        .execute(conn)
        .await?;
    Ok(())
}

/// Column a set of cart items hangs off.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ItemScope {
    User(Uuid),
    Cart(Uuid),
}

impl ItemScope {
    pub(crate) fn column(&self) -> &'static str {
        match self { Self::User(_) => "user_id", Self::Cart(_) => "cart_id" }
    }
    pub(crate) fn id(&self) -> Uuid {
        match self { Self::User(id) | Self::Cart(id) => *id }
    }
}
