//! Contracts for external collaborators.

mod account;
mod events;
mod session;
mod space;
mod store;

pub use account::AccountService;
pub use events::EventSender;
pub use session::SessionContext;
pub use space::{SpaceIdResolver, SpaceIndex};
pub use store::{
    Collection, CompareOp, DocumentStore, Filter, FindQuery, Modifier, ReadTx, Sort, UpdateResult,
    WriteTx,
};

#[cfg(test)]
pub use account::MockAccountService;
#[cfg(test)]
pub use space::{MockSpaceIdResolver, MockSpaceIndex};
