pub mod controller;
pub mod dispatch;
pub mod error;
pub mod rules;
pub mod store;

pub use controller::ComplaintController;
pub use dispatch::{
    dispatch_response, DispatchAck, DispatchError, DispatchReport, NotificationDispatcher,
    RecipientOutcome, RecipientResult, ResponsePayload,
};
pub use error::{Rejection, StoreError};
pub use rules::{
    affordances, is_locked, is_response_dispatch_eligible, request_save, request_status_change,
    ComplaintEdits, SavedRecord,
};
pub use store::{ComplaintStore, ComplaintUpdate};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
