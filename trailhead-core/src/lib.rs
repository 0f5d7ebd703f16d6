pub mod models;
pub mod lifecycle;
pub mod fees;
pub mod error;
pub mod repository;
pub mod payment;
pub mod identity;
pub mod notify;

pub use error::{BookingError, PaymentProviderError, StoreError};
pub use lifecycle::{BookingEvent, IllegalTransition, ReviewReason, Transition};
pub use models::{
    Booking, BookingStatus, DateRange, Hold, Listing, ListingId, OccupancyEntry, OccupancyKind,
    PaymentSession, PaymentStatus, Transaction, TransactionStatus,
};
pub use repository::{BookingStore, ConfirmOutcome};

pub type BookingResult<T> = Result<T, BookingError>;
