pub mod booking;
pub mod summary;
pub mod user;

pub use booking::{
    Booking, BookingDetails, BookingKind, BookingStatus, ClientSource, CustomerDetails, HotelStay,
    ListingSnapshot, PaymentMethod, PaymentOutcome, PaymentStatus, SupportTicket, VehicleRental,
};
pub use summary::{BookingSummary, RevenueSummary};
pub use user::{Identity, Role, UserProfile};
