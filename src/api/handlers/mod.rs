pub mod auth;
pub mod bookings;
pub mod clubs;
pub mod memberships;
pub mod payments;
pub mod root;
