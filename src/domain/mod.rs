pub mod booking;
pub mod club;
pub mod membership;
pub mod payment;
pub mod user;

pub use booking::*;
pub use club::*;
pub use membership::*;
pub use payment::*;
pub use user::*;
