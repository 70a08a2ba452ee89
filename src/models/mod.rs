pub mod booking;
pub mod otp;
pub mod slot;
pub mod user;

pub use booking::{Booking, BookingSource, BookingStatus};
pub use otp::{OtpPurpose, OtpRecord, RateLimitRecord};
pub use slot::{Slot, SlotStatus, TimeRange};
pub use user::{Role, UserAccount, UserSession};
