pub mod api_key;
pub mod date;
pub mod email;
pub mod jwt;
pub mod otp;
pub mod password;

pub use api_key::generate_api_key;
pub use date::{start_of_day, start_of_next_day};
pub use email::normalize_email;
pub use jwt::*;
pub use otp::generate_otp;
pub use password::*;
