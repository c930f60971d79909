pub mod mailer;
pub mod openai;
pub mod stripe;

pub use mailer::*;
pub use openai::*;
pub use stripe::*;
