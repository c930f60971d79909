pub mod common;
pub mod package;
pub mod pagination;
pub mod payment;
pub mod quota;
pub mod soap_note;
pub mod user;

pub use common::*;
pub use package::*;
pub use pagination::*;
pub use payment::*;
pub use quota::*;
pub use soap_note::*;
pub use user::*;
