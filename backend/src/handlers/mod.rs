pub mod conversations;
pub mod heroes;
pub mod messages;
pub mod users;

pub use conversations::*;
pub use heroes::*;
pub use messages::*;
pub use users::*;
