pub mod conversation;
pub mod hero;
pub mod message;
pub mod user;

pub use conversation::*;
pub use hero::*;
pub use message::*;
pub use user::*;
