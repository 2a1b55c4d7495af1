pub mod id;

pub use id::{notification_id, socket_id};
