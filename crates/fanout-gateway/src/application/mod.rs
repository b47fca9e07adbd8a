//! Application layer: the observer the gateway runs its hubs with.

pub mod chat_room;

pub use chat_room::ChatRoom;
