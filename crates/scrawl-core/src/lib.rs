pub mod events;
pub mod room;
