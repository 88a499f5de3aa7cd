pub mod entity;
pub mod event;
