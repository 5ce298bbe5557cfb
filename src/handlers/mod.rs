pub mod control;
pub mod input;
pub mod lifecycle;
pub mod seat;
