pub mod core;
pub mod export;
pub mod marks;
pub mod roster;
pub mod schemes;
