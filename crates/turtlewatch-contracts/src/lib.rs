pub mod alerts;
pub mod analysis;
pub mod cycle;
pub mod events;
