pub mod market;
pub mod prices;
